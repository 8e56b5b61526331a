//! simulation tools for wandlink devices

pub mod runner;
pub mod scenarios;

use wandlink_radio::MediumConfig;

pub use runner::{Beacon, DeviceReport, DeviceRunner};
pub use scenarios::{run_network, NetworkReport};

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn good_conditions() -> MediumConfig {
        MediumConfig {
            packet_loss: 0.02,
            busy_probability: 0.02,
            fault_probability: 0.0,
            corruption_probability: 0.005,
            rssi_mean_dbm: -55.0,
            rssi_std_dbm: 4.0,
            ..Default::default()
        }
    }

    pub fn average_conditions() -> MediumConfig {
        MediumConfig {
            packet_loss: 0.10,
            busy_probability: 0.10,
            fault_probability: 0.01,
            corruption_probability: 0.02,
            rssi_mean_dbm: -65.0,
            rssi_std_dbm: 6.0,
            ..Default::default()
        }
    }

    pub fn poor_conditions() -> MediumConfig {
        MediumConfig {
            packet_loss: 0.30,
            busy_probability: 0.30,
            fault_probability: 0.05,
            corruption_probability: 0.05,
            rssi_mean_dbm: -72.0,
            rssi_std_dbm: 8.0,
            ..Default::default()
        }
    }

    /// Crowded channel at the edge of radio range.
    pub fn extreme_conditions() -> MediumConfig {
        MediumConfig {
            packet_loss: 0.50,
            busy_probability: 0.60,
            fault_probability: 0.10,
            corruption_probability: 0.10,
            rssi_mean_dbm: -76.0,
            rssi_std_dbm: 10.0,
            ..Default::default()
        }
    }
}
