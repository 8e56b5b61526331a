//! radio link layer for wandlink devices

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod activity;
pub mod backoff;
pub mod framing;
pub mod hardware;
pub mod simulated;
pub mod transceiver;

pub use activity::{Activity, ActivityCounter, ActivityObserver, NoActivity};
pub use backoff::ReceiveBackoff;
pub use framing::{DecodeError, DeviceId, EncodeError, Packet, PacketCodec, WirePacket};
pub use hardware::{HardwareFault, RadioConfiguration, RadioDevice, RecvResult, RecvStatus, TickTimer};
pub use simulated::{MediumConfig, MediumStats, SimulatedMedium, SimulatedRadio, SimulatedTimer};
pub use transceiver::{InboundMessage, LinkStats, ReceiveError, SendOutcome, Transceiver};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid transceiver settings: {0}")]
    InvalidSettings(&'static str),

    #[error("radio configuration failed: {0}")]
    Configuration(#[from] HardwareFault),
}

/// Per-device link settings, fixed once the transceiver is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransceiverSettings {
    /// Carrier frequency in MHz.
    pub frequency_mhz: u16,
    /// Transmission power in dBm.
    pub transmit_power_dbm: i8,
    /// Base duration of a single receive attempt.
    pub base_receive_window_ns: u64,
    /// Attempt index at which a failed send becomes permanent.
    pub max_send_attempts: u32,
    /// Frames heard below this signal strength are discarded.
    pub min_rssi_dbm: i16,
    /// Upper bound on the exponent of the receive window growth.
    pub max_backoff_shift: u32,
    /// Seed for the receive jitter source, drawn from the OS when absent.
    pub jitter_seed: Option<u64>,
}

impl Default for TransceiverSettings {
    fn default() -> Self {
        Self {
            frequency_mhz: 2450,
            transmit_power_dbm: 5,
            base_receive_window_ns: 50_000_000,
            max_send_attempts: 5,
            min_rssi_dbm: framing::RSSI_THRESHOLD_DBM,
            max_backoff_shift: 8,
            jitter_seed: None,
        }
    }
}

impl TransceiverSettings {
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.max_send_attempts == 0 {
            return Err(LinkError::InvalidSettings("max_send_attempts must be positive"));
        }
        if self.base_receive_window_ns == 0 {
            return Err(LinkError::InvalidSettings("base_receive_window_ns must be positive"));
        }
        Ok(())
    }

    pub(crate) fn radio_configuration(&self) -> RadioConfiguration {
        RadioConfiguration {
            frequency_mhz: self.frequency_mhz,
            power_dbm: self.transmit_power_dbm,
            crc: true,
            strict_timeout: false,
        }
    }
}
