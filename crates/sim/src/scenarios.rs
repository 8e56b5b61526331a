//! Simulation scenarios for wandlink devices sharing one medium

use std::time::Duration;

use anyhow::Result;
use log::info;
use wandlink_radio::{DeviceId, MediumConfig, MediumStats, SimulatedMedium, Transceiver, TransceiverSettings};

use crate::runner::{DeviceReport, DeviceRunner};

#[derive(Debug, Clone)]
pub struct NetworkReport {
    pub devices: Vec<DeviceReport>,
    pub medium: MediumStats,
}

impl NetworkReport {
    /// Whether every device agrees on the smallest uid in the network.
    pub fn converged(&self) -> bool {
        let expected = self.devices.iter().map(|d| d.uid).min();
        self.devices.iter().all(|d| Some(d.min_uid) == expected)
    }
}

/// Runs `rounds` rounds of `period` on every device, each device on its own blocking task.
pub async fn run_network(
    config: MediumConfig,
    settings: TransceiverSettings,
    uids: &[DeviceId],
    rounds: u32,
    period: Duration,
) -> Result<NetworkReport> {
    let medium = SimulatedMedium::new(config);
    info!("Running {} devices for {} rounds of {:?}", uids.len(), rounds, period);

    let mut links = Vec::with_capacity(uids.len());
    for &uid in uids {
        let radio = medium.join(uid)?;
        let timer = radio.timer();
        let mut settings = settings.clone();
        settings.jitter_seed = settings.jitter_seed.map(|seed| seed ^ uid as u64);
        links.push((uid, Transceiver::configure(settings, radio, timer)?));
    }

    let handles: Vec<_> = links
        .into_iter()
        .map(|(uid, link)| {
            tokio::task::spawn_blocking(move || -> Result<DeviceReport> {
                let mut runner = DeviceRunner::new(uid, link);
                for _ in 0..rounds {
                    runner.run_round(period)?;
                }
                Ok(runner.report())
            })
        })
        .collect();

    let mut devices = Vec::with_capacity(handles.len());
    for handle in handles {
        devices.push(handle.await??);
    }

    let medium = medium.stats();
    info!(
        "Medium carried {} frames ({} bytes), {} delivered, {} dropped, {} missed, {} busy",
        medium.frames_sent,
        medium.bytes_sent,
        medium.frames_delivered,
        medium.frames_dropped,
        medium.frames_missed,
        medium.frames_busy
    );

    Ok(NetworkReport { devices, medium })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TransceiverSettings {
        TransceiverSettings {
            base_receive_window_ns: 5_000_000,
            jitter_seed: Some(11),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ideal_network_converges() {
        let uids = [40, 7, 19, 33];
        let report = run_network(MediumConfig::ideal(), settings(), &uids, 5, Duration::from_millis(40))
            .await
            .unwrap();

        assert_eq!(report.devices.len(), 4);
        assert!(report.converged());
        for device in &report.devices {
            assert_eq!(device.hops, if device.uid == 7 { 0 } else { 1 });
            assert_eq!(device.neighbours.len(), 3);
            // round boundaries drift between threads, so a beacon may land one round late
            // or go out before a peer opened its first receive window
            assert!(device.strongest_link >= 60);
            assert_eq!(device.send_failures, 0);
        }
        assert_eq!(report.medium.frames_sent, 20);
        assert!(report.medium.frames_delivered <= 60);
        assert_eq!(report.medium.frames_dropped, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unconfigurable_radio_aborts_run() {
        let settings = TransceiverSettings { frequency_mhz: 915, ..settings() };
        let result = run_network(MediumConfig::ideal(), settings, &[1, 2], 1, Duration::from_millis(1)).await;
        assert!(result.is_err());
    }
}
