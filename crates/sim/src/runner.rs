//! Round driver for a single simulated device

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use wandlink_radio::{DeviceId, InboundMessage, LinkStats, RadioDevice, SendOutcome, TickTimer, Transceiver};

/// Rounds for which a silent neighbour still counts towards the election.
pub const RETAIN_ROUNDS: u32 = 3;

/// Hop distances at or beyond this are treated as stale.
pub const MAX_HOPS: u16 = 10;

/// State announced by every device once per round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub round: u32,
    pub min_uid: DeviceId,
    pub hops: u16,
}

#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub uid: DeviceId,
    pub rounds: u32,
    pub min_uid: DeviceId,
    pub hops: u16,
    /// Devices heard in at least half of the rounds.
    pub neighbours: Vec<DeviceId>,
    /// Share of rounds in which the most reliable neighbour was heard, in percent.
    pub strongest_link: u8,
    pub max_msg: usize,
    pub send_failures: u64,
    pub link: LinkStats,
}

struct Neighbour {
    beacon: Beacon,
    last_round: u32,
}

pub struct DeviceRunner<R, T> {
    uid: DeviceId,
    link: Transceiver<R, T>,
    round: u32,
    min_uid: DeviceId,
    hops: u16,
    neighbours: HashMap<DeviceId, Neighbour>,
    rounds_heard: HashMap<DeviceId, u32>,
    max_msg: usize,
    send_failures: u64,
}

impl<R: RadioDevice, T: TickTimer> DeviceRunner<R, T> {
    pub fn new(uid: DeviceId, link: Transceiver<R, T>) -> Self {
        Self {
            uid,
            link,
            round: 0,
            min_uid: uid,
            hops: 0,
            neighbours: HashMap::new(),
            rounds_heard: HashMap::new(),
            max_msg: 0,
            send_failures: 0,
        }
    }

    pub fn link(&self) -> &Transceiver<R, T> {
        &self.link
    }

    /// Broadcasts this round's beacon, then listens until `period` has elapsed.
    pub fn run_round(&mut self, period: Duration) -> Result<()> {
        let started = Instant::now();
        self.round += 1;

        let beacon = Beacon {
            round: self.round,
            min_uid: self.min_uid,
            hops: self.hops,
        };
        let payload = bincode::serde::encode_to_vec(beacon, bincode::config::standard())?;
        self.max_msg = self.max_msg.max(payload.len());

        let mut attempt = 0;
        loop {
            match self.link.send(self.uid, &payload, attempt) {
                SendOutcome::Sent => break,
                SendOutcome::PermanentFailure => {
                    self.send_failures += 1;
                    break;
                }
                SendOutcome::Retry => {
                    if let Some(message) = self.link.receive(attempt) {
                        self.absorb(message);
                    }
                    attempt += 1;
                }
            }
        }

        while started.elapsed() < period {
            if let Some(message) = self.link.receive(0) {
                self.absorb(message);
            }
        }

        self.elect();
        debug!(
            "Device {} round {}: min uid {} at {} hops, {} neighbours",
            self.uid,
            self.round,
            self.min_uid,
            self.hops,
            self.neighbours.len()
        );
        Ok(())
    }

    fn absorb(&mut self, message: InboundMessage) {
        let beacon = match bincode::serde::decode_from_slice::<Beacon, _>(&message.payload, bincode::config::standard()) {
            Ok((beacon, _)) => beacon,
            Err(e) => {
                warn!("Device {} got undecodable beacon from {}: {}", self.uid, message.source, e);
                return;
            }
        };

        let fresh = self
            .neighbours
            .get(&message.source)
            .map_or(true, |n| n.last_round != self.round);
        if fresh {
            *self.rounds_heard.entry(message.source).or_insert(0) += 1;
        }
        self.neighbours.insert(
            message.source,
            Neighbour {
                beacon,
                last_round: self.round,
            },
        );
    }

    fn elect(&mut self) {
        let round = self.round;
        self.neighbours.retain(|_, n| round - n.last_round < RETAIN_ROUNDS);

        let candidates = || self.neighbours.values().map(|n| n.beacon).filter(|b| b.hops < MAX_HOPS);

        self.min_uid = candidates().map(|b| b.min_uid).fold(self.uid, DeviceId::min);
        self.hops = if self.min_uid == self.uid {
            0
        } else {
            candidates()
                .filter(|b| b.min_uid == self.min_uid)
                .map(|b| b.hops + 1)
                .min()
                .unwrap_or(MAX_HOPS)
        };
    }

    pub fn report(&self) -> DeviceReport {
        let rounds = self.round.max(1);
        let best = self.rounds_heard.values().copied().max().unwrap_or(0);
        let mut neighbours: Vec<_> = self
            .rounds_heard
            .iter()
            .filter(|&(_, &count)| count * 2 >= rounds)
            .map(|(&id, _)| id)
            .collect();
        neighbours.sort_unstable();

        DeviceReport {
            uid: self.uid,
            rounds: self.round,
            min_uid: self.min_uid,
            hops: self.hops,
            neighbours,
            strongest_link: (best.min(rounds) * 100 / rounds) as u8,
            max_msg: self.max_msg,
            send_failures: self.send_failures,
            link: self.link.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wandlink_radio::{MediumConfig, SimulatedMedium, TransceiverSettings};

    fn settings(seed: u64) -> TransceiverSettings {
        TransceiverSettings {
            base_receive_window_ns: 2_000_000,
            jitter_seed: Some(seed),
            ..Default::default()
        }
    }

    #[test]
    fn test_two_devices_elect_lower_uid() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut runners: Vec<_> = [9, 4]
            .into_iter()
            .map(|uid| {
                let radio = medium.join(uid).unwrap();
                let timer = radio.timer();
                DeviceRunner::new(uid, Transceiver::configure(settings(uid as u64), radio, timer).unwrap())
            })
            .collect();

        // a beacon is only heard while the peer is listening, so both devices run at once
        std::thread::scope(|scope| {
            for runner in runners.iter_mut() {
                scope.spawn(move || {
                    for _ in 0..4 {
                        runner.run_round(Duration::from_millis(30)).unwrap();
                    }
                });
            }
        });

        let high = runners[0].report();
        let low = runners[1].report();
        assert_eq!(high.min_uid, 4);
        assert_eq!(high.hops, 1);
        assert_eq!(low.min_uid, 4);
        assert_eq!(low.hops, 0);
        assert_eq!(low.neighbours, vec![9]);
        assert!(high.max_msg > 0);
        assert_eq!(high.send_failures, 0);
    }

    #[test]
    fn test_blocked_channel_counts_failures() {
        let config = MediumConfig { busy_probability: 1.0, ..MediumConfig::ideal() };
        let medium = SimulatedMedium::new(config);
        let radio = medium.join(1).unwrap();
        let timer = radio.timer();
        let link = Transceiver::configure(settings(1), radio, timer).unwrap();
        let mut runner = DeviceRunner::new(1, link);

        runner.run_round(Duration::from_millis(1)).unwrap();
        let report = runner.report();
        assert_eq!(report.send_failures, 1);
        assert_eq!(report.link.retries, 5);
        assert_eq!(report.link.permanent_failures, 1);
        assert_eq!(report.strongest_link, 0);
        assert!(report.neighbours.is_empty());
    }
}
