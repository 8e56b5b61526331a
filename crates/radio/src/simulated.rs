//! Simulated broadcast medium for testing

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use log::{debug, trace};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::framing::{DeviceId, MAX_PACKET_SIZE};
use crate::hardware::{HardwareFault, RadioConfiguration, RadioDevice, RecvResult, RecvStatus, TickTimer};

/// 802.15.4 channels 11 to 26.
const SUPPORTED_FREQUENCIES_MHZ: std::ops::RangeInclusive<u16> = 2405..=2480;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumConfig {
    /// Per-receiver probability that a frame is lost.
    pub packet_loss: f32,
    /// Probability that clear channel assessment reports a busy channel.
    pub busy_probability: f32,
    /// Probability that a transmit raises a driver fault.
    pub fault_probability: f32,
    /// Per-receiver probability that a frame arrives with a bad CRC.
    pub corruption_probability: f32,
    pub rssi_mean_dbm: f32,
    pub rssi_std_dbm: f32,
    pub ticks_per_second: u64,
}

impl Default for MediumConfig {
    fn default() -> Self {
        Self {
            packet_loss: 0.10,
            busy_probability: 0.05,
            fault_probability: 0.0,
            corruption_probability: 0.01,
            rssi_mean_dbm: -60.0,
            rssi_std_dbm: 8.0,
            ticks_per_second: 1_000_000,
        }
    }
}

impl MediumConfig {
    /// A medium that delivers every frame at a strong signal.
    pub fn ideal() -> Self {
        Self {
            packet_loss: 0.0,
            busy_probability: 0.0,
            fault_probability: 0.0,
            corruption_probability: 0.0,
            rssi_mean_dbm: -50.0,
            rssi_std_dbm: 0.0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediumStats {
    pub frames_sent: u64,
    pub frames_busy: u64,
    pub faults: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    /// Frames that reached a tuned station while it was not receiving.
    pub frames_missed: u64,
    pub bytes_sent: u64,
}

struct AirFrame {
    bytes: Vec<u8>,
    rssi: i16,
    corrupted: bool,
}

struct Station {
    generation: u64,
    inbox: Sender<AirFrame>,
    tuned: Option<u16>,
    listening: bool,
}

/// Single-hop broadcast medium shared by every joined radio.
pub struct SimulatedMedium {
    config: MediumConfig,
    origin: Instant,
    stations: RwLock<HashMap<DeviceId, Station>>,
    generations: Mutex<u64>,
    stats: Mutex<MediumStats>,
}

impl SimulatedMedium {
    pub fn new(config: MediumConfig) -> Arc<Self> {
        debug!("Simulated medium created with config: {:?}", config);
        Arc::new(Self {
            config,
            origin: Instant::now(),
            stations: RwLock::new(HashMap::new()),
            generations: Mutex::new(0),
            stats: Mutex::new(MediumStats::default()),
        })
    }

    pub fn config(&self) -> &MediumConfig {
        &self.config
    }

    /// Attaches a radio for device `id`, replacing any earlier radio with the same id.
    pub fn join(self: &Arc<Self>, id: DeviceId) -> Result<SimulatedRadio, HardwareFault> {
        let (tx, rx) = mpsc::channel();
        let generation = {
            let mut counter = self.generations.lock().map_err(|_| HardwareFault::MediumUnavailable)?;
            *counter += 1;
            *counter
        };
        self.stations
            .write()
            .map_err(|_| HardwareFault::MediumUnavailable)?
            .insert(
                id,
                Station {
                    generation,
                    inbox: tx,
                    tuned: None,
                    listening: false,
                },
            );

        Ok(SimulatedRadio {
            id,
            generation,
            medium: Arc::clone(self),
            inbox: rx,
            config: None,
            on: false,
        })
    }

    pub fn timer(&self) -> SimulatedTimer {
        SimulatedTimer {
            origin: self.origin,
            ticks_per_second: self.config.ticks_per_second,
        }
    }

    pub fn stats(&self) -> MediumStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Whether the radio for `id` is currently inside a receive window.
    pub fn is_listening(&self, id: DeviceId) -> bool {
        self.stations
            .read()
            .map(|stations| stations.get(&id).is_some_and(|s| s.listening))
            .unwrap_or(false)
    }

    fn tune(&self, id: DeviceId, generation: u64, frequency: Option<u16>) -> Result<(), HardwareFault> {
        self.update_station(id, generation, |station| {
            station.tuned = frequency;
            if frequency.is_none() {
                station.listening = false;
            }
        })
    }

    fn set_listening(&self, id: DeviceId, generation: u64, listening: bool) -> Result<(), HardwareFault> {
        self.update_station(id, generation, |station| station.listening = listening)
    }

    fn update_station(&self, id: DeviceId, generation: u64, f: impl FnOnce(&mut Station)) -> Result<(), HardwareFault> {
        let mut stations = self.stations.write().map_err(|_| HardwareFault::MediumUnavailable)?;
        match stations.get_mut(&id) {
            Some(station) if station.generation == generation => {
                f(station);
                Ok(())
            }
            _ => Err(HardwareFault::MediumUnavailable),
        }
    }

    fn leave(&self, id: DeviceId, generation: u64) {
        if let Ok(mut stations) = self.stations.write() {
            if stations.get(&id).is_some_and(|s| s.generation == generation) {
                stations.remove(&id);
            }
        }
    }

    fn broadcast(&self, from: DeviceId, frequency: u16, frame: &[u8]) -> Result<bool, HardwareFault> {
        let mut rng = rand::rng();

        if rng.random::<f32>() < self.config.busy_probability {
            self.update_stats(|s| s.frames_busy += 1)?;
            trace!("Simulated busy channel for device {}", from);
            return Ok(false);
        }

        if rng.random::<f32>() < self.config.fault_probability {
            self.update_stats(|s| s.faults += 1)?;
            return Err(HardwareFault::Driver("simulated transmit fault".into()));
        }

        let rssi = Normal::new(self.config.rssi_mean_dbm, self.config.rssi_std_dbm)
            .map_err(|e| HardwareFault::Driver(format!("bad rssi distribution: {}", e)))?;

        let mut delivered = 0;
        let mut dropped = 0;
        let mut missed = 0;
        {
            let stations = self.stations.read().map_err(|_| HardwareFault::MediumUnavailable)?;
            for (&id, station) in stations.iter() {
                if id == from || station.tuned != Some(frequency) {
                    continue;
                }
                if !station.listening {
                    missed += 1;
                    continue;
                }
                if rng.random::<f32>() < self.config.packet_loss {
                    dropped += 1;
                    continue;
                }
                let air = AirFrame {
                    bytes: frame.to_vec(),
                    rssi: rssi.sample(&mut rng).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16,
                    corrupted: rng.random::<f32>() < self.config.corruption_probability,
                };
                if station.inbox.send(air).is_ok() {
                    delivered += 1;
                }
            }
        }

        trace!(
            "Device {} broadcast {} bytes: {} delivered, {} dropped, {} missed",
            from,
            frame.len(),
            delivered,
            dropped,
            missed
        );

        self.update_stats(|s| {
            s.frames_sent += 1;
            s.bytes_sent += frame.len() as u64;
            s.frames_delivered += delivered;
            s.frames_dropped += dropped;
            s.frames_missed += missed;
        })?;
        Ok(true)
    }

    fn update_stats(&self, f: impl FnOnce(&mut MediumStats)) -> Result<(), HardwareFault> {
        let mut stats = self.stats.lock().map_err(|_| HardwareFault::MediumUnavailable)?;
        f(&mut stats);
        Ok(())
    }
}

/// Ticks since the medium was created; identical for every radio on it.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedTimer {
    origin: Instant,
    ticks_per_second: u64,
}

impl TickTimer for SimulatedTimer {
    fn now(&self) -> u64 {
        let ns = self.origin.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.ns_to_tick(ns)
    }

    fn ticks_per_second(&self) -> u64 {
        self.ticks_per_second
    }
}

pub struct SimulatedRadio {
    id: DeviceId,
    generation: u64,
    medium: Arc<SimulatedMedium>,
    inbox: Receiver<AirFrame>,
    config: Option<RadioConfiguration>,
    on: bool,
}

impl SimulatedRadio {
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn timer(&self) -> SimulatedTimer {
        self.medium.timer()
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl RadioDevice for SimulatedRadio {
    fn configure(&mut self, config: &RadioConfiguration) -> Result<(), HardwareFault> {
        if !SUPPORTED_FREQUENCIES_MHZ.contains(&config.frequency_mhz) {
            return Err(HardwareFault::UnsupportedFrequency(config.frequency_mhz));
        }
        self.config = Some(*config);
        if self.on {
            self.medium.tune(self.id, self.generation, Some(config.frequency_mhz))?;
        }
        Ok(())
    }

    fn turn_on(&mut self) -> Result<(), HardwareFault> {
        let config = self.config.ok_or(HardwareFault::NotConfigured)?;
        self.medium.tune(self.id, self.generation, Some(config.frequency_mhz))?;
        self.on = true;
        Ok(())
    }

    fn turn_off(&mut self) {
        self.on = false;
        let _ = self.medium.tune(self.id, self.generation, None);
    }

    fn send_cca(&mut self, frame: &[u8]) -> Result<bool, HardwareFault> {
        let config = match (self.on, self.config) {
            (true, Some(config)) => config,
            _ => return Err(HardwareFault::PoweredOff),
        };
        if frame.len() > MAX_PACKET_SIZE {
            return Err(HardwareFault::FrameTooLarge(frame.len()));
        }
        self.medium.broadcast(self.id, config.frequency_mhz, frame)
    }

    fn recv(&mut self, buf: &mut [u8], deadline: u64) -> Result<RecvResult, HardwareFault> {
        if !self.on {
            return Err(HardwareFault::PoweredOff);
        }

        let timer = self.timer();
        let now = timer.now();
        if now >= deadline {
            return Ok(RecvResult::timeout());
        }
        let wait = Duration::from_nanos(timer.tick_to_ns(deadline - now));

        // anything still queued landed after the previous window closed
        while self.inbox.try_recv().is_ok() {}
        self.medium.set_listening(self.id, self.generation, true)?;
        let heard = self.inbox.recv_timeout(wait);
        self.medium.set_listening(self.id, self.generation, false)?;

        let air = match heard {
            Ok(air) => air,
            Err(RecvTimeoutError::Timeout) => return Ok(RecvResult::timeout()),
            Err(RecvTimeoutError::Disconnected) => return Err(HardwareFault::MediumUnavailable),
        };

        let size = air.bytes.len();
        if air.corrupted {
            return Ok(RecvResult { status: RecvStatus::CrcFail, size, rssi: air.rssi });
        }
        if size > buf.len() {
            return Ok(RecvResult { status: RecvStatus::TooLong, size, rssi: air.rssi });
        }
        buf[..size].copy_from_slice(&air.bytes);
        Ok(RecvResult { status: RecvStatus::Ok, size, rssi: air.rssi })
    }
}

impl Drop for SimulatedRadio {
    fn drop(&mut self) {
        self.medium.leave(self.id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crate::transceiver::{InboundMessage, SendOutcome, Transceiver};
    use crate::TransceiverSettings;

    type Link = Transceiver<SimulatedRadio, SimulatedTimer>;

    fn settings() -> TransceiverSettings {
        TransceiverSettings {
            base_receive_window_ns: 100_000_000,
            jitter_seed: Some(3),
            ..Default::default()
        }
    }

    fn link(medium: &Arc<SimulatedMedium>, id: DeviceId) -> Link {
        let radio = medium.join(id).unwrap();
        let timer = radio.timer();
        Transceiver::configure(settings(), radio, timer).unwrap()
    }

    /// Puts every listener inside a single receive window, then runs `transmit`.
    fn hear(medium: &Arc<SimulatedMedium>, listeners: Vec<Link>, transmit: impl FnOnce()) -> Vec<(Link, Option<InboundMessage>)> {
        let ids: Vec<_> = listeners.iter().map(|l| l.radio().id()).collect();
        let handles: Vec<_> = listeners
            .into_iter()
            .map(|mut listener| {
                thread::spawn(move || {
                    let message = listener.receive(0);
                    (listener, message)
                })
            })
            .collect();

        let start = Instant::now();
        while !ids.iter().all(|&id| medium.is_listening(id)) {
            assert!(start.elapsed() < Duration::from_secs(5), "listeners never opened a window");
            thread::yield_now();
        }
        transmit();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_mtu_enforcement() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut radio = medium.join(1).unwrap();
        radio.configure(&settings().radio_configuration()).unwrap();
        radio.turn_on().unwrap();

        let result = radio.send_cca(&[0u8; 200]);
        assert!(matches!(result, Err(HardwareFault::FrameTooLarge(200))));

        let result = radio.send_cca(&[0u8; 50]);
        assert!(matches!(result, Ok(true)));
    }

    #[test]
    fn test_unconfigured_radio_faults() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut radio = medium.join(1).unwrap();
        assert_eq!(radio.turn_on(), Err(HardwareFault::NotConfigured));
        assert_eq!(radio.send_cca(b"x"), Err(HardwareFault::PoweredOff));
    }

    #[test]
    fn test_unsupported_frequency_fails_configuration() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let radio = medium.join(1).unwrap();
        let timer = radio.timer();
        let settings = TransceiverSettings { frequency_mhz: 868, ..settings() };
        assert!(Transceiver::configure(settings, radio, timer).is_err());
    }

    #[test]
    fn test_broadcast_reaches_peers_not_sender() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut a = link(&medium, 1);
        let listeners = vec![link(&medium, 2), link(&medium, 3)];

        let heard = hear(&medium, listeners, || assert_eq!(a.send(1, b"hello", 0), SendOutcome::Sent));
        for (_, message) in heard {
            let message = message.unwrap();
            assert_eq!(message.source, 1);
            assert_eq!(message.payload, b"hello");
            assert_eq!(message.rssi, -50);
        }
        assert!(a.receive(0).is_none());

        let stats = medium.stats();
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.frames_delivered, 2);
        assert_eq!(stats.frames_missed, 0);
    }

    #[test]
    fn test_other_frequency_not_heard() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut a = link(&medium, 1);
        let radio = medium.join(2).unwrap();
        let timer = radio.timer();
        let b = Transceiver::configure(TransceiverSettings { frequency_mhz: 2410, ..settings() }, radio, timer).unwrap();

        let heard = hear(&medium, vec![b], || assert_eq!(a.send(1, b"hello", 0), SendOutcome::Sent));
        assert!(heard[0].1.is_none());
        assert_eq!(medium.stats().frames_delivered, 0);
    }

    #[test]
    fn test_frames_sent_while_not_listening_are_lost() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut a = link(&medium, 1);
        let mut b = link(&medium, 2);

        for _ in 0..50 {
            assert_eq!(a.send(1, b"stale", 0), SendOutcome::Sent);
        }
        thread::sleep(Duration::from_millis(20));

        assert!(b.receive(0).is_none());
        assert_eq!(b.stats().timeouts, 1);
        let stats = medium.stats();
        assert_eq!(stats.frames_sent, 50);
        assert_eq!(stats.frames_missed, 50);
        assert_eq!(stats.frames_delivered, 0);
        assert!(!medium.is_listening(2));
    }

    #[test]
    fn test_receive_is_bounded_by_window() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut a = link(&medium, 1);

        let start = Instant::now();
        for attempt in 0..2 {
            assert!(a.receive(attempt).is_none());
        }
        // two windows of at most 100 and 200 ms
        assert!(start.elapsed() < Duration::from_millis(300 + 200));
        assert_eq!(a.stats().timeouts, 2);
    }

    #[test]
    fn test_busy_channel_means_retry() {
        let config = MediumConfig { busy_probability: 1.0, ..MediumConfig::ideal() };
        let medium = SimulatedMedium::new(config);
        let mut a = link(&medium, 1);

        assert_eq!(a.send(1, b"x", 0), SendOutcome::Retry);
        assert_eq!(a.send(1, b"x", 5), SendOutcome::PermanentFailure);
        assert_eq!(medium.stats().frames_busy, 2);
    }

    #[test]
    fn test_corrupted_and_weak_frames_dropped() {
        let config = MediumConfig { corruption_probability: 1.0, ..MediumConfig::ideal() };
        let medium = SimulatedMedium::new(config);
        let mut a = link(&medium, 1);
        let heard = hear(&medium, vec![link(&medium, 2)], || assert_eq!(a.send(1, b"x", 0), SendOutcome::Sent));
        assert!(heard[0].1.is_none());
        assert_eq!(heard[0].0.stats().integrity_failures, 1);

        let config = MediumConfig { rssi_mean_dbm: -90.0, ..MediumConfig::ideal() };
        let medium = SimulatedMedium::new(config);
        let mut a = link(&medium, 1);
        let heard = hear(&medium, vec![link(&medium, 2)], || assert_eq!(a.send(1, b"x", 0), SendOutcome::Sent));
        assert!(heard[0].1.is_none());
        assert_eq!(heard[0].0.stats().weak_signals, 1);
    }

    #[test]
    fn test_dropped_radio_leaves_medium() {
        let medium = SimulatedMedium::new(MediumConfig::ideal());
        let mut a = link(&medium, 1);
        let b = link(&medium, 2);
        drop(b.shutdown());

        assert_eq!(a.send(1, b"x", 0), SendOutcome::Sent);
        let stats = medium.stats();
        assert_eq!(stats.frames_delivered, 0);
        assert_eq!(stats.frames_missed, 0);
    }
}
