//! Broadcast link over a single owned radio
//!
//! `send` and `receive` are synchronous and take the caller's attempt index:
//! sends never sleep, while receives listen for a window that grows with the
//! attempt. Hardware faults never escape either call.

use std::thread;

use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::activity::{Activity, ActivityObserver, NoActivity};
use crate::backoff::ReceiveBackoff;
use crate::framing::{DecodeError, DeviceId, PacketCodec, MAX_PACKET_SIZE};
use crate::hardware::{HardwareFault, RadioDevice, RecvStatus, TickTimer};
use crate::{LinkError, TransceiverSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Retry,
    PermanentFailure,
}

impl SendOutcome {
    /// Whether the caller should stop attempting this send.
    pub fn is_final(&self) -> bool {
        !matches!(self, SendOutcome::Retry)
    }
}

/// A validated frame heard by this device.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Arrival time in seconds on the transceiver timer.
    pub time: f64,
    pub source: DeviceId,
    pub rssi: i16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    #[error("no frame within the receive window")]
    Timeout,

    #[error("too long packet ({size}/{max} bytes)", max = MAX_PACKET_SIZE)]
    TooLong { size: usize },

    #[error("wrong CRC")]
    IntegrityFailure,

    #[error(transparent)]
    Malformed(#[from] DecodeError),

    #[error("receive exception: {0}")]
    Hardware(#[from] HardwareFault),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub retries: u64,
    pub permanent_failures: u64,
    pub overflows: u64,
    pub received: u64,
    pub timeouts: u64,
    pub short_packets: u64,
    pub bad_headers: u64,
    pub weak_signals: u64,
    pub too_long: u64,
    pub integrity_failures: u64,
    pub hardware_faults: u64,
}

impl LinkStats {
    fn record_receive_error(&mut self, err: &ReceiveError) {
        match err {
            ReceiveError::Timeout => self.timeouts += 1,
            ReceiveError::TooLong { .. } => self.too_long += 1,
            ReceiveError::IntegrityFailure => self.integrity_failures += 1,
            ReceiveError::Malformed(DecodeError::ShortPacket { .. }) => self.short_packets += 1,
            ReceiveError::Malformed(DecodeError::BadHeader) => self.bad_headers += 1,
            ReceiveError::Malformed(DecodeError::WeakSignal { .. }) => self.weak_signals += 1,
            ReceiveError::Hardware(_) => self.hardware_faults += 1,
        }
    }
}

pub struct Transceiver<R, T> {
    settings: TransceiverSettings,
    codec: PacketCodec,
    backoff: ReceiveBackoff,
    radio: R,
    timer: T,
    rng: StdRng,
    observer: Box<dyn ActivityObserver>,
    stats: LinkStats,
}

impl<R: RadioDevice, T: TickTimer> Transceiver<R, T> {
    /// Configures and powers on `radio`. Any failure here is fatal for the device.
    pub fn configure(settings: TransceiverSettings, mut radio: R, timer: T) -> Result<Self, LinkError> {
        settings.validate()?;

        let config = settings.radio_configuration();
        radio.configure(&config)?;
        radio.turn_on()?;

        let rng = match settings.jitter_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        info!(
            "Transceiver on at {} MHz, {} dBm, base receive window {} ns, {} send attempts",
            config.frequency_mhz, config.power_dbm, settings.base_receive_window_ns, settings.max_send_attempts
        );

        Ok(Self {
            codec: PacketCodec::new(settings.min_rssi_dbm),
            backoff: ReceiveBackoff::new(settings.base_receive_window_ns, settings.max_backoff_shift),
            settings,
            radio,
            timer,
            rng,
            observer: Box::new(NoActivity),
            stats: LinkStats::default(),
        })
    }

    pub fn with_activity(mut self, observer: impl ActivityObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn settings(&self) -> &TransceiverSettings {
        &self.settings
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Broadcasts `payload` tagged with `id`, making exactly one channel access attempt.
    pub fn send(&mut self, id: DeviceId, payload: &[u8], attempt: u32) -> SendOutcome {
        let packet = match self.codec.encode(id, payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Send failed: {}", e);
                self.stats.overflows += 1;
                self.stats.permanent_failures += 1;
                return SendOutcome::PermanentFailure;
            }
        };

        match self.radio.send_cca(packet.as_bytes()) {
            Ok(true) => {
                self.stats.sent += 1;
                self.observer.activity(Activity::Sent { bytes: packet.len() });
                debug!("Sent {} byte packet", packet.len());
                SendOutcome::Sent
            }
            Ok(false) => {
                trace!("Channel busy on send attempt {}", attempt);
                self.channel_failure(attempt)
            }
            Err(fault) => {
                warn!("Send failed: {}", fault);
                self.stats.hardware_faults += 1;
                self.channel_failure(attempt)
            }
        }
    }

    fn channel_failure(&mut self, attempt: u32) -> SendOutcome {
        if attempt >= self.settings.max_send_attempts {
            warn!("Send aborted: channel unavailable after attempt {}", attempt);
            self.stats.permanent_failures += 1;
            SendOutcome::PermanentFailure
        } else {
            self.stats.retries += 1;
            SendOutcome::Retry
        }
    }

    /// Repeats `send` with growing attempt indices, sleeping a jittered backoff between them.
    pub fn send_with_backoff(&mut self, id: DeviceId, payload: &[u8]) -> SendOutcome {
        let mut attempt = 0;
        loop {
            match self.send(id, payload, attempt) {
                SendOutcome::Retry => {
                    let pause = self.backoff.window(attempt, &mut self.rng);
                    trace!("Backing off {:?} before send attempt {}", pause, attempt + 1);
                    thread::sleep(pause);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Listens once for a window sized by `attempt` and classifies what was heard.
    pub fn try_receive(&mut self, attempt: u32) -> Result<InboundMessage, ReceiveError> {
        let result = self.listen(attempt);
        match &result {
            Ok(_) => self.stats.received += 1,
            Err(e) => self.stats.record_receive_error(e),
        }
        result
    }

    fn listen(&mut self, attempt: u32) -> Result<InboundMessage, ReceiveError> {
        let window = self.backoff.window_ns(attempt, &mut self.rng);
        let deadline = self.timer.now().saturating_add(self.timer.ns_to_tick(window));

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let result = self.radio.recv(&mut buf, deadline)?;

        match result.status {
            RecvStatus::Timeout => Err(ReceiveError::Timeout),
            RecvStatus::TooLong => Err(ReceiveError::TooLong { size: result.size }),
            RecvStatus::CrcFail => Err(ReceiveError::IntegrityFailure),
            RecvStatus::Ok => {
                let packet = self.codec.decode(&buf, result.size, result.rssi)?;
                let message = InboundMessage {
                    time: self.real_time(),
                    source: packet.device,
                    rssi: result.rssi,
                    payload: packet.payload,
                };
                self.observer.activity(Activity::Received {
                    from: message.source,
                    bytes: result.size,
                });
                debug!(
                    "Received {} byte packet from device {} at time {:.3}",
                    result.size, message.source, message.time
                );
                Ok(message)
            }
        }
    }

    /// Next inbound message, or `None` if nothing valid arrived within the window.
    pub fn receive(&mut self, attempt: u32) -> Option<InboundMessage> {
        match self.try_receive(attempt) {
            Ok(message) => Some(message),
            Err(ReceiveError::Timeout) => None,
            Err(e) => {
                warn!("Receive error: {}", e);
                None
            }
        }
    }

    /// Seconds elapsed on the transceiver timer.
    pub fn real_time(&self) -> f64 {
        self.timer.tick_to_ns(self.timer.now()) as f64 / 1e9
    }

    /// Powers the radio off and hands it back.
    pub fn shutdown(mut self) -> R {
        self.radio.turn_off();
        self.radio
    }
}
