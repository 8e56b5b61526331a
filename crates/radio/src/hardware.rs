//! Contract between the link layer and the radio it drives

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareFault {
    #[error("radio is not configured")]
    NotConfigured,

    #[error("radio is powered off")]
    PoweredOff,

    #[error("unsupported frequency {0} MHz")]
    UnsupportedFrequency(u16),

    #[error("frame of {0} bytes exceeds radio limit")]
    FrameTooLarge(usize),

    #[error("radio medium unavailable")]
    MediumUnavailable,

    #[error("driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfiguration {
    pub frequency_mhz: u16,
    pub power_dbm: i8,
    /// Append and verify a CRC on every frame.
    pub crc: bool,
    /// Fail receives that end mid-frame at the deadline instead of finishing the frame.
    pub strict_timeout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Ok,
    TooLong,
    CrcFail,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvResult {
    pub status: RecvStatus,
    /// Bytes written to the receive buffer, or the frame length for `TooLong`.
    pub size: usize,
    pub rssi: i16,
}

impl RecvResult {
    pub fn timeout() -> Self {
        Self { status: RecvStatus::Timeout, size: 0, rssi: i16::MIN }
    }
}

/// A half-duplex broadcast radio.
pub trait RadioDevice {
    fn configure(&mut self, config: &RadioConfiguration) -> Result<(), HardwareFault>;

    fn turn_on(&mut self) -> Result<(), HardwareFault>;

    fn turn_off(&mut self);

    /// Transmits after a clear channel assessment; `Ok(false)` means the channel was busy.
    fn send_cca(&mut self, frame: &[u8]) -> Result<bool, HardwareFault>;

    /// Blocks until a frame is received into `buf` or the timer reaches `deadline` ticks.
    fn recv(&mut self, buf: &mut [u8], deadline: u64) -> Result<RecvResult, HardwareFault>;
}

/// Monotonic hardware timer.
pub trait TickTimer {
    fn now(&self) -> u64;

    fn ticks_per_second(&self) -> u64;

    fn ns_to_tick(&self, ns: u64) -> u64 {
        let ticks = (ns as u128 * self.ticks_per_second() as u128) / 1_000_000_000;
        ticks.min(u64::MAX as u128) as u64
    }

    fn tick_to_ns(&self, ticks: u64) -> u64 {
        let ns = (ticks as u128 * 1_000_000_000) / self.ticks_per_second().max(1) as u128;
        ns.min(u64::MAX as u128) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTimer(u64);

    impl TickTimer for FixedTimer {
        fn now(&self) -> u64 {
            0
        }

        fn ticks_per_second(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn test_tick_conversion() {
        let timer = FixedTimer(48_000_000);
        assert_eq!(timer.ns_to_tick(1_000_000_000), 48_000_000);
        assert_eq!(timer.ns_to_tick(50_000_000), 2_400_000);
        assert_eq!(timer.tick_to_ns(48), 1_000);

        let timer = FixedTimer(1_000_000_000);
        assert_eq!(timer.ns_to_tick(u64::MAX), u64::MAX);
    }
}
