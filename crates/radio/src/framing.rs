//! Wire framing: `[PAN header][payload][device id]`

use thiserror::Error;

pub type DeviceId = u32;

/// Largest frame the radio accepts, excluding the hardware-appended CRC.
pub const MAX_PACKET_SIZE: usize = 125;

/// IEEE 802.15.4 data frame, intra PAN, short broadcast destination on PAN 0xaabb.
pub const PAN_HEADER: [u8; 7] = [
    0x41, // data frame, intra pan
    0x08, // no source address, short destination address
    0x00, // sequence number
    0xaa, 0xbb, // pan id
    0xff, 0xff, // broadcast destination
];

pub const ID_FIELD_SIZE: usize = std::mem::size_of::<DeviceId>();

pub const FRAME_OVERHEAD: usize = PAN_HEADER.len() + ID_FIELD_SIZE;

pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - FRAME_OVERHEAD;

/// Default minimum signal strength in dBm for accepting a frame.
pub const RSSI_THRESHOLD_DBM: i16 = -75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("message overflow ({size}/{max} bytes)")]
    TooLarge { size: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("packet is short ({len} bytes)")]
    ShortPacket { len: usize },

    #[error("packet has wrong header")]
    BadHeader,

    #[error("low rssi ({rssi} dBm)")]
    WeakSignal { rssi: i16 },
}

/// An encoded frame, held inline and never larger than [`MAX_PACKET_SIZE`].
#[derive(Clone)]
pub struct WirePacket {
    buf: [u8; MAX_PACKET_SIZE],
    len: usize,
}

impl WirePacket {
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for WirePacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WirePacket").field("len", &self.len).finish()
    }
}

/// A frame that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub device: DeviceId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    min_rssi: i16,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(RSSI_THRESHOLD_DBM)
    }
}

impl PacketCodec {
    pub fn new(min_rssi: i16) -> Self {
        Self { min_rssi }
    }

    pub fn min_rssi(&self) -> i16 {
        self.min_rssi
    }

    pub fn encode(&self, id: DeviceId, payload: &[u8]) -> Result<WirePacket, EncodeError> {
        let size = FRAME_OVERHEAD + payload.len();
        if size > MAX_PACKET_SIZE {
            return Err(EncodeError::TooLarge { size, max: MAX_PACKET_SIZE });
        }

        let mut buf = [0u8; MAX_PACKET_SIZE];
        let body_end = PAN_HEADER.len() + payload.len();
        buf[..PAN_HEADER.len()].copy_from_slice(&PAN_HEADER);
        buf[PAN_HEADER.len()..body_end].copy_from_slice(payload);
        buf[body_end..size].copy_from_slice(&id.to_le_bytes());

        Ok(WirePacket { buf, len: size })
    }

    /// Validates the first `received_len` bytes of `buf` as a frame heard at `rssi` dBm.
    ///
    /// Checks run in order: length, header, signal strength. Offsets are only
    /// trusted once the header matched. A `received_len` beyond the end of `buf`
    /// is a short packet, since the trailing id was never captured.
    pub fn decode(&self, buf: &[u8], received_len: usize, rssi: i16) -> Result<Packet, DecodeError> {
        if received_len > buf.len() {
            return Err(DecodeError::ShortPacket { len: buf.len() });
        }
        let len = received_len;
        if len < FRAME_OVERHEAD {
            return Err(DecodeError::ShortPacket { len });
        }
        let frame = &buf[..len];

        if frame[..PAN_HEADER.len()] != PAN_HEADER {
            return Err(DecodeError::BadHeader);
        }

        if rssi < self.min_rssi {
            return Err(DecodeError::WeakSignal { rssi });
        }

        let id_start = len - ID_FIELD_SIZE;
        let mut id = [0u8; ID_FIELD_SIZE];
        id.copy_from_slice(&frame[id_start..]);

        Ok(Packet {
            device: DeviceId::from_le_bytes(id),
            payload: frame[PAN_HEADER.len()..id_start].to_vec(),
        })
    }
}

/// Folds a 64-bit factory identifier into the device id width.
pub fn fold_hardware_id(raw: u64) -> DeviceId {
    let width = DeviceId::BITS;
    let mut id: DeviceId = 0;
    let mut shift = 0;
    while shift < u64::BITS {
        id ^= (raw >> shift) as DeviceId;
        shift += width;
    }
    id
}
