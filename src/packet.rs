//! Packet framing for the TWI link.
//!
//! A single TWI transaction may carry one or more packets back to back:
//!
//! ```text
//! +--------+--------+-------------------+-------+
//! | length | header | data[0..length-3] | crc8  |
//! +--------+--------+-------------------+-------+
//! ```
//!
//! `length` counts every byte including itself and the CRC. A read buffer
//! ends at the first `0x00` (idle) or `0xff` (no data) where a length byte
//! would be expected.

use thiserror::Error;

use crate::crc::crc8;
use crate::protocol::{
    self, HeaderKind, MdbFlags, Request, GREETING, PACKET_OVERHEAD, SENTINEL_EMPTY, SENTINEL_IDLE,
};

/// Largest payload that still fits the one byte length field
pub const MAX_PAYLOAD: usize = u8::MAX as usize - 2;

/// Errors from framing or unframing packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Framed payload would not fit the length byte
    #[error("payload too large: {0} bytes, maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    /// Declared length runs past the end of the buffer
    #[error("truncated packet at offset {offset}: length {length}, {available} bytes available")]
    TruncatedPacket {
        offset: usize,
        length: u8,
        available: usize,
    },

    /// Declared length too short to hold a header and CRC.
    ///
    /// The bridge never sends these, lengths 1 and 2 are rejected by the host.
    #[error("invalid packet length {length} at offset {offset}")]
    InvalidLength { offset: usize, length: u8 },

    /// Trailing byte does not match the computed checksum
    #[error("CRC8 mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    CrcMismatch { expected: u8, actual: u8 },
}

/// Frame a payload for transmission, or pass it through as-is when `raw`
pub fn encode(payload: &[u8], raw: bool) -> Result<Vec<u8>, ProtocolError> {
    if raw {
        return Ok(payload.to_vec());
    }

    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.push((payload.len() + 2) as u8);
    framed.extend_from_slice(payload);

    let crc = crc8(&framed);
    framed.push(crc);

    Ok(framed)
}

/// An outgoing request
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    /// Wrapped with length and CRC before sending
    Framed(Vec<u8>),
    /// Sent verbatim, for manual protocol experiments
    Raw(Vec<u8>),
}

impl Command {
    /// The bare status poll (`01`)
    pub fn status_poll() -> Self {
        Self::request(Request::Poll)
    }

    /// A data-less framed request
    pub fn request(request: Request) -> Self {
        Command::Framed(vec![request as u8])
    }

    /// Send `data` on the MDB bus
    pub fn mdb_transaction(flags: MdbFlags, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(flags.code());
        payload.extend_from_slice(data);
        Command::Framed(payload)
    }

    /// Only the bare status poll triggers automatic queue draining
    pub fn is_status_poll(&self) -> bool {
        match self {
            Command::Framed(p) => p.as_slice() == [Request::Poll as u8],
            Command::Raw(_) => false,
        }
    }

    pub fn payload(&self) -> &[u8] {
        match self {
            Command::Framed(p) | Command::Raw(p) => p,
        }
    }

    /// Bytes to put on the wire
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Command::Framed(p) => encode(p, false),
            Command::Raw(p) => encode(p, true),
        }
    }
}

/// A packet decoded from a read buffer
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet {
    pub length: u8,
    pub header: u8,
    pub data: Vec<u8>,
    /// Trailing checksum as received, not part of the payload
    pub crc: u8,
}

impl Packet {
    pub fn kind(&self) -> HeaderKind {
        protocol::classify(self.header)
    }

    /// Queue length if this is an `OK` packet with data
    pub fn queue(&self) -> Option<u8> {
        protocol::extract_queue(self)
    }

    /// Checksum the bridge should have sent for this packet
    pub fn expected_crc(&self) -> u8 {
        let mut b = Vec::with_capacity(self.data.len() + 2);
        b.push(self.length);
        b.push(self.header);
        b.extend_from_slice(&self.data);
        crc8(&b)
    }

    pub fn crc_ok(&self) -> bool {
        self.expected_crc() == self.crc
    }

    /// Full wire form, length through CRC
    pub fn bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.length as usize);
        b.push(self.length);
        b.push(self.header);
        b.extend_from_slice(&self.data);
        b.push(self.crc);
        b
    }

    /// The bridge announces itself with this after a reset
    pub fn is_greeting(&self) -> bool {
        self.kind() == HeaderKind::Debug && self.data.as_slice() == GREETING
    }
}

/// Split a read buffer into packets
pub fn decode(buffer: &[u8]) -> Decoder<'_> {
    Decoder::new(buffer)
}

/// Lazy packet iterator over one read buffer.
///
/// Stops at a sentinel or the end of the buffer. After yielding an error
/// it yields nothing further.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
    cursor: usize,
    verify_crc: bool,
    done: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            cursor: 0,
            verify_crc: false,
            done: false,
        }
    }

    /// Reject packets whose trailing byte is not their CRC8
    pub fn verify_crc(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Offset of the next unread byte
    pub fn offset(&self) -> usize {
        self.cursor
    }

    fn next_packet(&mut self) -> Option<Result<Packet, ProtocolError>> {
        let offset = self.cursor;
        let length = *self.buffer.get(offset)?;

        if length == SENTINEL_IDLE || length == SENTINEL_EMPTY {
            return None;
        }

        let available = self.buffer.len() - offset;
        if length as usize > available {
            return Some(Err(ProtocolError::TruncatedPacket {
                offset,
                length,
                available,
            }));
        }

        if (length as usize) < PACKET_OVERHEAD {
            return Some(Err(ProtocolError::InvalidLength { offset, length }));
        }

        let end = offset + length as usize;
        let p = Packet {
            length,
            header: self.buffer[offset + 1],
            data: self.buffer[offset + 2..end - 1].to_vec(),
            crc: self.buffer[end - 1],
        };

        if self.verify_crc && !p.crc_ok() {
            return Some(Err(ProtocolError::CrcMismatch {
                expected: p.expected_crc(),
                actual: p.crc,
            }));
        }

        self.cursor = end;
        Some(Ok(p))
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Packet, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let r = self.next_packet();
        if !matches!(r, Some(Ok(_))) {
            self.done = true;
        }
        r
    }
}

impl<'a> core::iter::FusedIterator for Decoder<'a> {}
