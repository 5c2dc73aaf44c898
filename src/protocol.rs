//! Bridge protocol vocabulary: request codes, response headers and sentinels.

use crate::packet::Packet;

/// Bridge has nothing further to send
pub const SENTINEL_IDLE: u8 = 0x00;
/// Bus returned no data
pub const SENTINEL_EMPTY: u8 = 0xFF;

/// Length, header and CRC
pub const PACKET_OVERHEAD: usize = 3;

/// Largest framed response the bridge is expected to produce
pub const MIN_READ_LEN: usize = 73;

/// Default 7-bit TWI address of the bridge
pub const DEFAULT_ADDRESS: u8 = 0x78;

/// Data of the `Debug` packet queued by the bridge after a reset
pub const GREETING: [u8; 3] = [0xbe, 0xeb, 0xee];

/// Requests understood by the bridge (the first byte of a framed payload)
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Request {
    /// Status poll, no data. Answered with `OK` carrying the queue length.
    Poll = 0x01,

    /// Update config, bridge returns full config in response
    Config = 0x02,

    /// Reset, no data. Wait ~100ms then expect the greeting.
    Reset = 0x03,

    /// Read debug info
    Debug = 0x04,

    /// MDB bus reset (hold TX high for 100ms)
    MdbBusReset = 0x07,
}

/// First request code of the MDB transaction range
pub const MDB_TRANSACTION_BASE: u8 = 0x08;

/// Option bits for an MDB transaction request (`08..=0f`)
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct MdbFlags {
    /// Bridge appends the MDB CHK byte
    pub add_chk: bool,
    /// Bridge verifies the CHK byte of the response
    pub verify_chk: bool,
    /// Bridge repeats the transaction on timeout
    pub repeat_on_timeout: bool,
}

impl MdbFlags {
    /// `0f`: auto add and verify CHK, repeat on timeout
    pub const RELEASE: MdbFlags = MdbFlags {
        add_chk: true,
        verify_chk: true,
        repeat_on_timeout: true,
    };

    /// `08`: caller supplies CHK, response CHK ignored, no repeat
    pub const DEBUG: MdbFlags = MdbFlags {
        add_chk: false,
        verify_chk: false,
        repeat_on_timeout: false,
    };

    pub fn code(&self) -> u8 {
        let mut c = MDB_TRANSACTION_BASE;
        if self.add_chk {
            c |= 0b001;
        }
        if self.verify_chk {
            c |= 0b010;
        }
        if self.repeat_on_timeout {
            c |= 0b100;
        }
        c
    }
}

/// Classification of a response header byte.
///
/// Bit 7 set means the bridge is reporting a fault. Codes this host does
/// not know about are kept as `Unknown` so newer firmware never breaks
/// decoding.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum HeaderKind {
    /// Acknowledge, `data[0]` is the pending queue length
    Ok,
    Config,
    Debug,
    /// Incoming data from another TWI master (keyboard)
    Twi,
    MdbStarted,
    /// MDB received ACK or data with a valid checksum
    MdbSuccess,
    /// Extended error in data bytes
    Error,
    ErrBadPacket,
    ErrCrc8,
    ErrBufferOverflow,
    ErrUnknownCommand,
    ErrCorruption,
    ErrMdbBusy,
    ErrMdbProtocol,
    ErrMdbChk,
    ErrMdbNack,
    ErrMdbTimeout,
    ErrUartChatterbox,
    ErrUartRead,
    Unknown(u8),
}

impl HeaderKind {
    /// Wire value of this header
    pub fn code(&self) -> u8 {
        use HeaderKind::*;

        match self {
            Ok => 0x01,
            Config => 0x02,
            Debug => 0x04,
            Twi => 0x05,
            MdbStarted => 0x08,
            MdbSuccess => 0x09,
            Error => 0x80,
            ErrBadPacket => 0x81,
            ErrCrc8 => 0x82,
            ErrBufferOverflow => 0x83,
            ErrUnknownCommand => 0x84,
            ErrCorruption => 0x85,
            ErrMdbBusy => 0x88,
            ErrMdbProtocol => 0x89,
            ErrMdbChk => 0x8a,
            ErrMdbNack => 0x8b,
            ErrMdbTimeout => 0x8c,
            ErrUartChatterbox => 0x90,
            ErrUartRead => 0x91,
            Unknown(c) => *c,
        }
    }

    /// Display name as printed by the shell
    pub fn name(&self) -> &'static str {
        use HeaderKind::*;

        match self {
            Ok => "OK",
            Config => "Config",
            Debug => "Debug",
            Twi => "TWI",
            MdbStarted => "MDB-started",
            MdbSuccess => "MDB-success",
            Error => "Error",
            ErrBadPacket => "Err-bad-packet",
            ErrCrc8 => "Err-CRC8",
            ErrBufferOverflow => "Err-buffer-overflow",
            ErrUnknownCommand => "Err-unknown-command",
            ErrCorruption => "Err-corruption",
            ErrMdbBusy => "Err-MDB-busy",
            ErrMdbProtocol => "Err-MDB-protocol",
            ErrMdbChk => "Err-MDB-CHK",
            ErrMdbNack => "Err-MDB-NACK",
            ErrMdbTimeout => "Err-MDB-timeout",
            ErrUartChatterbox => "Err-UART-chatterbox",
            ErrUartRead => "Err-UART-read",
            Unknown(_) => "UNKNOWN",
        }
    }

    /// Peripheral-side fault (bit 7 of the header)
    pub fn is_error(&self) -> bool {
        self.code() & 0x80 != 0
    }
}

impl From<u8> for HeaderKind {
    fn from(code: u8) -> Self {
        classify(code)
    }
}

impl core::fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Map a header byte to its kind, never fails
pub fn classify(header: u8) -> HeaderKind {
    use HeaderKind::*;

    match header {
        0x01 => Ok,
        0x02 => Config,
        0x04 => Debug,
        0x05 => Twi,
        0x08 => MdbStarted,
        0x09 => MdbSuccess,
        0x80 => Error,
        0x81 => ErrBadPacket,
        0x82 => ErrCrc8,
        0x83 => ErrBufferOverflow,
        0x84 => ErrUnknownCommand,
        0x85 => ErrCorruption,
        0x88 => ErrMdbBusy,
        0x89 => ErrMdbProtocol,
        0x8a => ErrMdbChk,
        0x8b => ErrMdbNack,
        0x8c => ErrMdbTimeout,
        0x90 => ErrUartChatterbox,
        0x91 => ErrUartRead,
        c => Unknown(c),
    }
}

/// Pending queue length reported by an `OK` packet, if any
pub fn extract_queue(packet: &Packet) -> Option<u8> {
    match (classify(packet.header), packet.data.first()) {
        (HeaderKind::Ok, Some(q)) => Some(*q),
        _ => None,
    }
}

/// Number of bytes to request from the bridge for an outgoing buffer
pub fn read_len(out_len: usize, min: usize) -> usize {
    out_len.max(min)
}
