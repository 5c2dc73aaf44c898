//! CRC8 used on the TWI link between host and bridge.
//!
//! Parameters: poly=0x93 init=0x00 xorout=0x00 refin=false refout=false.
//! This must match the bridge firmware bit for bit.

pub const CRC8_POLY: u8 = 0x93;

/// Fold a single byte into a running checksum
pub fn crc8_next(crc: u8, data: u8) -> u8 {
    let mut crc = crc ^ data;

    for _ in 0..8 {
        if crc & 0x80 != 0 {
            crc = (crc << 1) ^ CRC8_POLY;
        } else {
            crc <<= 1;
        }
    }

    crc
}

/// Compute the checksum of a byte sequence
pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, b| crc8_next(crc, *b))
}
