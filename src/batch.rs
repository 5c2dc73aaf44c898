//! Parser for shell command lines.
//!
//! Each line contains zero or more whitespace separated tokens:
//!
//! - `0fcb` hex payload, framed with length and CRC8
//! - `!040fcbff` hex payload sent as-is
//! - `s100` sleep for 100ms
//!
//! An empty line is a status poll (`01`).

use thiserror::Error;

use crate::packet::Command;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Token {
    Send(Command),
    /// Pause in milliseconds, no bus activity
    Sleep(u32),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BatchError {
    #[error("invalid hex in '{token}': {source}")]
    InvalidHex {
        token: String,
        source: hex::FromHexError,
    },

    #[error("invalid sleep '{0}', expected s<milliseconds>")]
    InvalidSleep(String),

    #[error("unknown token '{0}'")]
    UnknownToken(String),
}

/// Parse a single token
pub fn parse_token(token: &str) -> Result<Token, BatchError> {
    if let Some(hex) = token.strip_prefix('!') {
        return decode_hex(token, hex).map(|b| Token::Send(Command::Raw(b)));
    }

    if let Some(ms) = token.strip_prefix('s') {
        return ms
            .parse::<u32>()
            .map(Token::Sleep)
            .map_err(|_| BatchError::InvalidSleep(token.to_string()));
    }

    if !token.is_empty() && token.chars().all(|c| c.is_ascii_hexdigit()) {
        return decode_hex(token, token).map(|b| Token::Send(Command::Framed(b)));
    }

    Err(BatchError::UnknownToken(token.to_string()))
}

/// Parse a whole line, an empty line is a status poll
pub fn parse_line(line: &str) -> Result<Vec<Token>, BatchError> {
    let tokens = line
        .split_whitespace()
        .map(parse_token)
        .collect::<Result<Vec<_>, _>>()?;

    if tokens.is_empty() {
        return Ok(vec![Token::Send(Command::status_poll())]);
    }

    Ok(tokens)
}

fn decode_hex(token: &str, hex: &str) -> Result<Vec<u8>, BatchError> {
    hex::decode(hex).map_err(|source| BatchError::InvalidHex {
        token: token.to_string(),
        source,
    })
}
