//! Byte transport between host and bridge.

use std::time::{Duration, Instant};

use embedded_hal::blocking::i2c::{Read, Write};

/// Transport level failures
#[derive(Clone, PartialEq, Debug)]
pub enum TransportError<E> {
    /// Underlying bus error
    Bus(E),
    /// Transaction exceeded the read deadline
    Timeout,
}

impl<E> From<E> for TransportError<E> {
    fn from(e: E) -> Self {
        Self::Bus(e)
    }
}

/// Write-then-read access to the bridge. No framing knowledge.
pub trait Transport<E> {
    /// Write `out` (skipped when empty), then read up to `max_read` bytes
    fn write_then_read(&mut self, out: &[u8], max_read: usize)
        -> Result<Vec<u8>, TransportError<E>>;
}

/// Transport over an embedded-hal blocking I2C bus
pub struct I2cTransport<I> {
    i2c: I,
    address: u8,
    timeout: Option<Duration>,
}

impl<I, E> I2cTransport<I>
where
    I: Write<Error = E> + Read<Error = E>,
{
    /// Create a new transport for the bridge at `address`
    pub fn new(i2c: I, address: u8) -> Self {
        Self {
            i2c,
            address,
            timeout: None,
        }
    }

    /// Treat transactions slower than `timeout` as failed.
    ///
    /// The deadline is checked once the blocking read returns, a read that
    /// never returns is not interrupted.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Release the underlying bus
    pub fn free(self) -> I {
        self.i2c
    }
}

impl<I, E> Transport<E> for I2cTransport<I>
where
    I: Write<Error = E> + Read<Error = E>,
{
    fn write_then_read(
        &mut self,
        out: &[u8],
        max_read: usize,
    ) -> Result<Vec<u8>, TransportError<E>> {
        let start = Instant::now();

        if !out.is_empty() {
            trace!("TWI write 0x{:02x}: {:02x?}", self.address, out);
            self.i2c.write(self.address, out)?;
        }

        let mut buff = vec![0u8; max_read];
        self.i2c.read(self.address, &mut buff)?;

        if let Some(t) = self.timeout {
            if start.elapsed() > t {
                warn!("TWI transaction exceeded {:?}, discarding read", t);
                return Err(TransportError::Timeout);
            }
        }

        trace!("TWI read 0x{:02x}: {:02x?}", self.address, buff);

        Ok(buff)
    }
}
