//! Host side of the TWI (I2C) to MDB bridge.
//!
//! The bridge microcontroller is a TWI slave that forwards requests onto the
//! MDB vending bus and queues responses for the host to collect. This crate
//! frames requests, splits read buffers back into packets and drives the
//! poll loop that drains the bridge's queue.

use core::marker::PhantomData;

#[macro_use]
extern crate log;

extern crate embedded_hal;
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod batch;
pub mod crc;
pub mod packet;
pub mod protocol;
pub mod transport;

pub use batch::{parse_line, BatchError, Token};
pub use packet::{decode, encode, Command, Packet, ProtocolError};
pub use protocol::{classify, extract_queue, HeaderKind, MdbFlags, Request};
pub use transport::{I2cTransport, Transport, TransportError};

use protocol::{read_len, DEFAULT_ADDRESS, MIN_READ_LEN};

/// Maximum polls after a reset while waiting for the greeting
pub const RESET_POLLS: usize = 3;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    Idle,
    Sending,
    Draining,
}

#[derive(Clone, PartialEq, Debug)]
pub enum Error<BusError> {
    Transport(BusError),
    TransportTimeout,
    Protocol(ProtocolError),
    Batch(BatchError),
}

impl<E> From<TransportError<E>> for Error<E> {
    fn from(e: TransportError<E>) -> Self {
        match e {
            TransportError::Bus(e) => Self::Transport(e),
            TransportError::Timeout => Self::TransportTimeout,
        }
    }
}

impl<E> From<ProtocolError> for Error<E> {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl<E> From<BatchError> for Error<E> {
    fn from(e: BatchError) -> Self {
        Self::Batch(e)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "transport error: {:?}", e),
            Error::TransportTimeout => write!(f, "transport timeout"),
            Error::Protocol(e) => write!(f, "{}", e),
            Error::Batch(e) => write!(f, "{}", e),
        }
    }
}

impl<E: core::fmt::Debug> std::error::Error for Error<E> {}

/// Parse a TWI address, hex with `0x` prefix or decimal
pub fn parse_address(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u8::from_str_radix(h, 16),
        None => s.parse(),
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// TWI address of the bridge
    #[cfg_attr(feature = "structopt", structopt(long, default_value="0x78", parse(try_from_str = parse_address)))]
    pub address: u8,

    /// Minimum number of bytes to read per transaction
    #[cfg_attr(feature = "structopt", structopt(long, default_value="73"))]
    pub min_read: usize,

    /// Verify the CRC8 of received packets
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub verify_crc: bool,

    /// Maximum automatic polls while draining the queue (unbounded if unset)
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub drain_limit: Option<u32>,

    /// Fail transactions taking longer than this
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub read_timeout_ms: Option<u32>,

    /// Reset the bridge on connection
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub reset: bool,

    /// Period to wait after a reset before polling
    #[cfg_attr(feature = "structopt", structopt(long, default_value="100"))]
    pub reset_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            min_read: MIN_READ_LEN,
            verify_crc: false,
            drain_limit: None,
            read_timeout_ms: None,
            reset: false,
            reset_delay_ms: 100,
        }
    }
}

impl Options {
    pub fn read_timeout(&self) -> Option<std::time::Duration> {
        self.read_timeout_ms
            .map(|ms| std::time::Duration::from_millis(ms as u64))
    }
}

/// One transport round trip and everything decoded from it
#[derive(Clone, PartialEq, Debug)]
pub struct Exchange {
    /// Bytes written, empty for a read-only poll
    pub sent: Vec<u8>,
    /// Raw read buffer
    pub received: Vec<u8>,
    pub packets: Vec<Packet>,
    /// Decoding stopped here, packets before it are kept
    pub error: Option<ProtocolError>,
}

impl Exchange {
    /// Queue length reported in this exchange, 0 when not reported
    pub fn queue(&self) -> u8 {
        self.packets
            .iter()
            .filter_map(|p| p.queue())
            .last()
            .unwrap_or(0)
    }
}

fn escape(data: &[u8]) -> String {
    data.iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect()
}

impl core::fmt::Display for Exchange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut lines = Vec::new();

        if !self.sent.is_empty() {
            lines.push(format!("> {}", hex::encode(&self.sent)));
        }

        for p in &self.packets {
            lines.push(format!("< {}", hex::encode(p.bytes())));

            let info = match p.queue() {
                Some(q) => format!("queue: {}", q),
                None => format!("({})", escape(&p.data)),
            };
            lines.push(format!("{} {} {}", p.kind(), hex::encode(&p.data), info));
        }

        if let Some(e) = &self.error {
            lines.push(format!("! {}", e));
        }

        write!(f, "{}", lines.join("\n"))
    }
}

/// Output produced while executing a line
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    Exchange(Exchange),
    Sleep(u32),
}

impl core::fmt::Display for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Event::Exchange(x) => write!(f, "{}", x),
            Event::Sleep(ms) => write!(f, "S {}ms", ms),
        }
    }
}

pub struct Session<T, D, E> {
    state: State,
    options: Options,
    transport: T,
    delay: D,
    queue: u8,
    _err: PhantomData<E>,
}

impl<T, D, E> Session<T, D, E>
where
    T: Transport<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new session owning the transport
    pub fn new(transport: T, delay: D, options: Options) -> Self {
        Self {
            state: State::Idle,
            options,
            transport,
            delay,
            queue: 0,
            _err: PhantomData,
        }
    }

    /// Fetch the session state
    pub fn state(&self) -> State {
        self.state
    }

    /// Last queue length reported by the bridge
    pub fn queue(&self) -> u8 {
        self.queue
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Release the transport and delay
    pub fn free(self) -> (T, D) {
        (self.transport, self.delay)
    }

    /// Prepare the bridge for use
    pub fn init<F: FnMut(Event)>(&mut self, on_event: F) -> Result<(), Error<E>> {
        if self.options.reset {
            debug!("Resetting bridge");

            if !self.reset(on_event)? {
                warn!("No greeting received after reset");
            }
        }

        Ok(())
    }

    /// Reset the bridge and wait for its greeting.
    ///
    /// Returns whether the greeting was seen.
    pub fn reset<F: FnMut(Event)>(&mut self, mut on_event: F) -> Result<bool, Error<E>> {
        let x = self.exchange(&Command::request(Request::Reset))?;
        on_event(Event::Exchange(x));

        self.delay.delay_ms(self.options.reset_delay_ms);

        for _ in 0..RESET_POLLS {
            let x = self.poll()?;
            let greeted = x.packets.iter().any(|p| p.is_greeting());
            on_event(Event::Exchange(x));

            if greeted {
                info!("Bridge greeting received");
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Send a command and decode the response
    pub fn exchange(&mut self, command: &Command) -> Result<Exchange, Error<E>> {
        // Encoding errors must surface before touching the bus
        let out = command.encode()?;
        self.transact(out)
    }

    /// Read whatever the bridge has queued without sending anything
    pub fn poll(&mut self) -> Result<Exchange, Error<E>> {
        self.transact(Vec::new())
    }

    fn transact(&mut self, out: Vec<u8>) -> Result<Exchange, Error<E>> {
        self.state = State::Sending;

        let max_read = read_len(out.len(), self.options.min_read);
        let received = match self.transport.write_then_read(&out, max_read) {
            Ok(r) => r,
            Err(e) => {
                self.state = State::Idle;
                return Err(e.into());
            }
        };

        let mut packets = Vec::new();
        let mut error = None;

        for p in decode(&received).verify_crc(self.options.verify_crc) {
            match p {
                Ok(p) => {
                    debug!("Received {} packet: {:02x?}", p.kind(), p.data);
                    packets.push(p);
                }
                Err(e) => {
                    warn!("Decode error: {}", e);
                    error = Some(e);
                }
            }
        }

        let x = Exchange {
            sent: out,
            received,
            packets,
            error,
        };

        self.queue = x.queue();
        self.state = State::Idle;

        Ok(x)
    }

    /// Execute a single token, draining the queue after a status poll
    pub fn execute<F>(&mut self, token: &Token, mut on_event: F) -> Result<(), Error<E>>
    where
        F: FnMut(Event),
    {
        let command = match token {
            Token::Sleep(ms) => {
                on_event(Event::Sleep(*ms));
                self.delay.delay_ms(*ms);
                return Ok(());
            }
            Token::Send(c) => c,
        };

        let x = self.exchange(command)?;
        let error = x.error.clone();
        on_event(Event::Exchange(x));

        if let Some(e) = error {
            return Err(e.into());
        }

        if !command.is_status_poll() {
            return Ok(());
        }

        let mut polls = 0;

        while self.queue > 0 {
            if let Some(limit) = self.options.drain_limit {
                if polls >= limit {
                    warn!("Drain limit reached with {} queued", self.queue);
                    break;
                }
            }

            self.state = State::Draining;
            debug!("Draining queue: {}", self.queue);

            let x = match self.poll() {
                Ok(x) => x,
                Err(e) => {
                    self.state = State::Idle;
                    return Err(e);
                }
            };
            polls += 1;

            let error = x.error.clone();
            on_event(Event::Exchange(x));

            if let Some(e) = error {
                self.state = State::Idle;
                return Err(e.into());
            }
        }

        self.state = State::Idle;

        Ok(())
    }

    /// Parse and execute a line, stopping at the first error
    pub fn run_line<F>(&mut self, line: &str, mut on_event: F) -> Result<(), Error<E>>
    where
        F: FnMut(Event),
    {
        let tokens = parse_line(line)?;

        for t in &tokens {
            if let Err(e) = self.execute(t, &mut on_event) {
                self.state = State::Idle;
                return Err(e);
            }
        }

        Ok(())
    }
}
