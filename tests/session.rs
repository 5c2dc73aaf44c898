use std::collections::VecDeque;

use embedded_hal::blocking::delay::DelayMs;

use mdb_twi_shell::packet::MAX_PAYLOAD;
use mdb_twi_shell::{
    Command, Error, Event, HeaderKind, Options, ProtocolError, Session, State, Token, Transport,
    TransportError,
};

#[derive(Debug, Clone, PartialEq)]
struct BusFault;

/// Replays scripted read buffers and records every transaction
#[derive(Default)]
struct MockTransport {
    responses: VecDeque<Result<Vec<u8>, TransportError<BusFault>>>,
    sent: Vec<(Vec<u8>, usize)>,
}

impl MockTransport {
    fn new(responses: &[&[u8]]) -> Self {
        Self {
            responses: responses.iter().map(|r| Ok(r.to_vec())).collect(),
            sent: Vec::new(),
        }
    }

    fn push_err(&mut self, e: TransportError<BusFault>) {
        self.responses.push_back(Err(e));
    }
}

impl Transport<BusFault> for MockTransport {
    fn write_then_read(
        &mut self,
        out: &[u8],
        max_read: usize,
    ) -> Result<Vec<u8>, TransportError<BusFault>> {
        self.sent.push((out.to_vec(), max_read));

        // An idle bridge pads with zeros
        let r = self
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(vec![0x00]))?;

        let mut buff = vec![0x00; max_read];
        buff[..r.len()].copy_from_slice(&r);
        Ok(buff)
    }
}

#[derive(Default)]
struct MockDelay {
    calls: Vec<u32>,
}

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls.push(ms);
    }
}

type MockSession = Session<MockTransport, MockDelay, BusFault>;

fn session(t: MockTransport, options: Options) -> MockSession {
    Session::new(t, MockDelay::default(), options)
}

fn run(s: &mut MockSession, line: &str) -> (Result<(), Error<BusFault>>, Vec<Event>) {
    let mut events = Vec::new();
    let r = s.run_line(line, |e| events.push(e));
    (r, events)
}

const OK_QUEUE_2: &[u8] = &[0x04, 0x01, 0x02, 0x8b];
const OK_QUEUE_1: &[u8] = &[0x04, 0x01, 0x01, 0xad];
const OK_QUEUE_0: &[u8] = &[0x04, 0x01, 0x00, 0x3e];
const MDB_STARTED: &[u8] = &[0x03, 0x08, 0x3a];
const GREETING: &[u8] = &[0x06, 0x04, 0xbe, 0xeb, 0xee, 0x65];

#[test]
fn status_poll_drains_queue() {
    let t = MockTransport::new(&[OK_QUEUE_2, OK_QUEUE_1, OK_QUEUE_0]);
    let mut s = session(t, Options::default());

    let (r, events) = run(&mut s, "");
    assert_eq!(r, Ok(()));
    assert_eq!(events.len(), 3);
    assert_eq!(s.state(), State::Idle);
    assert_eq!(s.queue(), 0);

    match &events[0] {
        Event::Exchange(x) => {
            assert_eq!(x.sent, vec![0x03, 0x01, 0xc8]);
            assert_eq!(x.packets.len(), 1);
            assert_eq!(x.packets[0].kind(), HeaderKind::Ok);
            assert_eq!(x.packets[0].data, vec![0x02]);
            assert_eq!(x.queue(), 2);
        }
        e => panic!("unexpected event {:?}", e),
    }

    let (t, _) = s.free();
    assert_eq!(
        t.sent,
        vec![
            (vec![0x03, 0x01, 0xc8], 73),
            (vec![], 73),
            (vec![], 73),
        ]
    );
}

#[test]
fn explicit_poll_token_also_drains() {
    let t = MockTransport::new(&[OK_QUEUE_1, OK_QUEUE_0]);
    let mut s = session(t, Options::default());

    let (r, events) = run(&mut s, "01");
    assert_eq!(r, Ok(()));
    assert_eq!(events.len(), 2);
}

#[test]
fn other_commands_do_not_drain() {
    let t = MockTransport::new(&[OK_QUEUE_2, OK_QUEUE_2]);
    let mut s = session(t, Options::default());

    let (r, events) = run(&mut s, "04 !03013b");
    assert_eq!(r, Ok(()));
    assert_eq!(events.len(), 2);
    assert_eq!(s.queue(), 2);
    assert_eq!(s.state(), State::Idle);

    let (t, _) = s.free();
    assert_eq!(t.sent[0].0, vec![0x03, 0x04, 0xa2]);
    assert_eq!(t.sent[1].0, vec![0x03, 0x01, 0x3b]);
}

#[test]
fn raw_command_sent_verbatim() {
    let t = MockTransport::new(&[MDB_STARTED]);
    let mut s = session(t, Options::default());

    let (r, _) = run(&mut s, "!0fcb");
    assert_eq!(r, Ok(()));

    let (t, _) = s.free();
    assert_eq!(t.sent, vec![(vec![0x0f, 0xcb], 73)]);
}

#[test]
fn sleep_uses_delay_only() {
    let mut s = session(MockTransport::default(), Options::default());

    let (r, events) = run(&mut s, "s100 s5");
    assert_eq!(r, Ok(()));
    assert_eq!(events, vec![Event::Sleep(100), Event::Sleep(5)]);

    let (t, d) = s.free();
    assert!(t.sent.is_empty());
    assert_eq!(d.calls, vec![100, 5]);
}

#[test]
fn multiple_packets_in_one_read() {
    let mut buff = MDB_STARTED.to_vec();
    buff.extend_from_slice(GREETING);
    buff.push(0xff);

    let t = MockTransport::new(&[&buff[..]]);
    let mut s = session(t, Options::default());

    let (r, events) = run(&mut s, "0fcb");
    assert_eq!(r, Ok(()));

    match &events[0] {
        Event::Exchange(x) => {
            assert_eq!(x.packets.len(), 2);
            assert_eq!(x.packets[0].kind(), HeaderKind::MdbStarted);
            assert!(x.packets[1].is_greeting());
        }
        e => panic!("unexpected event {:?}", e),
    }
}

#[test]
fn oversize_payload_rejected_before_io() {
    let mut s = session(MockTransport::default(), Options::default());

    let line = "ab".repeat(MAX_PAYLOAD + 1);
    let (r, events) = run(&mut s, &line);

    assert_eq!(
        r,
        Err(Error::Protocol(ProtocolError::PayloadTooLarge(MAX_PAYLOAD + 1)))
    );
    assert!(events.is_empty());

    let (t, _) = s.free();
    assert!(t.sent.is_empty());
}

#[test]
fn large_output_reads_at_least_as_much() {
    let mut s = session(MockTransport::default(), Options::default());

    let line = format!("!{}", "00".repeat(100));
    let (r, _) = run(&mut s, &line);
    assert_eq!(r, Ok(()));

    let (t, _) = s.free();
    assert_eq!(t.sent[0].1, 100);
}

#[test]
fn transport_error_keeps_session_alive() {
    let mut t = MockTransport::default();
    t.push_err(TransportError::Bus(BusFault));
    t.push_err(TransportError::Timeout);
    t.responses.push_back(Ok(OK_QUEUE_0.to_vec()));

    let mut s = session(t, Options::default());

    let (r, events) = run(&mut s, "04 04");
    assert_eq!(r, Err(Error::Transport(BusFault)));
    assert!(events.is_empty());
    assert_eq!(s.state(), State::Idle);

    let (r, _) = run(&mut s, "04");
    assert_eq!(r, Err(Error::TransportTimeout));

    let (r, events) = run(&mut s, "");
    assert_eq!(r, Ok(()));
    assert_eq!(events.len(), 1);

    // First line aborted after its first token
    let (t, _) = s.free();
    assert_eq!(t.sent.len(), 3);
}

#[test]
fn truncated_packet_reported_after_output() {
    let mut buff = MDB_STARTED.to_vec();
    buff.extend_from_slice(&[0x05, 0x01]);
    let t = MockTransport::new(&[&buff[..]]);
    let mut s = session(t, Options {
        min_read: 5,
        ..Default::default()
    });

    let (r, events) = run(&mut s, "04 04");
    assert_eq!(
        r,
        Err(Error::Protocol(ProtocolError::TruncatedPacket {
            offset: 3,
            length: 5,
            available: 2
        }))
    );

    // The good packet is still shown
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Exchange(x) => assert_eq!(x.packets.len(), 1),
        e => panic!("unexpected event {:?}", e),
    }
    assert_eq!(
        events[0].to_string(),
        "> 0304a2\n< 03083a\nMDB-started  ()\n! truncated packet at offset 3: length 5, 2 bytes available"
    );
    assert_eq!(s.state(), State::Idle);
}

#[test]
fn crc_verification_option() {
    let bad: &[u8] = &[0x04, 0x01, 0x00, 0x00];

    let mut s = session(MockTransport::new(&[bad]), Options::default());
    assert_eq!(run(&mut s, "04").0, Ok(()));

    let opts = Options {
        verify_crc: true,
        ..Default::default()
    };
    let mut s = session(MockTransport::new(&[bad]), opts);
    assert_eq!(
        run(&mut s, "04").0,
        Err(Error::Protocol(ProtocolError::CrcMismatch {
            expected: 0x3e,
            actual: 0x00
        }))
    );
}

#[test]
fn drain_limit_stops_spinning() {
    let t = MockTransport::new(&[OK_QUEUE_1, OK_QUEUE_1, OK_QUEUE_1, OK_QUEUE_1]);
    let opts = Options {
        drain_limit: Some(2),
        ..Default::default()
    };
    let mut s = session(t, opts);

    let (r, events) = run(&mut s, "");
    assert_eq!(r, Ok(()));
    assert_eq!(events.len(), 3);
    assert_eq!(s.queue(), 1);
    assert_eq!(s.state(), State::Idle);
}

#[test]
fn bad_token_sends_nothing() {
    let mut s = session(MockTransport::default(), Options::default());

    let (r, events) = run(&mut s, "01 bogus");
    assert!(matches!(r, Err(Error::Batch(_))));
    assert!(events.is_empty());

    let (t, _) = s.free();
    assert!(t.sent.is_empty());
}

#[test]
fn reset_waits_for_greeting() {
    let t = MockTransport::new(&[OK_QUEUE_0, OK_QUEUE_1, GREETING]);
    let opts = Options {
        reset_delay_ms: 50,
        ..Default::default()
    };
    let mut s = session(t, opts);

    let mut events = Vec::new();
    assert_eq!(s.reset(|e| events.push(e)), Ok(true));
    assert_eq!(events.len(), 3);

    let (t, d) = s.free();
    assert_eq!(t.sent[0].0, vec![0x03, 0x03, 0x7d]);
    assert!(t.sent[1].0.is_empty());
    assert_eq!(d.calls, vec![50]);
}

#[test]
fn reset_without_greeting() {
    let mut s = session(MockTransport::default(), Options::default());
    assert_eq!(s.reset(|_| ()), Ok(false));

    let (t, _) = s.free();
    assert_eq!(t.sent.len(), 1 + mdb_twi_shell::RESET_POLLS);
}

#[test]
fn init_only_resets_when_asked() {
    let mut s = session(MockTransport::default(), Options::default());
    assert_eq!(s.init(|_| ()), Ok(()));
    assert!(s.free().0.sent.is_empty());

    let opts = Options {
        reset: true,
        ..Default::default()
    };
    let mut s = session(MockTransport::new(&[OK_QUEUE_0, GREETING]), opts);
    assert_eq!(s.init(|_| ()), Ok(()));
    assert_eq!(s.free().0.sent.len(), 2);
}

#[test]
fn exchange_output_format() {
    let mut buff = OK_QUEUE_2.to_vec();
    buff.extend_from_slice(&[0x05, 0x04, 0x68, 0x69, 0xd4]);
    let t = MockTransport::new(&[&buff[..], OK_QUEUE_0]);
    let mut s = session(t, Options::default());

    let (r, events) = run(&mut s, "");
    assert_eq!(r, Ok(()));

    assert_eq!(
        events[0].to_string(),
        "> 0301c8\n< 0401028b\nOK 02 queue: 2\n< 05046869d4\nDebug 6869 (hi)"
    );
    assert_eq!(events[1].to_string(), "< 0401003e\nOK 00 queue: 0");
    assert_eq!(Event::Sleep(30).to_string(), "S 30ms");
}

#[test]
fn execute_single_token() {
    let t = MockTransport::new(&[OK_QUEUE_0]);
    let mut s = session(t, Options::default());

    let mut n = 0;
    let r = s.execute(&Token::Send(Command::status_poll()), |_| n += 1);
    assert_eq!(r, Ok(()));
    assert_eq!(n, 1);
}
