//! Readiness-based I/O multiplexing.
//!
//! A [`Selector`] owns a `mio` poll instance and every connection registered
//! with it. Readiness is edge-triggered, so a readable connection is drained
//! until the kernel reports `WouldBlock`; whatever the drain collected is
//! published to the connection's output buffer as one frame.
use std::{
    collections::HashMap,
    io::{self, Read},
    net::{Shutdown, SocketAddr},
    sync::Arc,
    time::Duration,
};

use log::{debug, trace};
use mio::{
    Events, Interest, Poll, Token, Waker,
    net::{TcpListener, TcpStream},
};

use super::{
    buffer::{ConnectionBuffer, Direction, SharedBuffer},
    lock,
    transport::{WRITE_STALL_LIMIT, write_frame_within},
};

pub const LISTENER: Token = Token(0);
pub const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

const EVENTS_CAPACITY: usize = 128;
const READ_CHUNK: usize = 1024;

/// What a readiness event asks of the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Accept,
    Wake,
    Read(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The connection stays registered.
    Open,
    /// The connection was unregistered and closed.
    Closed,
}

/// How a drain pass ended.
#[derive(Debug)]
enum DrainEnd {
    WouldBlock,
    Eof,
    Failed(io::Error),
}

struct Drain {
    data: Vec<u8>,
    end: DrainEnd,
}

fn drain<R: Read>(stream: &mut R) -> Drain {
    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    let end = loop {
        match stream.read(&mut chunk) {
            Ok(0) => break DrainEnd::Eof,
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break DrainEnd::WouldBlock,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break DrainEnd::Failed(e),
        }
    };

    Drain { data, end }
}

struct Connection {
    stream: TcpStream,
    buffer: SharedBuffer,
}

pub struct Selector {
    poll: Poll,
    events: Events,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    write_stall: Duration,
    log_target: String,
}

impl Selector {
    /// Creates a selector that logs under its owner's `log_target`.
    pub fn new(log_target: impl Into<String>) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION,
            write_stall: WRITE_STALL_LIMIT,
            log_target: log_target.into(),
        })
    }

    /// Bounds how long [`Selector::write`] waits on a peer that stopped
    /// reading.
    pub fn with_write_stall(mut self, stall: Duration) -> Self {
        self.write_stall = stall;
        self
    }

    /// Creates the waker that interrupts a pending [`Selector::select`].
    pub fn waker(&self) -> io::Result<Arc<Waker>> {
        Ok(Arc::new(Waker::new(self.poll.registry(), WAKER)?))
    }

    pub fn register_listener(&mut self, listener: &mut TcpListener) -> io::Result<()> {
        self.poll
            .registry()
            .register(listener, LISTENER, Interest::READABLE)
    }

    pub fn unregister_listener(&mut self, listener: &mut TcpListener) -> io::Result<()> {
        self.poll.registry().deregister(listener)
    }

    /// Registers a connection for read readiness and gives it a fresh buffer.
    pub fn register(&mut self, mut stream: TcpStream, address: SocketAddr) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)?;
        self.next_token += 1;

        self.connections.insert(
            token,
            Connection {
                stream,
                buffer: ConnectionBuffer::shared(address),
            },
        );
        Ok(token)
    }

    /// Unregisters and closes a connection. Returns false when the token was
    /// not registered.
    pub fn unregister(&mut self, token: Token) -> bool {
        let Some(mut connection) = self.connections.remove(&token) else {
            return false;
        };
        if let Err(e) = self.poll.registry().deregister(&mut connection.stream) {
            debug!(target: self.log_target.as_str(), "failed to deregister {token:?}: {e}");
        }
        if let Err(e) = connection.stream.shutdown(Shutdown::Both) {
            debug!(target: self.log_target.as_str(), "{token:?} already closed: {e}");
        }
        true
    }

    pub fn buffer(&self, token: Token) -> Option<SharedBuffer> {
        self.connections
            .get(&token)
            .map(|connection| Arc::clone(&connection.buffer))
    }

    pub fn address(&self, token: Token) -> Option<SocketAddr> {
        self.connections
            .get(&token)
            .map(|connection| lock(&connection.buffer).address())
    }

    pub fn contains(&self, token: Token) -> bool {
        self.connections.contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Blocks until something is ready or `timeout` elapses.
    pub fn select(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }

        Ok(self
            .events
            .iter()
            .map(|event| match event.token() {
                token if token == LISTENER => Readiness::Accept,
                token if token == WAKER => Readiness::Wake,
                token => Readiness::Read(token),
            })
            .collect())
    }

    /// Drains a readable connection into its output buffer.
    ///
    /// `WouldBlock` ends the pass and keeps the connection. End of stream or
    /// a read failure closes it, unless the output buffer is upheld: a
    /// consumer holding data expects empty passes and keeps the connection.
    pub fn read(&mut self, token: Token) -> ReadOutcome {
        let Some(connection) = self.connections.get_mut(&token) else {
            return ReadOutcome::Closed;
        };

        let Drain { data, end } = drain(&mut connection.stream);
        let upheld = {
            let mut buffer = lock(&connection.buffer);
            trace!(target: self.log_target.as_str(), "drained {} bytes into {buffer}", data.len());
            if !data.is_empty() {
                if let Err(e) = buffer.set(Direction::Output, data) {
                    debug!(
                        target: self.log_target.as_str(),
                        "dropping frame from {}: {e}",
                        buffer.address()
                    );
                }
            }
            buffer.is_upheld(Direction::Output)
        };

        match end {
            DrainEnd::WouldBlock => ReadOutcome::Open,
            _ if upheld => ReadOutcome::Open,
            DrainEnd::Eof => {
                self.unregister(token);
                ReadOutcome::Closed
            }
            DrainEnd::Failed(e) => {
                debug!(target: self.log_target.as_str(), "read on {token:?} failed: {e}");
                self.unregister(token);
                ReadOutcome::Closed
            }
        }
    }

    /// Stages `frame` in the connection's input buffer and writes it out.
    /// A peer that does not drain its socket within the write stall fails
    /// the write with `TimedOut`.
    pub fn write(&mut self, token: Token, frame: &[u8]) -> io::Result<usize> {
        let connection = self
            .connections
            .get_mut(&token)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        lock(&connection.buffer)
            .set(Direction::Input, frame)
            .map_err(io::Error::other)?;
        let written = write_frame_within(&mut connection.stream, frame, self.write_stall);
        lock(&connection.buffer).reset(Direction::Input);
        written
    }

    /// Unregisters and closes every connection.
    pub fn close(&mut self) -> usize {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in &tokens {
            self.unregister(*token);
        }
        tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        net::{Shutdown, TcpListener as StdListener, TcpStream as StdStream},
        time::Instant,
    };

    use super::*;

    fn pair(selector: &mut Selector) -> (Token, StdStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let peer = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, address) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let token = selector
            .register(TcpStream::from_std(accepted), address)
            .unwrap();
        (token, peer)
    }

    fn wait_readable(selector: &mut Selector, token: Token) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let ready = selector.select(Some(Duration::from_millis(100))).unwrap();
            if ready.contains(&Readiness::Read(token)) {
                return;
            }
        }
        panic!("{token:?} never became readable");
    }

    #[test]
    fn drain_stops_on_would_block() {
        struct Once(Option<Vec<u8>>);
        impl Read for Once {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.take() {
                    Some(data) => {
                        buf[..data.len()].copy_from_slice(&data);
                        Ok(data.len())
                    }
                    None => Err(io::ErrorKind::WouldBlock.into()),
                }
            }
        }

        let Drain { data, end } = drain(&mut Once(Some(b"abc".to_vec())));
        assert_eq!(data, b"abc");
        assert!(matches!(end, DrainEnd::WouldBlock));
    }

    #[test]
    fn drain_collects_more_than_one_chunk() {
        let payload = vec![7u8; READ_CHUNK * 3 + 5];
        let Drain { data, end } = drain(&mut &payload[..]);

        assert_eq!(data, payload);
        assert!(matches!(end, DrainEnd::Eof));
    }

    #[test]
    fn read_publishes_frame_and_keeps_connection() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (token, mut peer) = pair(&mut selector);

        peer.write_all(b"eyJib2R5IjoxfQ==").unwrap();
        wait_readable(&mut selector, token);

        assert_eq!(selector.read(token), ReadOutcome::Open);
        let buffer = selector.buffer(token).unwrap();
        assert_eq!(lock(&buffer).output(), b"eyJib2R5IjoxfQ==");
        assert!(selector.contains(token));
    }

    #[test]
    fn read_closes_on_peer_shutdown() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (token, peer) = pair(&mut selector);

        peer.shutdown(Shutdown::Both).unwrap();
        wait_readable(&mut selector, token);

        assert_eq!(selector.read(token), ReadOutcome::Closed);
        assert!(selector.is_empty());
        assert_eq!(selector.read(token), ReadOutcome::Closed);
    }

    #[test]
    fn last_frame_before_eof_is_published() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (token, mut peer) = pair(&mut selector);
        let buffer = selector.buffer(token).unwrap();

        peer.write_all(b"bGFzdA==").unwrap();
        peer.shutdown(Shutdown::Write).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            wait_readable(&mut selector, token);
            if selector.read(token) == ReadOutcome::Closed {
                break;
            }
            assert!(Instant::now() < deadline, "{token:?} never closed");
        }

        assert!(!selector.contains(token));
        assert_eq!(lock(&buffer).take(Direction::Output), Some(b"bGFzdA==".to_vec()));
    }

    #[test]
    fn upheld_output_keeps_closed_peer() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (token, peer) = pair(&mut selector);
        lock(&selector.buffer(token).unwrap()).uphold(Direction::Output);

        peer.shutdown(Shutdown::Both).unwrap();
        wait_readable(&mut selector, token);

        assert_eq!(selector.read(token), ReadOutcome::Open);
        assert!(selector.contains(token));
    }

    #[test]
    fn write_reaches_peer_and_resets_input() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (token, mut peer) = pair(&mut selector);

        assert_eq!(selector.write(token, b"aGk=").unwrap(), 4);
        assert!(lock(&selector.buffer(token).unwrap()).input().is_empty());

        let mut received = [0u8; 4];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"aGk=");
    }

    #[test]
    fn write_refused_while_input_upheld() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (token, _peer) = pair(&mut selector);
        lock(&selector.buffer(token).unwrap()).uphold(Direction::Input);

        assert!(selector.write(token, b"aGk=").is_err());
    }

    #[test]
    fn waker_interrupts_select() {
        let mut selector = Selector::new("pong::test").unwrap();
        let waker = selector.waker().unwrap();
        waker.wake().unwrap();

        let ready = selector.select(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(ready, vec![Readiness::Wake]);
    }

    #[test]
    fn close_unregisters_everything() {
        let mut selector = Selector::new("pong::test").unwrap();
        let (_a, _peer_a) = pair(&mut selector);
        let (_b, _peer_b) = pair(&mut selector);

        assert_eq!(selector.len(), 2);
        assert_eq!(selector.close(), 2);
        assert!(selector.is_empty());
    }
}
