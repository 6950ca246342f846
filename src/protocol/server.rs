use std::{
    fmt,
    io::ErrorKind,
    net::{Shutdown, SocketAddr},
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
    thread,
};

use log::{debug, error, info, warn};
use mio::{
    Token,
    net::{TcpListener, TcpStream},
};

use crate::{
    config::ServerConfig,
    diagnostics::{self, Fault},
};

use super::{
    Message,
    buffer::Direction,
    lock,
    selector::{ReadOutcome, Readiness, Selector},
    status::{Status, transform_error},
    thread::{CancelToken, Worker},
    transport::{TransportError, is_disconnect, write_frame_within},
};

const REJECT_MESSAGE: &str = "Server is full";
const INVALID_MESSAGE: &str = "Invalid message data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No socket bound yet.
    Unbound,
    /// Listening, loop not started.
    Bound,
    Running,
    /// The loop has exited. Terminal.
    Closed,
}

/// A client accepted into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub token: Token,
    pub address: SocketAddr,
}

/// Ordered set of accepted clients.
///
/// Only the serving loop mutates it; other threads read snapshots.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    peers: Arc<Mutex<Vec<Peer>>>,
}

impl Registry {
    pub fn len(&self) -> usize {
        lock(&self.peers).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.peers).is_empty()
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        lock(&self.peers).clone()
    }

    pub fn get(&self, token: Token) -> Option<Peer> {
        lock(&self.peers).iter().find(|p| p.token == token).copied()
    }

    fn push(&self, peer: Peer) {
        lock(&self.peers).push(peer);
    }

    fn remove(&self, token: Token) -> Option<Peer> {
        let mut peers = lock(&self.peers);
        let index = peers.iter().position(|p| p.token == token)?;
        Some(peers.remove(index))
    }

    fn drain(&self) -> Vec<Peer> {
        lock(&self.peers).drain(..).collect()
    }
}

struct Core {
    listener: TcpListener,
    selector: Selector,
}

/// Relay server: every valid envelope a client sends is forwarded to every
/// registered client, the sender included.
pub struct Server {
    config: ServerConfig,
    state: Arc<Mutex<ServerState>>,
    registry: Registry,
    cancel: CancelToken,
    core: Option<Core>,
    local_addr: Option<SocketAddr>,
    worker: Option<Worker>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ServerState::Unbound)),
            registry: Registry::default(),
            cancel: CancelToken::new(),
            core: None,
            local_addr: None,
            worker: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn target(&self) -> &str {
        &self.config.log_target
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.state)
    }

    pub fn running(&self) -> bool {
        self.state() == ServerState::Running
    }

    pub fn closed(&self) -> bool {
        self.state() == ServerState::Closed
    }

    /// Address actually bound, available after [`Server::setup`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connections(&self) -> usize {
        self.registry.len()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.registry.snapshot()
    }

    /// Token that stops the serving loop, wherever it runs.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Binds and listens on the configured address.
    pub fn setup(&mut self) -> Result<(), TransportError> {
        match self.state() {
            ServerState::Unbound => {}
            ServerState::Closed => {
                return Err(TransportError::State(
                    "the server is closed and cannot be bound again".to_string(),
                ));
            }
            ServerState::Bound | ServerState::Running => {
                return Err(TransportError::State(
                    "the server has already been bound".to_string(),
                ));
            }
        }

        let mut listener = TcpListener::bind(self.config.address)?;
        let mut selector = Selector::new(self.config.log_target.as_str())?
            .with_write_stall(self.config.write_stall);
        selector.register_listener(&mut listener)?;
        if !self.cancel.attach(selector.waker()?) {
            debug!(target: self.target(), "cancel handle already wakes another selector");
        }

        let local_addr = listener.local_addr()?;
        info!(target: self.target(), "listening at {local_addr}");

        self.local_addr = Some(local_addr);
        self.core = Some(Core { listener, selector });
        *lock(&self.state) = ServerState::Bound;
        Ok(())
    }

    fn prepare(&mut self) -> Result<ServeLoop, TransportError> {
        match self.state() {
            ServerState::Closed => {
                return Err(TransportError::State(
                    "cannot re-run server, it has run before".to_string(),
                ));
            }
            ServerState::Running => {
                return Err(TransportError::State(
                    "the server is already running".to_string(),
                ));
            }
            ServerState::Unbound => self.setup()?,
            ServerState::Bound => {}
        }

        let core = self
            .core
            .take()
            .ok_or_else(|| TransportError::State("the server has no bound socket".to_string()))?;
        *lock(&self.state) = ServerState::Running;

        Ok(ServeLoop {
            core,
            config: self.config.clone(),
            registry: self.registry.clone(),
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
        })
    }

    /// Serves on the calling thread until cancelled or faulted.
    pub fn run(&mut self) -> Result<(), TransportError> {
        self.prepare()?.run();
        Ok(())
    }

    /// Serves on a background worker.
    pub fn run_in_background(&mut self) -> Result<(), TransportError> {
        let serve = self.prepare()?;
        let state = Arc::clone(&self.state);

        let worker = Worker::spawn(
            "pong-server",
            self.target(),
            self.cancel.clone(),
            move |_| serve.run(),
        );
        match worker {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                *lock(&state) = ServerState::Closed;
                Err(e.into())
            }
        }
    }

    /// Stops the background worker and waits for it. The loop closes every
    /// client connection on its way out.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };

        info!(
            target: self.target(),
            "stop requested, closing server thread"
        );
        if !worker.stop() {
            warn!(target: self.target(), "server thread panicked");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.local_addr.unwrap_or(self.config.address);
        write!(
            f,
            "<Server {}/{} at {} {:?}>",
            self.connections(),
            self.config.capacity,
            address,
            self.state()
        )
    }
}

/// Runs `body`, turning an error or a panic into a [`Fault`].
fn guarded<F>(body: F) -> Option<Fault>
where
    F: FnOnce() -> Result<(), TransportError>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(Fault::from_error(&e)),
        Err(payload) => Some(Fault::from_panic(payload)),
    }
}

/// State moved onto the thread that serves.
struct ServeLoop {
    core: Core,
    config: ServerConfig,
    registry: Registry,
    state: Arc<Mutex<ServerState>>,
    cancel: CancelToken,
}

impl ServeLoop {
    fn target(&self) -> &str {
        &self.config.log_target
    }

    fn run(mut self) {
        if let Some(fault) = guarded(|| self.serve()) {
            self.report(&fault);
        }

        self.shutdown();
        *lock(&self.state) = ServerState::Closed;
        info!(target: self.target(), "finished server instance");
    }

    fn serve(&mut self) -> Result<(), TransportError> {
        while !self.cancel.is_cancelled() {
            let ready = self.core.selector.select(Some(self.config.poll_timeout))?;
            for readiness in ready {
                match readiness {
                    Readiness::Accept => self.accept(),
                    Readiness::Wake => {}
                    Readiness::Read(token) => self.serve_client(token),
                }
            }
        }

        debug!(target: self.target(), "stop flag observed");
        Ok(())
    }

    fn report(&self, fault: &Fault) {
        let target = self.config.log_target.as_str();
        error!(target: target, "error occurred while serving: {}", fault.summary());

        match diagnostics::persist(&self.config.dump_dir, fault) {
            Ok(path) => info!(
                target: target,
                "traceback saved to {}, loop will be closed",
                path.display()
            ),
            Err(e) => error!(target: target, "failed to save traceback: {e}"),
        }
    }

    fn accept(&mut self) {
        loop {
            match self.core.listener.accept() {
                Ok((stream, address)) => self.admit(stream, address),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(target: self.target(), "failed to accept connection: {e}");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, address: SocketAddr) {
        if !self.config.has_room(self.registry.len()) {
            self.reject(stream, address);
            return;
        }

        match self.core.selector.register(stream, address) {
            Ok(token) => {
                self.registry.push(Peer { token, address });
                info!(target: self.target(), "connected at client {address}");
            }
            Err(e) => {
                warn!(target: self.target(), "failed to register client {address}: {e}")
            }
        }
    }

    fn reject(&self, mut stream: TcpStream, address: SocketAddr) {
        let target = self.config.log_target.as_str();
        match transform_error(REJECT_MESSAGE, Status::NoRoom) {
            Ok(frame) => {
                if let Err(e) = write_frame_within(&mut stream, &frame, self.config.write_stall) {
                    debug!(target: target, "could not tell {address} the room is full: {e}");
                }
            }
            Err(e) => warn!(target: target, "failed to build rejection: {e}"),
        }

        info!(
            target: target,
            "connection at client {address} aborted, only allows {} connected clients",
            self.config.capacity
        );
        thread::sleep(self.config.reject_grace);
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!(target: target, "rejected client {address} already closed: {e}");
        }
    }

    fn describe(&self, token: Token) -> String {
        match self.registry.get(token) {
            Some(peer) => peer.address.to_string(),
            None => format!("{token:?}"),
        }
    }

    fn serve_client(&mut self, token: Token) {
        let origin = self.describe(token);
        debug!(target: self.target(), "client {origin} attempts to read");

        // Held across the read: a closing pass unregisters the connection but
        // may still have published its last frame.
        let Some(buffer) = self.core.selector.buffer(token) else {
            return;
        };
        let closed = self.core.selector.read(token) == ReadOutcome::Closed;
        if closed && self.registry.remove(token).is_some() {
            info!(target: self.target(), "connection to client {origin} has been closed");
        }

        let Some(frame) = lock(&buffer).take(Direction::Output) else {
            return;
        };

        let mut message = Message::new(frame);
        if let Err(e) = message.envelope() {
            warn!(target: self.target(), "invalid message from {origin}: {e}");
            if !closed {
                self.reply(token, INVALID_MESSAGE, Status::BadRequest);
            }
            return;
        }

        self.broadcast(message.raw());
    }

    /// Sends an error envelope to one client only.
    fn reply(&mut self, token: Token, message: &str, status: Status) {
        let frame = match transform_error(message, status) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: self.target(), "failed to build {status} reply: {e}");
                return;
            }
        };
        self.send(token, &frame);
    }

    /// Forwards a validated frame, unchanged, to every registered client.
    fn broadcast(&mut self, frame: &[u8]) {
        for peer in self.registry.snapshot() {
            self.send(peer.token, frame);
        }
    }

    fn send(&mut self, token: Token, frame: &[u8]) {
        match self.core.selector.write(token, frame) {
            Ok(_) => {}
            Err(e) if is_disconnect(&e) => {
                info!(
                    target: self.target(),
                    "client {} went away during send, closing it",
                    self.describe(token)
                );
                self.teardown(token);
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                warn!(
                    target: self.target(),
                    "client {} stopped reading for {:?}, closing it",
                    self.describe(token),
                    self.config.write_stall
                );
                self.teardown(token);
            }
            Err(e) => warn!(
                target: self.target(),
                "failed to send to client {}: {e}",
                self.describe(token)
            ),
        }
    }

    fn teardown(&mut self, token: Token) {
        self.core.selector.unregister(token);
        self.registry.remove(token);
    }

    fn shutdown(&mut self) {
        let peers = self.registry.drain();
        for peer in &peers {
            self.core.selector.unregister(peer.token);
        }
        self.core.selector.close();

        if let Err(e) = self
            .core
            .selector
            .unregister_listener(&mut self.core.listener)
        {
            debug!(target: self.target(), "failed to deregister listener: {e}");
        }
        info!(
            target: self.target(),
            "closed {} client connections",
            peers.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        io::{Read, Write},
        net::TcpStream as StdStream,
        time::{Duration, Instant},
    };

    use serde_json::json;
    use tempdir::TempDir;

    use crate::{
        config::ClientConfig,
        diagnostics::DUMP_FILE,
        protocol::{Client, Decoded, Headers, decode, envelope::pack, encode},
    };

    use super::*;

    fn config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_poll_timeout(Duration::from_millis(50))
            .with_reject_grace(Duration::from_millis(20))
            .with_dump_dir(env::temp_dir().join("pong-test-dumps"))
    }

    fn serve(config: ServerConfig) -> Server {
        let mut server = Server::new(config);
        server.setup().unwrap();
        server.run_in_background().unwrap();
        server
    }

    fn client_config(server: &Server) -> ClientConfig {
        ClientConfig::new(server.local_addr().unwrap())
            .with_poll_interval(Duration::from_millis(10))
            .with_receive_timeout(Duration::from_secs(5))
    }

    fn connect(server: &Server) -> Client {
        let mut client = Client::connect(client_config(server)).unwrap();
        client.start().unwrap();
        client
    }

    fn wait_for_connections(server: &Server, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if server.connections() == expected {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!(
            "expected {expected} connections, server has {}",
            server.connections()
        );
    }

    fn read_envelope(stream: &mut StdStream) -> crate::protocol::Envelope {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        match decode(&buf[..n], true).unwrap() {
            Decoded::Envelope(envelope) => envelope,
            Decoded::Raw(_) => unreachable!("strict decode"),
        }
    }

    #[test]
    fn registry_keeps_order() {
        let registry = Registry::default();
        let address: SocketAddr = "127.0.0.1:1".parse().unwrap();
        for i in 2..5 {
            registry.push(Peer {
                token: Token(i),
                address,
            });
        }

        assert_eq!(registry.remove(Token(3)).map(|p| p.token), Some(Token(3)));
        assert_eq!(registry.remove(Token(3)), None);
        let tokens: Vec<_> = registry.snapshot().iter().map(|p| p.token).collect();
        assert_eq!(tokens, vec![Token(2), Token(4)]);
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn state_machine() {
        let mut server = Server::new(config());
        assert_eq!(server.state(), ServerState::Unbound);

        server.setup().unwrap();
        assert_eq!(server.state(), ServerState::Bound);
        assert!(matches!(server.setup(), Err(TransportError::State(_))));

        server.run_in_background().unwrap();
        assert!(server.running());
        assert!(matches!(
            server.run_in_background(),
            Err(TransportError::State(_))
        ));

        server.stop();
        assert!(server.closed());
        assert!(matches!(server.run(), Err(TransportError::State(_))));
        assert!(matches!(
            server.run_in_background(),
            Err(TransportError::State(_))
        ));
        assert!(matches!(server.setup(), Err(TransportError::State(_))));
    }

    #[test]
    fn run_binds_when_unbound() {
        let mut server = Server::new(config());
        server.run_in_background().unwrap();

        assert!(server.local_addr().is_some());
        assert!(server.running());
    }

    #[test]
    fn foreground_run_stops_on_cancel() {
        let mut server = Server::new(config());
        server.setup().unwrap();
        let cancel = server.cancel_handle();

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel().unwrap();
        });
        server.run().unwrap();
        stopper.join().unwrap();

        assert!(server.closed());
    }

    #[test]
    fn hello_world_round_trip() {
        let server = serve(config());
        let mut client = connect(&server);
        wait_for_connections(&server, 1);

        client.send("Hello, World!").unwrap();
        assert_eq!(client.receive_json().unwrap(), Some(json!("Hello, World!")));

        let big = " ".repeat(2048);
        client.send(&big).unwrap();
        assert_eq!(client.receive_json().unwrap(), Some(json!(big)));

        client.stop();
    }

    #[test]
    fn broadcast_reaches_every_client() {
        let server = serve(config());
        let a = connect(&server);
        let b = connect(&server);
        let c = connect(&server);
        wait_for_connections(&server, 3);

        let payload = json!({"ball": [120, 48], "paddle": "left"});
        a.send(&payload).unwrap();

        for client in [&a, &b, &c] {
            assert_eq!(client.receive_json().unwrap(), Some(payload.clone()));
        }
    }

    #[test]
    fn full_server_rejects_with_no_room() {
        let server = serve(config().with_capacity(1));
        let a = connect(&server);
        wait_for_connections(&server, 1);

        let b = connect(&server);
        let envelope = b.receive_envelope().unwrap().unwrap();
        assert_eq!(envelope.status(), Some(Status::NoRoom));
        assert!(matches!(envelope.check(), Err(TransportError::Capacity(_))));
        assert_eq!(server.connections(), 1);
        assert_eq!(server.peers()[0].address, a.local_addr().unwrap());

        a.send("still here").unwrap();
        assert_eq!(a.receive_json().unwrap(), Some(json!("still here")));
        assert_eq!(server.connections(), 1);
    }

    #[test]
    fn malformed_frame_gets_bad_request() {
        let server = serve(config());
        let mut raw = StdStream::connect(server.local_addr().unwrap()).unwrap();
        wait_for_connections(&server, 1);

        raw.write_all(b"definitely not base64!").unwrap();
        let reply = read_envelope(&mut raw);
        assert_eq!(reply.status(), Some(Status::BadRequest));
        assert_eq!(reply.body(), &json!(INVALID_MESSAGE));
        assert_eq!(server.connections(), 1);
    }

    #[test]
    fn shape_failure_is_answered_to_origin_only() {
        let server = serve(config());
        let mut bystander = Client::connect(
            client_config(&server).with_receive_timeout(Duration::from_millis(300)),
        )
        .unwrap();
        bystander.start().unwrap();
        let mut raw = StdStream::connect(server.local_addr().unwrap()).unwrap();
        wait_for_connections(&server, 2);

        raw.write_all(&pack(br#"{"body": "no headers"}"#)).unwrap();
        let reply = read_envelope(&mut raw);
        assert_eq!(reply.status(), Some(Status::BadRequest));

        assert!(bystander.receive_raw().is_err());
        bystander.stop();
    }

    #[test]
    fn raw_peer_sees_broadcast_frame_unchanged() {
        let server = serve(config());
        let mut raw = StdStream::connect(server.local_addr().unwrap()).unwrap();
        wait_for_connections(&server, 1);

        let mut headers = Headers::new();
        headers.insert("Seq".into(), json!(7));
        let frame = encode(&json!([1, 2, 3]), headers).unwrap();
        raw.write_all(&frame).unwrap();

        raw.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut echoed = vec![0u8; frame.len()];
        raw.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, frame);
    }

    #[test]
    fn frame_sent_with_eof_is_still_broadcast() {
        let server = serve(config());
        let listener = connect(&server);
        let mut raw = StdStream::connect(server.local_addr().unwrap()).unwrap();
        wait_for_connections(&server, 2);

        raw.write_all(&encode("last words", Headers::new()).unwrap())
            .unwrap();
        raw.shutdown(Shutdown::Write).unwrap();

        assert_eq!(listener.receive_json().unwrap(), Some(json!("last words")));
        wait_for_connections(&server, 1);
    }

    #[test]
    fn capacity_of_two_keeps_first_two() {
        let server = serve(config().with_capacity(2));
        let a = connect(&server);
        let b = connect(&server);
        wait_for_connections(&server, 2);

        let c = connect(&server);
        let envelope = c.receive_envelope().unwrap().unwrap();
        assert_eq!(envelope.status(), Some(Status::NoRoom));
        assert_eq!(envelope.body(), &json!(REJECT_MESSAGE));
        assert_eq!(c.receive_envelope().unwrap(), None);

        let mut registered: Vec<_> = server.peers().iter().map(|p| p.address).collect();
        registered.sort();
        let mut expected = vec![a.local_addr().unwrap(), b.local_addr().unwrap()];
        expected.sort();
        assert_eq!(registered, expected);

        b.send("two of two").unwrap();
        assert_eq!(a.receive_json().unwrap(), Some(json!("two of two")));
        assert_eq!(b.receive_json().unwrap(), Some(json!("two of two")));
    }

    #[test]
    fn client_that_stops_reading_is_dropped() {
        let server = serve(config().with_write_stall(Duration::from_millis(50)));
        let sender = connect(&server);
        let _stalled = StdStream::connect(server.local_addr().unwrap()).unwrap();
        wait_for_connections(&server, 2);

        let payload = "x".repeat(8 * 1024);
        let deadline = Instant::now() + Duration::from_secs(60);
        while server.connections() == 2 {
            assert!(Instant::now() < deadline, "stalled client was never dropped");
            sender.send(&payload).unwrap();
            sender.receive_envelope().unwrap();
        }
        assert_eq!(server.peers()[0].address, sender.local_addr().unwrap());

        let watcher = connect(&server);
        wait_for_connections(&server, 2);

        let started = Instant::now();
        sender.send("still flowing").unwrap();
        assert_eq!(watcher.receive_json().unwrap(), Some(json!("still flowing")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn disconnects_leave_the_registry() {
        let server = serve(config());
        let mut client = connect(&server);
        let _other = connect(&server);
        wait_for_connections(&server, 2);

        client.stop();
        wait_for_connections(&server, 1);
    }

    #[test]
    fn stop_is_bounded_and_closes_clients() {
        let mut server = serve(config().with_poll_timeout(Duration::from_secs(30)));
        let a = connect(&server);
        let b = connect(&server);
        wait_for_connections(&server, 2);

        let started = Instant::now();
        server.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.connections(), 0);
        assert!(server.closed());

        assert_eq!(a.receive_raw().unwrap(), Vec::<u8>::new());
        assert_eq!(b.receive_json().unwrap(), None);
    }

    #[test]
    fn guarded_turns_faults_into_dumps() {
        assert!(guarded(|| Ok(())).is_none());

        let fault = guarded(|| Err(TransportError::State("selector gone".into()))).unwrap();
        assert_eq!(fault.summary(), "invalid state: selector gone");

        let fault = guarded(|| panic!("loop exploded")).unwrap();
        assert_eq!(fault.summary(), "panic: loop exploded");

        let temp = TempDir::new("serve").unwrap();
        let mut server = Server::new(config().with_dump_dir(temp.path()));
        let serve = server.prepare().unwrap();
        serve.report(&fault);
        server.cancel_handle().cancel().unwrap();
        serve.run();

        let dump = std::fs::read_to_string(temp.path().join(DUMP_FILE)).unwrap();
        assert!(dump.contains("panic: loop exploded"));
        assert!(server.closed());
    }
}
