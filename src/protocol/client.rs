use std::{
    fmt, io,
    net::{Shutdown, SocketAddr, TcpStream},
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use log::{debug, info, warn};
use mio::Token;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::ClientConfig;

use super::{
    Envelope, Headers, Message,
    buffer::{Direction, SharedBuffer},
    envelope::{encode, unpack},
    lock,
    selector::{ReadOutcome, Readiness, Selector},
    thread::{CancelToken, Worker},
    transport::{TransportError, write_frame},
};

/// Body of the envelope [`AppClient`] hands out when there is nothing
/// usable to read.
pub const NO_DATA: &str = "No data is provided for now or server sent invalid response.";
pub const ORIGIN_HEADER: &str = "Origin";

#[derive(Debug, Default)]
struct Flags {
    running: AtomicBool,
    connected: AtomicBool,
    /// Set while the read loop drains the socket.
    reading: AtomicBool,
}

#[derive(Debug)]
struct Link {
    writer: TcpStream,
    buffer: SharedBuffer,
    local_addr: SocketAddr,
}

/// One connection to a server.
///
/// Sends happen on the calling thread. Received frames are published by a
/// background read loop to a buffer that the `receive_*` calls poll.
pub struct Client {
    config: ClientConfig,
    link: Option<Link>,
    flags: Arc<Flags>,
    cancel: CancelToken,
    pending: Option<ReadLoop>,
    worker: Option<Worker>,
}

impl Client {
    /// Connects to `config.address`. The read loop is prepared but only
    /// runs after [`Client::start`].
    pub fn connect(config: ClientConfig) -> Result<Self, TransportError> {
        let stream = TcpStream::connect_timeout(&config.address, config.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let local_addr = stream.local_addr()?;
        let writer = stream.try_clone()?;

        let mut selector = Selector::new(config.log_target.as_str())?;
        let token = selector.register(mio::net::TcpStream::from_std(stream), config.address)?;
        let buffer = selector
            .buffer(token)
            .ok_or_else(|| TransportError::State("connection was not registered".to_string()))?;

        let cancel = CancelToken::new();
        cancel.attach(selector.waker()?);

        let flags = Arc::new(Flags::default());
        flags.connected.store(true, Ordering::SeqCst);

        info!(
            target: config.log_target.as_str(),
            "connected to server {} from {local_addr}",
            config.address
        );

        let pending = ReadLoop {
            selector,
            token,
            flags: Arc::clone(&flags),
            cancel: cancel.clone(),
            log_target: config.log_target.clone(),
        };

        Ok(Self {
            config,
            link: Some(Link {
                writer,
                buffer,
                local_addr,
            }),
            flags,
            cancel,
            pending: Some(pending),
            worker: None,
        })
    }

    /// A client that never connects. Every I/O call fails and `stop` does
    /// nothing.
    pub fn detached(address: SocketAddr) -> Self {
        Self {
            config: ClientConfig::new(address),
            link: None,
            flags: Arc::new(Flags::default()),
            cancel: CancelToken::new(),
            pending: None,
            worker: None,
        }
    }

    fn target(&self) -> &str {
        &self.config.log_target
    }

    fn link(&self) -> Result<&Link, TransportError> {
        self.link
            .as_ref()
            .ok_or_else(|| TransportError::State("client is detached".to_string()))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    /// False once the server closed the connection or the client stopped.
    pub fn connected(&self) -> bool {
        self.flags.connected.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.local_addr)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.address
    }

    /// Starts the background read loop.
    pub fn start(&mut self) -> Result<(), TransportError> {
        self.link()?;
        let read_loop = self.pending.take().ok_or_else(|| {
            TransportError::State("client has already been started".to_string())
        })?;

        self.flags.running.store(true, Ordering::SeqCst);
        let worker = Worker::spawn(
            "pong-client",
            self.target(),
            self.cancel.clone(),
            move |_| read_loop.run(),
        );
        match worker {
            Ok(worker) => {
                info!(target: self.target(), "starting connection to server");
                self.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                self.flags.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    pub fn send<T>(&self, payload: &T) -> Result<usize, TransportError>
    where
        T: Serialize + ?Sized,
    {
        self.send_with_headers(payload, Headers::new())
    }

    /// Encodes and writes one frame before returning.
    pub fn send_with_headers<T>(&self, payload: &T, headers: Headers) -> Result<usize, TransportError>
    where
        T: Serialize + ?Sized,
    {
        let link = self.link()?;
        if !self.connected() {
            return Err(TransportError::State(
                "connection to the server is closed".to_string(),
            ));
        }

        let frame = encode(payload, headers)?;
        debug!(target: self.target(), "sending {} bytes", frame.len());
        Ok(write_frame(&mut &link.writer, &frame)?)
    }

    /// Waits for the next frame. `None` means the connection closed with
    /// nothing left to read.
    fn take_frame(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let link = self.link()?;
        if self.worker.is_none() {
            return Err(TransportError::State(
                "client has not been started".to_string(),
            ));
        }

        let deadline = self
            .config
            .receive_timeout
            .map(|timeout| Instant::now() + timeout);

        loop {
            if let Some(frame) = lock(&link.buffer).take(Direction::Output) {
                return Ok(Some(frame));
            }
            if !self.connected() {
                // The loop may have published a last frame before closing.
                return Ok(lock(&link.buffer).take(Direction::Output));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no data received from the server in time",
                )
                .into());
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Waits for the next frame and returns it with the base64 layer
    /// removed. Returns an empty vector once the connection is closed.
    pub fn receive_raw(&self) -> Result<Vec<u8>, TransportError> {
        debug!(target: self.target(), "reading data");
        match self.take_frame()? {
            Some(frame) => unpack(&frame),
            None => Ok(Vec::new()),
        }
    }

    fn wait_idle(&self) {
        while self.flags.reading.load(Ordering::SeqCst) {
            thread::sleep(self.config.poll_interval);
        }
    }

    pub fn receive_envelope(&self) -> Result<Option<Envelope>, TransportError> {
        self.wait_idle();
        match self.take_frame()? {
            Some(frame) => Ok(Some(Message::new(frame).envelope()?)),
            None => Ok(None),
        }
    }

    /// Waits for the next envelope and returns its body.
    pub fn receive_json(&self) -> Result<Option<Value>, TransportError> {
        Ok(self.receive_envelope()?.map(Envelope::into_body))
    }

    /// Keeps the current output from being replaced until it is taken or
    /// released.
    pub fn hold_output(&self) -> Result<(), TransportError> {
        lock(&self.link()?.buffer).uphold(Direction::Output);
        Ok(())
    }

    pub fn release_output(&self) -> Result<(), TransportError> {
        lock(&self.link()?.buffer).release(Direction::Output);
        Ok(())
    }

    /// Closes the connection and joins the read loop.
    pub fn stop(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        let was_running = self.running();

        self.flags.running.store(false, Ordering::SeqCst);
        self.flags.connected.store(false, Ordering::SeqCst);
        self.pending = None;
        if let Err(e) = link.writer.shutdown(Shutdown::Both) {
            debug!(target: self.target(), "socket already closed: {e}");
        }

        if let Some(worker) = self.worker.as_mut() {
            if worker.is_running() || was_running {
                info!(target: self.config.log_target.as_str(), "closing connection");
            }
            if !worker.stop() {
                warn!(target: self.config.log_target.as_str(), "client read loop panicked");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr() {
            Some(local) => write!(f, "<Client -> {} [{local}]>", self.config.address),
            None => write!(f, "<Client -> {} [detached]>", self.config.address),
        }
    }
}

/// State moved onto the client's background thread.
struct ReadLoop {
    selector: Selector,
    token: Token,
    flags: Arc<Flags>,
    cancel: CancelToken,
    log_target: String,
}

impl ReadLoop {
    fn run(mut self) {
        let target = self.log_target.as_str();

        'serve: while !self.cancel.is_cancelled() {
            let ready = match self.selector.select(None) {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(target: target, "selector failed: {e}");
                    break;
                }
            };

            for readiness in ready {
                let Readiness::Read(token) = readiness else {
                    continue;
                };
                if token != self.token {
                    continue;
                }

                self.flags.reading.store(true, Ordering::SeqCst);
                let outcome = self.selector.read(token);
                self.flags.reading.store(false, Ordering::SeqCst);

                if outcome == ReadOutcome::Closed {
                    info!(target: target, "server closed the connection");
                    break 'serve;
                }
            }
        }

        self.flags.running.store(false, Ordering::SeqCst);
        self.flags.connected.store(false, Ordering::SeqCst);
        self.selector.close();
        debug!(target: target, "read loop finished");
    }
}

/// Client for callers that poll every frame, such as a render loop.
///
/// Reads never block and never fail: when there is no usable frame an
/// informational envelope with [`NO_DATA`] stands in for it.
pub struct AppClient {
    inner: Client,
}

impl AppClient {
    pub fn new(inner: Client) -> Self {
        Self { inner }
    }

    pub fn connect(config: ClientConfig) -> Result<Self, TransportError> {
        Ok(Self::new(Client::connect(config)?))
    }

    pub fn into_inner(self) -> Client {
        self.inner
    }

    fn no_data(&self) -> Envelope {
        let origin = match self.inner.local_addr() {
            Some(address) => address.to_string(),
            None => "detached".to_string(),
        };

        let mut headers = Headers::new();
        headers.insert(ORIGIN_HEADER.to_string(), json!(origin));
        Envelope::new(json!(NO_DATA), headers)
    }

    fn latest(&self) -> Option<Vec<u8>> {
        let link = self.inner.link.as_ref()?;
        let frame = lock(&link.buffer).output().to_vec();
        if frame.is_empty() {
            return None;
        }
        unpack(&frame).ok()
    }

    /// Peeks at the latest frame without consuming it, base64 layer removed.
    pub fn read(&self) -> Vec<u8> {
        if let Some(raw) = self.latest() {
            return raw;
        }
        serde_json::to_vec(&self.no_data()).unwrap_or_default()
    }

    /// The latest frame as an envelope.
    pub fn json(&self) -> Envelope {
        self.inner.wait_idle();
        self.latest()
            .and_then(|raw| Envelope::from_slice(&raw).ok())
            .unwrap_or_else(|| self.no_data())
    }
}

impl Deref for AppClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        &self.inner
    }
}

impl DerefMut for AppClient {
    fn deref_mut(&mut self) -> &mut Client {
        &mut self.inner
    }
}
