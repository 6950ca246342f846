//! Runtime configuration for servers and clients.
//!
//! Nothing here is read from files; binaries fill these in from their
//! command-line arguments and library users build them directly.
use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

pub const DATA_DIR_NAME: &str = ".pong";

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_REJECT_GRACE: Duration = Duration::from_millis(200);
pub const DEFAULT_WRITE_STALL: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// `$HOME/.pong`, or a directory under the system temp dir when there is no
/// home.
pub fn data_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
        .join(DATA_DIR_NAME)
}

pub fn log_dir() -> PathBuf {
    data_dir().join("log")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    /// Maximum number of registered clients. Zero means unbounded.
    pub capacity: usize,
    /// Upper bound on one selector wait; also bounds how long a stop request
    /// can go unnoticed.
    pub poll_timeout: Duration,
    /// Pause between sending the "no room" envelope and closing the socket.
    pub reject_grace: Duration,
    /// How long one send may wait on a client that stopped reading before
    /// that client is dropped. Every other client waits too, so keep it
    /// well under `poll_timeout`.
    pub write_stall: Duration,
    /// Where loop fault dumps are written.
    pub dump_dir: PathBuf,
    pub log_target: String,
}

impl ServerConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            capacity: 0,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            reject_grace: DEFAULT_REJECT_GRACE,
            write_stall: DEFAULT_WRITE_STALL,
            dump_dir: log_dir(),
            log_target: "pong::server".to_string(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_reject_grace(mut self, grace: Duration) -> Self {
        self.reject_grace = grace;
        self
    }

    pub fn with_write_stall(mut self, stall: Duration) -> Self {
        self.write_stall = stall;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = dir.into();
        self
    }

    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }

    /// Whether `current` registered clients leave room for one more.
    pub fn has_room(&self, current: usize) -> bool {
        self.capacity == 0 || current < self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub address: SocketAddr,
    /// Sleep between checks of the receive buffer.
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    /// Give up on a receive after this long. `None` waits forever.
    pub receive_timeout: Option<Duration>,
    pub log_target: String,
}

impl ClientConfig {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receive_timeout: None,
            log_target: "pong::client".to_string(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn with_log_target(mut self, target: impl Into<String>) -> Self {
        self.log_target = target.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = ServerConfig::new("127.0.0.1:2000".parse().unwrap());

        assert_eq!(config.capacity, 0);
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.reject_grace, Duration::from_millis(200));
        assert!(config.write_stall < config.poll_timeout);
        assert!(config.dump_dir.ends_with(".pong/log"));
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let config = ServerConfig::new("127.0.0.1:2000".parse().unwrap());
        assert!(config.has_room(10_000));

        let config = config.with_capacity(2);
        assert!(config.has_room(1));
        assert!(!config.has_room(2));
    }

    #[test]
    fn client_builder() {
        let config = ClientConfig::new("127.0.0.1:2000".parse().unwrap())
            .with_receive_timeout(Duration::from_secs(3))
            .with_poll_interval(Duration::from_millis(10))
            .with_log_target("pong::game");

        assert_eq!(config.receive_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.log_target, "pong::game");
    }
}
