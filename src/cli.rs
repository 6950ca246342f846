//! Interactive shell for the pong server.
//!
//! The shell reads one [`Command`] per line and drives a single [`Server`]
//! through a [`Shell`]. Output goes to any writer so sessions can be tested
//! without a terminal.
use std::{
    io::{self, BufRead, Write},
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use thiserror::Error;

use crate::{
    config::{ClientConfig, ServerConfig},
    protocol::{Client, Server, TransportError},
};

pub const PROMPT: &str = ">>> ";
pub const INTRO: &str = "Welcome to the pong server shell. Type run to start the server";

const TEST_MESSAGE: &str = "Hello, World!";
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

/// Commands understood by the server shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `run <host> <port> [capacity]`
    Run {
        host: String,
        port: u16,
        capacity: usize,
    },
    /// Stop the running server.
    Stop,
    /// Round-trip a greeting through the running server.
    Test,
    /// Print the server state.
    Status,
    Help,
    Exit,
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Err(CommandError::Empty);
        };
        let args: Vec<&str> = parts.collect();

        match name {
            "run" => {
                let invalid = |reason: &str| CommandError::InvalidCommandArguments {
                    command: "run".to_string(),
                    reason: reason.to_string(),
                };

                let [host, port, rest @ ..] = args.as_slice() else {
                    return Err(invalid("requires host and port. Example: run 127.0.0.1 2000"));
                };
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid("port is not a number"))?;
                let capacity = match rest {
                    [] => 0,
                    [capacity] => capacity
                        .parse::<usize>()
                        .map_err(|_| invalid("capacity should be a non-negative number"))?,
                    _ => return Err(invalid("too many arguments")),
                };

                Ok(Command::Run {
                    host: host.to_string(),
                    port,
                    capacity,
                })
            }
            "stop" => Ok(Command::Stop),
            "test" => Ok(Command::Test),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            s => Err(CommandError::UnrecognizedCommand(s.to_string())),
        }
    }
}

/// Prompts for one command. End of input reads as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> io::Result<Result<Command, CommandError>>
where
    R: BufRead,
    W: Write,
{
    write!(writer, "{PROMPT}")?;
    writer.flush()?;

    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(Ok(Command::Exit));
    }
    Ok(Command::try_from(line.as_str()))
}

/// State of one interactive session.
#[derive(Default)]
pub struct Shell {
    server: Option<Server>,
    address: Option<SocketAddr>,
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    /// Runs one command. Returns false when the session should end.
    pub fn execute<W: Write>(&mut self, command: Command, out: &mut W) -> io::Result<bool> {
        match command {
            Command::Run {
                host,
                port,
                capacity,
            } => self.run(&host, port, capacity, out)?,
            Command::Stop => self.stop(out)?,
            Command::Test => self.test(out)?,
            Command::Status => match &self.server {
                Some(server) => writeln!(out, "{server}")?,
                None => writeln!(out, "Server was not started yet.")?,
            },
            Command::Help => {
                writeln!(out, "run <host> <port> [capacity]  start the server")?;
                writeln!(out, "stop                          stop the server")?;
                writeln!(out, "test                          send a greeting through it")?;
                writeln!(out, "status                        show the server state")?;
                writeln!(out, "exit                          stop and leave")?;
            }
            Command::Exit => {
                if let Some(server) = self.server.as_mut() {
                    server.stop();
                }
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run<W: Write>(&mut self, host: &str, port: u16, capacity: usize, out: &mut W) -> io::Result<()> {
        if self.server.as_ref().is_some_and(Server::running) {
            writeln!(out, "Server is already running.")?;
            return Ok(());
        }

        let Some(address) = (host, port).to_socket_addrs()?.next() else {
            writeln!(out, "Cannot resolve {host}:{port}")?;
            return Ok(());
        };

        let mut server = Server::new(ServerConfig::new(address).with_capacity(capacity));
        match server.run_in_background() {
            Ok(()) => {
                let bound = server.local_addr().unwrap_or(address);
                writeln!(out, "Server run at {bound}")?;
                self.address = Some(bound);
                self.server = Some(server);
            }
            Err(e) => writeln!(out, "Failed to start server: {e}")?,
        }
        Ok(())
    }

    fn stop<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        match self.server.as_mut() {
            None => writeln!(out, "Server was not started yet."),
            Some(server) if !server.running() => writeln!(out, "Server was stopped."),
            Some(server) => {
                server.stop();
                writeln!(out, "Server stopped")
            }
        }
    }

    fn test<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let Some(address) = self.address else {
            writeln!(out, "Server was not started.")?;
            return Ok(());
        };

        match round_trip(address) {
            Ok(reply) => writeln!(out, "{reply}"),
            Err(e) => writeln!(out, "Test failed: {e}"),
        }
    }
}

fn round_trip(address: SocketAddr) -> Result<String, TransportError> {
    let mut client = Client::connect(
        ClientConfig::new(address).with_receive_timeout(TEST_TIMEOUT),
    )?;
    client.start()?;
    client.send(TEST_MESSAGE)?;
    let reply = client.receive_envelope()?;
    client.stop();

    match reply {
        Some(envelope) => Ok(serde_json::to_string(&envelope)?),
        None => Err(TransportError::State(
            "server closed the connection".to_string(),
        )),
    }
}
