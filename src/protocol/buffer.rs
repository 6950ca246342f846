use std::{
    fmt, mem,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Buffer shared between a multiplexing loop and whoever consumes its data.
pub type SharedBuffer = Arc<Mutex<ConnectionBuffer>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes waiting to be written to the peer.
    Input,
    /// Bytes received from the peer and not yet consumed.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("{0} buffer is upheld, refusing to overwrite it")]
    Upheld(Direction),
}

/// Lifecycle of one direction of a [`ConnectionBuffer`].
///
/// `Upheld` protects whatever the slot holds: writes are rejected until the
/// consumer takes the data or releases the hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Empty,
    Filled,
    Upheld,
}

#[derive(Debug, Default)]
struct Slot {
    data: Vec<u8>,
    state: SlotState,
}

impl Slot {
    fn settle(&mut self) {
        self.state = if self.data.is_empty() {
            SlotState::Empty
        } else {
            SlotState::Filled
        };
    }

    fn set(&mut self, data: Vec<u8>) -> bool {
        if self.state == SlotState::Upheld {
            return false;
        }
        self.data = data;
        self.settle();
        true
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        if self.data.is_empty() {
            return None;
        }
        let data = mem::take(&mut self.data);
        self.state = SlotState::Empty;
        Some(data)
    }
}

/// Per-connection byte accumulators, one per direction.
#[derive(Debug)]
pub struct ConnectionBuffer {
    address: SocketAddr,
    input: Slot,
    output: Slot,
}

impl ConnectionBuffer {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            input: Slot::default(),
            output: Slot::default(),
        }
    }

    pub fn shared(address: SocketAddr) -> SharedBuffer {
        Arc::new(Mutex::new(Self::new(address)))
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn slot(&self, direction: Direction) -> &Slot {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Slot {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    pub fn input(&self) -> &[u8] {
        &self.input.data
    }

    pub fn output(&self) -> &[u8] {
        &self.output.data
    }

    pub fn state(&self, direction: Direction) -> SlotState {
        self.slot(direction).state
    }

    pub fn is_upheld(&self, direction: Direction) -> bool {
        self.state(direction) == SlotState::Upheld
    }

    /// Replaces the contents of one direction.
    pub fn set(&mut self, direction: Direction, data: impl Into<Vec<u8>>) -> Result<(), BufferError> {
        if self.slot_mut(direction).set(data.into()) {
            Ok(())
        } else {
            Err(BufferError::Upheld(direction))
        }
    }

    /// Protects the current contents from being overwritten.
    pub fn uphold(&mut self, direction: Direction) {
        self.slot_mut(direction).state = SlotState::Upheld;
    }

    pub fn release(&mut self, direction: Direction) {
        let slot = self.slot_mut(direction);
        if slot.state == SlotState::Upheld {
            slot.settle();
        }
    }

    /// Snapshots and clears one direction. Consuming data lifts any hold on
    /// it; an empty slot keeps its state.
    pub fn take(&mut self, direction: Direction) -> Option<Vec<u8>> {
        self.slot_mut(direction).take()
    }

    pub fn reset(&mut self, direction: Direction) {
        let slot = self.slot_mut(direction);
        slot.data.clear();
        slot.state = SlotState::Empty;
    }
}

impl fmt::Display for ConnectionBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<buffer {} input={:?}/{} output={:?}/{}>",
            self.address,
            self.input.state,
            self.input.data.len(),
            self.output.state,
            self.output.data.len()
        )
    }
}
