use std::{
    io::{self, Write},
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

/// How long a single frame write may keep hitting a full socket buffer.
pub const WRITE_STALL_LIMIT: Duration = Duration::from_secs(5);
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message data is not valid: {0}")]
    Validation(String),
    #[error("malformed data: {0}")]
    MalformedData(#[from] base64::DecodeError),
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid state: {0}")]
    State(String),
    #[error("connection rejected: {0}")]
    Capacity(String),
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the peer went away underneath a read or write.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Io(e) => is_disconnect(e),
            _ => false,
        }
    }
}

pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

/// Writes a whole frame to a non-blocking stream.
///
/// A full socket buffer surfaces as `WouldBlock`; the write is retried until
/// the frame is out or the stall exceeds [`WRITE_STALL_LIMIT`], in which case
/// `TimedOut` is returned. Returns the number of bytes written.
pub fn write_frame<W: Write>(stream: &mut W, frame: &[u8]) -> io::Result<usize> {
    write_frame_within(stream, frame, WRITE_STALL_LIMIT)
}

/// [`write_frame`] with a caller-chosen stall limit.
pub fn write_frame_within<W: Write>(
    stream: &mut W,
    frame: &[u8],
    stall_limit: Duration,
) -> io::Result<usize> {
    let mut written = 0;
    let mut stalled: Option<Instant> = None;

    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                written += n;
                stalled = None;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let since = *stalled.get_or_insert_with(Instant::now);
                if since.elapsed() >= stall_limit {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer stopped draining its socket",
                    ));
                }
                thread::sleep(WRITE_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }

    stream.flush()?;
    Ok(written)
}
