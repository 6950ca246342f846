use std::fmt;

use serde_json::Value;

use super::{
    envelope::{self, Headers},
    transport::TransportError,
};

pub(crate) const MESSAGE_HEADER: &str = "EMessage";
pub(crate) const NAME_HEADER: &str = "EName";
pub(crate) const CODE_HEADER: &str = "ECode";

/// Fixed catalog of outcomes a peer can be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    BadRequest,
    AccessDenied,
    Overloaded,
    Failure,
    NoRoom,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Success,
        Status::BadRequest,
        Status::AccessDenied,
        Status::Overloaded,
        Status::Failure,
        Status::NoRoom,
    ];

    /// Machine-readable code, stable on the wire.
    pub fn code(self) -> &'static str {
        match self {
            Status::Success => "YES",
            Status::BadRequest => "EBADREQ",
            Status::AccessDenied => "ENOACC",
            Status::Overloaded => "EOVERLOAD",
            Status::Failure => "EFAILURE",
            Status::NoRoom => "ENOROOM",
        }
    }

    pub fn phrase(self) -> &'static str {
        match self {
            Status::Success => "Success",
            Status::BadRequest => "Bad Request",
            Status::AccessDenied => "Access Denied",
            Status::Overloaded => "Server Overloaded",
            Status::Failure => "Server Failure",
            Status::NoRoom => "No Room Available",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Status::Success => "Request successful",
            Status::BadRequest => "User/client sent a malformed message.",
            Status::AccessDenied => "User doesn't have enough permission to access resource",
            Status::Overloaded => "Hold tight, the server is overloaded. It'll be back soon.",
            Status::Failure => "Server crashed! Let's hope it will be back soon.",
            Status::NoRoom => "Please wait while the room is full.",
        }
    }

    pub fn from_code(code: &str) -> Option<Status> {
        Status::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_error(self) -> bool {
        self != Status::Success
    }

    fn headers(self) -> Headers {
        let mut headers = Headers::new();
        headers.insert(MESSAGE_HEADER.into(), Value::from(self.description()));
        headers.insert(NAME_HEADER.into(), Value::from(self.phrase()));
        headers.insert(CODE_HEADER.into(), Value::from(self.code()));
        headers
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.phrase(), self.code())
    }
}

/// Builds an error envelope frame: the status goes into the headers, the
/// human-readable `message` becomes the body.
pub fn transform_error(message: &str, status: Status) -> Result<Vec<u8>, TransportError> {
    envelope::encode(message, status.headers())
}
