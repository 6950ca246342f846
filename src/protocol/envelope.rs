//! Envelope codec.
//!
//! Every logical message travels as `base64(json({"headers": {..}, "body": ..}))`.
//! The JSON layer gives the message its structure; the base64 layer keeps
//! arbitrary bytes away from anything a text-oriented transport might treat
//! as a delimiter.
//!
//! There is no length prefix. A reader treats everything drained from the
//! socket in one readiness pass as one frame.
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Status, transport::TransportError};

/// Header mapping carried by every [`Envelope`].
pub type Headers = Map<String, Value>;

const HEADERS: &str = "headers";
const BODY: &str = "body";

/// The `{headers, body}` unit exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub headers: Headers,
    pub body: Value,
}

impl Envelope {
    pub fn new(body: Value, headers: Headers) -> Self {
        Self { headers, body }
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// Status carried by an error envelope, if any.
    pub fn status(&self) -> Option<Status> {
        self.header(super::status::CODE_HEADER)
            .and_then(Value::as_str)
            .and_then(Status::from_code)
    }

    /// Turns a "no room" rejection into [`TransportError::Capacity`].
    pub fn check(self) -> Result<Self, TransportError> {
        match self.status() {
            Some(Status::NoRoom) => Err(TransportError::Capacity(
                self.body
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| Status::NoRoom.description().to_string()),
            )),
            _ => Ok(self),
        }
    }

    /// Builds an envelope from an already deserialized value, enforcing the
    /// shape invariant.
    pub fn from_value(value: Value) -> Result<Self, TransportError> {
        let invalid = || {
            TransportError::Validation(
                "expected an object with a `headers` mapping and a `body`".to_string(),
            )
        };

        let Value::Object(mut object) = value else {
            return Err(invalid());
        };
        let Some(body) = object.remove(BODY) else {
            return Err(invalid());
        };
        match object.remove(HEADERS) {
            Some(Value::Object(headers)) => Ok(Self { headers, body }),
            _ => Err(invalid()),
        }
    }

    /// Parses unpacked (already base64-decoded) JSON bytes.
    pub fn from_slice(json: &[u8]) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_slice(json)
            .map_err(|e| TransportError::Validation(format!("not a JSON document: {e}")))?;
        Self::from_value(value)
    }

    /// Serializes and packs the envelope into a transport frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, TransportError> {
        Ok(pack(&serde_json::to_vec(self)?))
    }
}

/// Checks the envelope shape: an object carrying `headers` (a mapping) and
/// `body` (anything).
pub fn validate(value: &Value) -> bool {
    match value {
        Value::Object(object) => {
            matches!(object.get(HEADERS), Some(Value::Object(_))) && object.contains_key(BODY)
        }
        _ => false,
    }
}

/// Applies the binary-safe layer.
pub fn pack(data: &[u8]) -> Vec<u8> {
    STANDARD.encode(data).into_bytes()
}

/// Removes the binary-safe layer.
pub fn unpack(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    Ok(STANDARD.decode(data)?)
}

/// Encodes `body` and `headers` into a transport frame.
pub fn encode<T>(body: &T, headers: Headers) -> Result<Vec<u8>, TransportError>
where
    T: Serialize + ?Sized,
{
    let envelope = Envelope::new(serde_json::to_value(body)?, headers);
    if !validate(&serde_json::to_value(&envelope)?) {
        return Err(TransportError::Validation(
            "not a valid message data".to_string(),
        ));
    }

    envelope.to_frame()
}

/// Result of [`decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Envelope(Envelope),
    Raw(Vec<u8>),
}

impl Decoded {
    /// The unpacked bytes as UTF-8 text, when the decode was not strict.
    pub fn text(&self) -> Option<&str> {
        match self {
            Decoded::Raw(bytes) => std::str::from_utf8(bytes).ok(),
            Decoded::Envelope(_) => None,
        }
    }
}

/// Reverses [`encode`]. With `strict` unset only the binary-safe layer is
/// removed.
pub fn decode(data: &[u8], strict: bool) -> Result<Decoded, TransportError> {
    let raw = unpack(data)?;
    if !strict {
        return Ok(Decoded::Raw(raw));
    }
    Ok(Decoded::Envelope(Envelope::from_slice(&raw)?))
}

/// A received frame awaiting decoding.
///
/// Once a strict decode has failed the shape check the message stays
/// invalid; later calls fail without decoding again.
#[derive(Debug, Clone, Default)]
pub struct Message {
    data: Vec<u8>,
    invalid: bool,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            invalid: false,
        }
    }

    /// The frame exactly as received.
    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    pub fn unpack(&self) -> Result<Vec<u8>, TransportError> {
        unpack(&self.data)
    }

    pub fn text(&self) -> Result<String, TransportError> {
        String::from_utf8(self.unpack()?)
            .map_err(|e| TransportError::Validation(format!("frame is not UTF-8: {e}")))
    }

    pub fn envelope(&mut self) -> Result<Envelope, TransportError> {
        if self.invalid {
            return Err(TransportError::Validation(
                "message data is marked invalid".to_string(),
            ));
        }

        let raw = self.unpack()?;
        Envelope::from_slice(&raw).inspect_err(|_| self.invalid = true)
    }

    pub fn body(&mut self) -> Result<Value, TransportError> {
        Ok(self.envelope()?.into_body())
    }

    pub fn headers(&mut self) -> Result<Headers, TransportError> {
        Ok(self.envelope()?.headers)
    }
}
