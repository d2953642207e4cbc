//! Request and response body shared by the builder, the transport, and the
//! response validator.
//!
//! # Design
//! A `Body` is either the empty sentinel, bytes already in memory, or a
//! `Read` stream. Streams are consumed lazily: the transport pulls them when
//! the request goes out, and the validator drains a response stream into
//! memory only when an interceptor needs to look at it. Once drained, the
//! bytes stay in the body, so a re-sent request carries the same payload and
//! the caller still sees the full response.
//!
//! The stream sits behind a `Mutex` so a frozen `http::Request<Body>` can be
//! handed to the transport by shared reference and still be drained in place.

use std::fmt;
use std::io::{self, Read};
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

type Stream = Box<dyn Read + Send>;

/// Byte payload of a wire request or response.
#[derive(Default)]
pub struct Body {
    kind: Kind,
}

#[derive(Default)]
enum Kind {
    #[default]
    Empty,
    Bytes(Bytes),
    Stream(Mutex<Slot>),
}

enum Slot {
    Unread(Stream),
    Drained(Bytes),
}

impl Slot {
    /// Read the stream to its end unless that already happened. On a read
    /// error the prefix read so far is kept and returned next to the error.
    fn drain(&mut self) -> (Bytes, io::Result<()>) {
        match self {
            Slot::Drained(bytes) => (bytes.clone(), Ok(())),
            Slot::Unread(stream) => {
                let mut buf = Vec::new();
                let result = stream.read_to_end(&mut buf).map(drop);
                let bytes = Bytes::from(buf);
                *self = Slot::Drained(bytes.clone());
                (bytes, result)
            }
        }
    }
}

impl Body {
    /// The "no body" sentinel.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a reader. It is read once; the bytes are kept afterwards.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self {
            kind: Kind::Stream(Mutex::new(Slot::Unread(Box::new(reader)))),
        }
    }

    /// True only for the empty sentinel and for zero-length in-memory bodies.
    /// An unread stream is never reported as empty.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Bytes(bytes) => bytes.is_empty(),
            Kind::Stream(_) => false,
        }
    }

    /// The in-memory content, if the body is not an unread stream.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            Kind::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Drain a stream body into memory and keep the bytes in place.
    ///
    /// On a read error the bytes read so far are kept and the error is
    /// returned; the rest of the stream is lost.
    pub fn buffer(&mut self) -> io::Result<Bytes> {
        let (bytes, result) = match std::mem::take(&mut self.kind) {
            Kind::Empty => (Bytes::new(), Ok(())),
            Kind::Bytes(bytes) => (bytes, Ok(())),
            Kind::Stream(slot) => slot.into_inner().unwrap_or_else(PoisonError::into_inner).drain(),
        };
        self.kind = Kind::Bytes(bytes.clone());
        result.map(|()| bytes)
    }

    /// Consume the body and return all of its bytes.
    pub fn into_bytes(mut self) -> io::Result<Bytes> {
        self.buffer()
    }

    /// Consume the body and decode it as UTF-8.
    pub fn into_string(self) -> io::Result<String> {
        let bytes = self.into_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// The payload to put on the wire: `None` for the empty sentinel, the
    /// bytes otherwise. A stream is drained on first use and the bytes are
    /// kept, so every call sees the same payload.
    pub(crate) fn load(&self) -> io::Result<Option<Bytes>> {
        match &self.kind {
            Kind::Empty => Ok(None),
            Kind::Bytes(bytes) => Ok(Some(bytes.clone())),
            Kind::Stream(slot) => {
                let (bytes, result) = slot.lock().unwrap_or_else(PoisonError::into_inner).drain();
                result.map(|()| Some(bytes))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("Body::Empty"),
            Kind::Bytes(bytes) => f.debug_tuple("Body::Bytes").field(&bytes.len()).finish(),
            Kind::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Bytes(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}
