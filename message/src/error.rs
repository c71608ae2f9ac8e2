use ser;
use std::fmt;

pub type MessageResult<T> = Result<T, Error>;

#[derive(Debug, PartialEq)]
pub enum Error {
    /// A packet or one of its fields cannot be parsed.
    Deserialize,
    /// The packet type byte is unknown.
    InvalidPacketType,
    /// Request-side validation failed.
    InvalidRequest,
    /// Response-side validation against the originating request failed.
    InvalidResponse,
    /// Frame exceeds the maximum packet size.
    OversizedFrame,
}

impl From<ser::Error> for Error {
    fn from(_: ser::Error) -> Self {
        Error::Deserialize
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Deserialize => "cannot deserialize packet".fmt(f),
            Error::InvalidPacketType => "unknown packet type".fmt(f),
            Error::InvalidRequest => "invalid request".fmt(f),
            Error::InvalidResponse => "invalid response".fmt(f),
            Error::OversizedFrame => "oversized frame".fmt(f),
        }
    }
}
