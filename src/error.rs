//! Error kinds used throughout this crate.
use std;
use thrift_codec;
use trackable::error::ErrorKindExt;
use trackable::error::TrackableError;

/// The error kind of this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input did not follow the expected syntax (e.g. a span context string
    /// with the wrong number of `:`-separated fields).
    InvalidInput,

    /// Extraction found a trace-state carrier key but could not parse its value.
    MalformedState,

    /// Extraction found no trace-state carrier key and no debug-id key.
    EmptyState,

    /// `inject`/`extract` was asked for a carrier format with no registered codec.
    UnsupportedFormat,

    /// Any other error (I/O, encoding, ...).
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}

/// The error type of this crate.
#[derive(Debug, Clone)]
pub struct Error(TrackableError<ErrorKind>);
impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        self.0.kind()
    }
}
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}
impl trackable::Trackable for Error {
    type Event = trackable::History<trackable::Location>;

    fn history(&self) -> Option<&Self::Event> {
        self.0.history()
    }

    fn history_mut(&mut self) -> Option<&mut Self::Event> {
        self.0.history_mut()
    }
}
impl From<ErrorKind> for Error {
    fn from(f: ErrorKind) -> Self {
        Error(f.error().into())
    }
}
impl From<TrackableError<ErrorKind>> for Error {
    fn from(f: TrackableError<ErrorKind>) -> Self {
        Error(f)
    }
}

/// This crate specific `Result` type.
pub type Result<T> = std::result::Result<T, Error>;

pub fn from_io_error(f: std::io::Error) -> Error {
    ErrorKind::Other.cause(f).into()
}

pub fn from_thrift_error(f: thrift_codec::Error) -> Error {
    match *f.kind() {
        thrift_codec::ErrorKind::InvalidInput => ErrorKind::InvalidInput.cause(f).into(),
        thrift_codec::ErrorKind::Other => ErrorKind::Other.cause(f).into(),
    }
}

pub fn from_parse_int_error(f: std::num::ParseIntError) -> Error {
    ErrorKind::InvalidInput.cause(f).into()
}

pub fn from_utf8_error(f: std::str::Utf8Error) -> Error {
    ErrorKind::InvalidInput.cause(f).into()
}

pub fn from_unsupported_format(name: &str) -> Error {
    ErrorKind::UnsupportedFormat
        .cause(format!("no codec registered for format {:?}", name))
        .into()
}
