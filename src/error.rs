//! Error kinds exposed to callers of the audio graph.

use std::fmt::{Display, Formatter};

/// Error kinds surfaced across the public API.
///
/// Programmer-contract violations (double attach, unbalanced ref/unref,
/// detaching a sink that was never attached) are not represented here: those
/// are fatal and panic at the call site instead of being returned.
#[derive(Debug)]
pub enum Error {
    /// Allocation failed.
    NoMem,
    /// A sink's requested sample format is not supported.
    InvalidSampleFormat,
    /// The audio device rejected the requested parameters.
    DeviceParams(String),
    /// `detach` was called on a sink that is not currently attached.
    SinkNotFound,
    /// `save` was called on a file with no pending metadata changes.
    NoChanges,
    /// I/O failed while persisting metadata.
    FileSystem(std::io::Error),
    /// The container/codec could not be identified while probing.
    UnknownFormat,
    /// The container exposed more audio streams than we support picking from.
    TooManyStreams,
    /// A transient encoder failure; the caller may retry.
    Encoding(String),
    /// A transient decoder failure; the caller may retry.
    Decoding(String),
    /// The audio output device could not be opened.
    OpeningDevice(String),
    /// The OS refused a resource request (threads, file handles, ...).
    SystemResources(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMem => write!(f, "allocation failed"),
            Self::InvalidSampleFormat => write!(f, "invalid or unsupported sample format"),
            Self::DeviceParams(msg) => write!(f, "device rejected parameters: {}", msg),
            Self::SinkNotFound => write!(f, "sink is not attached"),
            Self::NoChanges => write!(f, "no pending metadata changes"),
            Self::FileSystem(err) => write!(f, "filesystem error: {}", err),
            Self::UnknownFormat => write!(f, "unknown or unsupported container format"),
            Self::TooManyStreams => write!(f, "too many audio streams in container"),
            Self::Encoding(msg) => write!(f, "encoding error: {}", msg),
            Self::Decoding(msg) => write!(f, "decoding error: {}", msg),
            Self::OpeningDevice(msg) => write!(f, "failed to open device: {}", msg),
            Self::SystemResources(msg) => write!(f, "system resources exhausted: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::FileSystem(value)
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
