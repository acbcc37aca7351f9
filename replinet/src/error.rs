//! Stable error taxonomy of the library.
//!
//! Every error maps to a stable negative integer through [`Error::code`], so
//! that embedders which carry codes across FFI or log boundaries see the
//! same values from build to build. [`strerror`] maps a code back to a
//! description.

use replinet_protocol::{ActKind, BackendError};

/// Base value of the stable error code block.
pub const ERR_BASE: i32 = 0x100;

/// Stable numeric error classes.
///
/// [`Error::code`] returns the negated discriminant of one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Unclassified error.
    Other = ERR_BASE,
    /// Internal library error.
    Internal,
    /// Channel-related error.
    Channel,
    /// Socket-level transport error.
    Socket,
    /// Backend driver error.
    Backend,
    /// Could not connect to the backend address.
    CouldNotConnect,
    /// Operation on a closed connection.
    ConnectionClosed,
    /// Operation on a connection which is not joined to a channel.
    NotConnected,
    /// Ordered operation in a non-primary configuration.
    NonPrimary,
    /// Operation was aborted or cancelled.
    Aborted,
    /// Transient resource exhaustion; it is safe to retry later.
    Again,
    /// Sequence number outside the valid range.
    OutOfRange,
    /// Resource is in use by other threads.
    Busy,
}

impl ErrorCode {
    /// The negative integer form of this code.
    #[must_use]
    pub const fn code(self) -> i32 {
        -(self as i32)
    }
}

/// Returns a brief description of an error code, in the manner of
/// `strerror`.
///
/// `code` is the value returned by [`Error::code`] or
/// [`ErrorCode::code`]; unknown values map to `"unknown error code"`.
#[must_use]
pub const fn strerror(code: i32) -> &'static str {
    match ErrorCode::from_code(code) {
        Some(ErrorCode::Other) => "unclassified error",
        Some(ErrorCode::Internal) => "internal library error",
        Some(ErrorCode::Channel) => "channel error",
        Some(ErrorCode::Socket) => "socket error",
        Some(ErrorCode::Backend) => "backend error",
        Some(ErrorCode::CouldNotConnect) => "could not connect to backend",
        Some(ErrorCode::ConnectionClosed) => "connection closed",
        Some(ErrorCode::NotConnected) => "not connected to a channel",
        Some(ErrorCode::NonPrimary) => "non-primary configuration",
        Some(ErrorCode::Aborted) => "operation aborted",
        Some(ErrorCode::Again) => "resource temporarily unavailable",
        Some(ErrorCode::OutOfRange) => "sequence number out of range",
        Some(ErrorCode::Busy) => "resource busy",
        None => "unknown error code",
    }
}

impl ErrorCode {
    const fn from_code(code: i32) -> Option<Self> {
        let Some(positive) = code.checked_neg() else {
            return None;
        };
        if positive < ERR_BASE {
            return None;
        }
        match positive - ERR_BASE {
            0 => Some(Self::Other),
            1 => Some(Self::Internal),
            2 => Some(Self::Channel),
            3 => Some(Self::Socket),
            4 => Some(Self::Backend),
            5 => Some(Self::CouldNotConnect),
            6 => Some(Self::ConnectionClosed),
            7 => Some(Self::NotConnected),
            8 => Some(Self::NonPrimary),
            9 => Some(Self::Aborted),
            10 => Some(Self::Again),
            11 => Some(Self::OutOfRange),
            12 => Some(Self::Busy),
            _ => None,
        }
    }
}

/// Error type for operations on a [`Connection`].
///
/// [`Connection`]: crate::Connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend driver failed.
    #[error("backend")]
    Backend(#[source] BackendError),
    /// Channel-related failure, such as an empty channel name or joining
    /// twice.
    #[error("channel: {0}")]
    Channel(String),
    /// Operation on a connection which was closed by the application.
    #[error("connection closed")]
    Closed,
    /// The connection suffered a backend hard failure and must be destroyed.
    #[error("connection failed")]
    Failed,
    /// Operation on a connection which is not joined to a channel.
    #[error("not connected")]
    NotConnected,
    /// An ordered operation could not complete because the group is in a
    /// non-primary configuration.
    #[error("non-primary configuration")]
    NonPrimary,
    /// The operation was aborted.
    #[error("operation aborted")]
    Aborted,
    /// The application tried to send an action kind reserved for the
    /// library.
    #[error("action kind {0:?} cannot be sent by the application")]
    Unsendable(ActKind),
    /// The requested packet size cannot fit a fragment header plus one
    /// payload byte.
    #[error("packet size {0} too small")]
    PktSizeTooSmall(usize),
    /// Internal library error.
    #[error("internal: {0}")]
    Internal(&'static str),
}

impl Error {
    /// The stable [`ErrorCode`] class of this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Backend(err) => match err {
                BackendError::CouldNotConnect { .. } => ErrorCode::CouldNotConnect,
                BackendError::Io(_) => ErrorCode::Socket,
                BackendError::NotConnected => ErrorCode::NotConnected,
                BackendError::Closed => ErrorCode::ConnectionClosed,
                BackendError::MalformedUrl { .. }
                | BackendError::UnknownScheme { .. }
                | BackendError::Protocol(_) => ErrorCode::Backend,
            },
            Self::Channel(_) => ErrorCode::Channel,
            Self::Closed => ErrorCode::ConnectionClosed,
            Self::Failed => ErrorCode::Backend,
            Self::NotConnected => ErrorCode::NotConnected,
            Self::NonPrimary => ErrorCode::NonPrimary,
            Self::Aborted => ErrorCode::Aborted,
            Self::Unsendable(_) | Self::PktSizeTooSmall(_) => ErrorCode::Other,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The stable negative integer code of this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.error_code().code()
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}
