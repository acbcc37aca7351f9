//! Capability surface of a concrete group-messaging driver.
//!
//! A backend is the library's single point of contact with the outside
//! world: it joins a named channel, sends messages of bounded size atomically,
//! and delivers inbound messages and membership views. Inside a primary
//! configuration the backend guarantees that all members observe messages in
//! the same total order; this crate consumes that guarantee, it does not
//! implement it.

use std::fmt;

use bytes::Bytes;

/// Identifier of a group endpoint, unique across the life of a channel.
///
/// Assigned by the backend when the endpoint joins; stamped into every
/// fragment header so receivers can tell interleaved origins apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One membership view of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDesc {
    /// Whether total order is established in this configuration. Ordered
    /// actions may be delivered only while this is `true`.
    pub primary: bool,
    /// Configuration identifier, monotonic over the life of the channel.
    pub conf_id: i64,
    /// Members of this configuration, in a group-wide agreed order.
    pub members: Vec<(MemberId, String)>,
    /// Index of this endpoint in [`members`].
    ///
    /// [`members`]: ViewDesc::members
    pub my_index: usize,
}

/// Event produced by [`Backend::recv`].
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A message delivered in total order, possibly our own.
    Message {
        /// Endpoint that sent the message.
        origin: MemberId,
        /// Raw frame bytes, fragment header included.
        frame: Bytes,
    },
    /// The group moved to a new configuration.
    View(ViewDesc),
    /// The backend was closed locally; no further events will arrive.
    Closed,
}

/// Error that occurs when operating a [`Backend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend URL does not have the `"TYPE://ADDRESS"` shape.
    #[error("malformed backend url `{url}`")]
    MalformedUrl {
        /// The offending URL.
        url: String,
    },
    /// The URL scheme does not name a known driver.
    #[error("unknown backend scheme `{scheme}`")]
    UnknownScheme {
        /// The offending scheme.
        scheme: String,
    },
    /// Could not establish a connection to the driver's address.
    #[error("could not connect to `{addr}`")]
    CouldNotConnect {
        /// Address that was dialed.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Operation on a backend which is not joined to a channel.
    #[error("not connected")]
    NotConnected,
    /// Operation on a backend which was already closed.
    #[error("closed")]
    Closed,
    /// The driver or its peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    /// Hard transport failure.
    #[error("transport i/o")]
    Io(#[from] std::io::Error),
}

/// Narrow interface through which the connection core drives a group driver.
///
/// `send` and `recv` take `&self` so that a connection's send and receive
/// workers can operate the same driver concurrently; implementations
/// serialize internally where their transport requires it.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Joins `channel`, creating it if it does not exist yet.
    ///
    /// Processes joined to the same channel receive the same actions. On
    /// success the endpoint has been assigned a [`MemberId`] and the first
    /// membership view is queued for [`recv`].
    ///
    /// [`recv`]: Backend::recv
    fn open(&mut self, channel: &str) -> Result<(), BackendError>;

    /// Identifier assigned to this endpoint at join.
    ///
    /// [`None`] before [`open`] succeeds.
    ///
    /// [`open`]: Backend::open
    fn local_id(&self) -> Option<MemberId>;

    /// Sends one frame to the group, atomically: the frame is delivered
    /// whole to every member or to none.
    ///
    /// The caller is responsible for keeping `frame` within the packet size
    /// it fragments to.
    fn send(&self, frame: Bytes) -> Result<(), BackendError>;

    /// Blocks until the next event is available.
    ///
    /// After [`close`], any parked and all subsequent calls return
    /// [`BackendEvent::Closed`].
    ///
    /// [`close`]: Backend::close
    fn recv(&self) -> Result<BackendEvent, BackendError>;

    /// Detaches from the channel.
    ///
    /// Idempotent. Unblocks any parked [`recv`].
    ///
    /// [`recv`]: Backend::recv
    fn close(&self);
}

/// A parsed `"TYPE://ADDRESS"` backend locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendUrl<'a> {
    /// Driver type, e.g. `"dummy"`, `"spread"`, `"gcomm"`.
    pub scheme: &'a str,
    /// Driver-specific address; may be empty for in-process drivers.
    pub address: &'a str,
}

impl<'a> BackendUrl<'a> {
    /// Parses a backend URL.
    ///
    /// # Errors
    ///
    /// Errors if `url` does not contain a `"://"` separator or has an empty
    /// scheme.
    pub fn parse(url: &'a str) -> Result<Self, BackendError> {
        let (scheme, address) = url
            .split_once("://")
            .ok_or_else(|| BackendError::MalformedUrl {
                url: url.to_owned(),
            })?;
        if scheme.is_empty() {
            return Err(BackendError::MalformedUrl {
                url: url.to_owned(),
            });
        }
        Ok(Self { scheme, address })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_url() {
        assert_eq!(
            BackendUrl {
                scheme: "spread",
                address: "localhost:4803"
            },
            BackendUrl::parse("spread://localhost:4803").unwrap()
        );
        assert_eq!(
            BackendUrl {
                scheme: "dummy",
                address: ""
            },
            BackendUrl::parse("dummy://").unwrap()
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_matches!(
            BackendUrl::parse("dummy"),
            Err(BackendError::MalformedUrl { .. })
        );
        assert_matches!(
            BackendUrl::parse("://addr"),
            Err(BackendError::MalformedUrl { .. })
        );
    }
}
