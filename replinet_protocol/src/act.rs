//! Application-visible units of replication.

use bytes::Bytes;

use crate::Seqno;

/// Kind of an action exchanged through a replication group.
///
/// Ordered kinds ([`Data`], [`CommitCut`]) are serialized in the group-wide
/// total order and carry a global seqno on delivery. Unordered kinds carry
/// [`Seqno::ILL`] as their global seqno. The application may only send
/// [`Data`] and [`Snapshot`]; all other kinds are synthesized by the library.
///
/// [`Data`]: ActKind::Data
/// [`CommitCut`]: ActKind::CommitCut
/// [`Snapshot`]: ActKind::Snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActKind {
    /// Application data, sent by the application.
    Data,
    /// Group-wide commit cut.
    CommitCut,
    /// Request for a state snapshot.
    Snapshot,
    /// The group reached a primary configuration; the payload is an encoded
    /// [`ConfDesc`].
    ///
    /// [`ConfDesc`]: crate::ConfDesc
    Primary,
    /// Service action produced by the library, such as a last-applied
    /// watermark advertisement.
    Service,
    /// The group reached a non-primary configuration; the payload is an
    /// encoded [`ConfDesc`].
    ///
    /// [`ConfDesc`]: crate::ConfDesc
    NonPrimary,
    /// An error occurred while receiving the action; the payload is empty.
    Error,
    /// Unknown action kind.
    Unknown,
}

impl ActKind {
    /// Whether actions of this kind are serialized in the group-wide total
    /// order and carry a global seqno on delivery.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::Data | Self::CommitCut)
    }

    /// Whether the application may submit actions of this kind itself.
    #[must_use]
    pub const fn is_sendable(self) -> bool {
        matches!(self, Self::Data | Self::Snapshot)
    }

    /// One-byte wire encoding of this kind.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::CommitCut => 1,
            Self::Snapshot => 2,
            Self::Primary => 3,
            Self::Service => 4,
            Self::NonPrimary => 5,
            Self::Error => 6,
            Self::Unknown => 7,
        }
    }

    /// Decodes a kind from its one-byte wire encoding.
    ///
    /// Unrecognized values decode to [`ActKind::Unknown`] rather than failing,
    /// so that a newer peer cannot wedge an older one.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Data,
            1 => Self::CommitCut,
            2 => Self::Snapshot,
            3 => Self::Primary,
            4 => Self::Service,
            5 => Self::NonPrimary,
            6 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// An action delivered to the application.
///
/// The payload buffer is owned by the holder of this value; a receiver is
/// handed a freshly reassembled buffer and may keep it for as long as it
/// likes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Kind of this action.
    pub kind: ActKind,
    /// Payload bytes, possibly empty.
    pub payload: Bytes,
    /// Global seqno, unique across the whole group history for ordered kinds;
    /// [`Seqno::ILL`] otherwise.
    pub global: Seqno,
    /// Local seqno, gapless and monotonic starting at 1 across all actions
    /// delivered by one connection.
    pub local: Seqno,
}
