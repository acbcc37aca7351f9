//! Sequence number identifying an action in the history of a replication
//! group.
//!
//! Unlike a transport-level packet sequence, a group seqno never wraps: the
//! group history is counted in a [`u64`], with [`Seqno::ILL`] reserved as the
//! "not ordered / not applicable" sentinel. Valid group seqnos start at 1;
//! local (per-connection) seqnos also start at 1.

use std::fmt;

/// Sequence number of an action in the group history.
///
/// See the [module-level documentation](self).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seqno(pub u64);

impl Seqno {
    /// Sentinel for an action that was not serialized in total order.
    pub const ILL: Self = Self(u64::MAX);

    /// [Encoded] size of this value in bytes.
    ///
    /// [Encoded]: crate::bytes::TryPutExt::try_put_u64
    pub const ENCODE_LEN: usize = std::mem::size_of::<u64>();

    /// Returns the current value and increments `self`.
    #[must_use]
    pub fn get_inc(&mut self) -> Self {
        let cur = *self;
        self.0 = self.0.wrapping_add(1);
        cur
    }

    /// Whether this is the [`Seqno::ILL`] sentinel.
    #[must_use]
    pub const fn is_ill(self) -> bool {
        self.0 == Self::ILL.0
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ill() {
            write!(f, "ILL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for Seqno {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
