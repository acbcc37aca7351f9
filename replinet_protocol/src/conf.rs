//! Configuration descriptor carried by [`Primary`] and [`NonPrimary`]
//! actions.
//!
//! [`Primary`]: crate::ActKind::Primary
//! [`NonPrimary`]: crate::ActKind::NonPrimary

use bytes::{Bytes, BytesMut};

use crate::{
    Seqno,
    bytes::{TooShort, TryGetExt, TryPutExt},
};

/// Maximum length in bytes of a member name.
pub const MEMBER_NAME_MAX: usize = 40;

/// Descriptor of a group configuration, delivered to the application as the
/// payload of a [`Primary`] or [`NonPrimary`] action.
///
/// # Encoded layout
///
/// Big-endian: `seqno: u64, conf_id: i64, memb_num: u32, my_id: u32`,
/// followed by `memb_num` NUL-padded [`MEMBER_NAME_MAX`]-byte member name
/// cells.
///
/// [`Primary`]: crate::ActKind::Primary
/// [`NonPrimary`]: crate::ActKind::NonPrimary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfDesc {
    /// Next action seqno in this configuration. A fresh total-order monitor
    /// must be initialized to this value.
    pub seqno: Seqno,
    /// Configuration identifier, monotonic over the life of the channel.
    pub conf_id: i64,
    /// Index of this node in the member list.
    pub my_id: usize,
    /// Member names, in configuration order.
    pub members: Vec<String>,
}

/// Error that occurs when encoding a [`ConfDesc`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfWriteError {
    /// A member name was longer than [`MEMBER_NAME_MAX`] bytes.
    #[error("member name of {len} bytes over max {MEMBER_NAME_MAX}")]
    NameTooLong {
        /// Length of the offending name in bytes.
        len: usize,
    },
    /// There were more members than the descriptor's count field can carry.
    #[error("too many members - {num}")]
    TooManyMembers {
        /// Number of members.
        num: usize,
    },
}

/// Error that occurs when decoding a [`ConfDesc`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfReadError {
    /// The payload ended before the descriptor was complete.
    #[error("payload too short")]
    TooShort(#[from] TooShort),
    /// A member name cell held non-UTF-8 data.
    #[error("member name is not utf-8")]
    BadName,
    /// `my_id` pointed outside the member list.
    #[error("own index {my_id} outside member list of {memb_num}")]
    BadIndex {
        /// Claimed index of this node.
        my_id: usize,
        /// Number of members in the descriptor.
        memb_num: usize,
    },
}

impl ConfDesc {
    /// Number of members in this configuration.
    #[must_use]
    pub fn memb_num(&self) -> usize {
        self.members.len()
    }

    /// Encodes this descriptor into an action payload.
    ///
    /// # Errors
    ///
    /// Errors if a member name exceeds [`MEMBER_NAME_MAX`] bytes or the
    /// member count overflows the count field.
    pub fn encode(&self) -> Result<Bytes, ConfWriteError> {
        let memb_num = u32::try_from(self.members.len())
            .map_err(|_| ConfWriteError::TooManyMembers {
                num: self.members.len(),
            })?;
        let my_id = u32::try_from(self.my_id).map_err(|_| ConfWriteError::TooManyMembers {
            num: self.my_id,
        })?;

        let mut buf = BytesMut::with_capacity(
            Seqno::ENCODE_LEN + 8 + 4 + 4 + self.members.len() * MEMBER_NAME_MAX,
        );
        // writes into a growable buffer cannot run short
        let _ = buf.try_put_u64(self.seqno.0);
        let _ = buf.try_put_i64(self.conf_id);
        let _ = buf.try_put_u32(memb_num);
        let _ = buf.try_put_u32(my_id);
        for name in &self.members {
            let name = name.as_bytes();
            if name.len() > MEMBER_NAME_MAX {
                return Err(ConfWriteError::NameTooLong { len: name.len() });
            }
            let mut cell = [0u8; MEMBER_NAME_MAX];
            cell[..name.len()].copy_from_slice(name);
            let _ = buf.try_put_slice(&cell);
        }
        Ok(buf.freeze())
    }

    /// Decodes a descriptor from an action payload.
    pub fn decode(mut payload: Bytes) -> Result<Self, ConfReadError> {
        let seqno = Seqno(payload.try_get_u64()?);
        let conf_id = payload.try_get_i64()?;
        let memb_num = payload.try_get_u32()? as usize;
        let my_id = payload.try_get_u32()? as usize;
        if my_id >= memb_num {
            return Err(ConfReadError::BadIndex { my_id, memb_num });
        }

        let mut members = Vec::with_capacity(memb_num);
        for _ in 0..memb_num {
            let cell = payload.try_split_to(MEMBER_NAME_MAX)?;
            let len = cell.iter().position(|&b| b == 0).unwrap_or(MEMBER_NAME_MAX);
            let name = std::str::from_utf8(&cell[..len]).map_err(|_| ConfReadError::BadName)?;
            members.push(name.to_owned());
        }

        Ok(Self {
            seqno,
            conf_id,
            my_id,
            members,
        })
    }
}
