//! Splitting actions into transport-sized fragments and reassembling them in
//! delivery order.
//!
//! The backend delivers fragments of one action contiguously relative to
//! other fragments from the same origin; fragments from *different* origins
//! may interleave freely. The [`Reassembler`] therefore keeps one open buffer
//! per `(origin, action id)` pair and enforces contiguity within it - a
//! violation means the backend broke its delivery contract, and the action is
//! torn down rather than tolerated.

use std::iter::FusedIterator;

use ahash::AHashMap;
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    ActKind, MemberId,
    bytes::{TooShort, TryGetExt},
};

/// Metadata stamped on every fragment of an action.
///
/// # Encoded layout
///
/// Big-endian, fixed-width: `origin: u64, action_id: u64, frag_no: u32,
/// frag_total: u32, kind: u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragHeader {
    /// Endpoint that produced the action.
    pub origin: MemberId,
    /// Per-origin monotonic action identifier. Distinct from any seqno: it is
    /// assigned at send time, before the total order is known.
    pub action_id: u64,
    /// Index of this fragment within the action, 0-based.
    pub frag_no: u32,
    /// Total number of fragments in the action, at least 1.
    pub frag_total: u32,
    /// Kind of the carried action.
    pub kind: ActKind,
}

impl FragHeader {
    /// [Encoded] size of this value in bytes.
    ///
    /// [Encoded]: FragHeader::encode
    pub const ENCODE_LEN: usize = std::mem::size_of::<u64>()
        + std::mem::size_of::<u64>()
        + std::mem::size_of::<u32>()
        + std::mem::size_of::<u32>()
        + std::mem::size_of::<u8>();

    /// Encodes this value into a growable byte buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.origin.0);
        buf.put_u64(self.action_id);
        buf.put_u32(self.frag_no);
        buf.put_u32(self.frag_total);
        buf.put_u8(self.kind.as_u8());
    }

    /// Decodes this value from a byte buffer, advancing the cursor past the
    /// header.
    ///
    /// # Errors
    ///
    /// Errors if the buffer is shorter than [`ENCODE_LEN`].
    ///
    /// [`ENCODE_LEN`]: FragHeader::ENCODE_LEN
    pub fn decode(buf: &mut Bytes) -> Result<Self, TooShort> {
        Ok(Self {
            origin: MemberId(buf.try_get_u64()?),
            action_id: buf.try_get_u64()?,
            frag_no: buf.try_get_u32()?,
            frag_total: buf.try_get_u32()?,
            kind: ActKind::from_u8(buf.try_get_u8()?),
        })
    }
}

/// Error that occurs when using [`fragment`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentError {
    /// The packet size cannot fit a fragment header plus at least one payload
    /// byte.
    #[error("packet size {pkt_size} cannot fit a fragment - min {min}")]
    PktSizeTooSmall {
        /// Configured packet size in bytes.
        pkt_size: usize,
        /// Minimum usable packet size in bytes.
        min: usize,
    },
    /// Attempted to fragment an action which was too big.
    #[error("action too big - {len} bytes over {frags} fragments")]
    ActionTooBig {
        /// Length of the action payload in bytes.
        len: usize,
        /// Number of fragments the payload would have required.
        frags: usize,
    },
}

/// Splits one action into fragments of at most `pkt_size` bytes each.
///
/// Returns an exact-size iterator over encoded frames, header included. A
/// zero-length payload still produces exactly one fragment, so that the
/// action is delivered at all.
///
/// # Errors
///
/// Errors if `pkt_size` cannot fit a header plus one payload byte, or if the
/// fragment count would overflow the header's `frag_total` field.
pub fn fragment(
    origin: MemberId,
    action_id: u64,
    kind: ActKind,
    payload: Bytes,
    pkt_size: usize,
) -> Result<Fragments, FragmentError> {
    let min = FragHeader::ENCODE_LEN + 1;
    if pkt_size < min {
        return Err(FragmentError::PktSizeTooSmall { pkt_size, min });
    }

    let budget = pkt_size - FragHeader::ENCODE_LEN;
    let frags = payload.len().div_ceil(budget).max(1);
    let frag_total =
        u32::try_from(frags).map_err(|_| FragmentError::ActionTooBig {
            len: payload.len(),
            frags,
        })?;

    Ok(Fragments {
        origin,
        action_id,
        kind,
        frag_total,
        next_frag: 0,
        budget,
        payload,
    })
}

/// Iterator over the encoded frames of one fragmented action.
///
/// Produced by [`fragment`]. Each frame is an owned [`Bytes`] ready to hand
/// to a backend; payload chunks are cheap reference-counted views of the
/// original buffer.
#[derive(Debug)]
pub struct Fragments {
    origin: MemberId,
    action_id: u64,
    kind: ActKind,
    frag_total: u32,
    next_frag: u32,
    budget: usize,
    payload: Bytes,
}

impl Fragments {
    /// How many fragments this action is split up into.
    #[must_use]
    pub const fn frag_total(&self) -> u32 {
        self.frag_total
    }
}

impl Iterator for Fragments {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_frag == self.frag_total {
            return None;
        }
        let chunk_len = self.payload.len().min(self.budget);
        let chunk = self.payload.split_to(chunk_len);

        let header = FragHeader {
            origin: self.origin,
            action_id: self.action_id,
            frag_no: self.next_frag,
            frag_total: self.frag_total,
            kind: self.kind,
        };
        self.next_frag += 1;

        let mut frame = BytesMut::with_capacity(FragHeader::ENCODE_LEN + chunk.len());
        header.encode(&mut frame);
        frame.put_slice(&chunk);
        Some(frame.freeze())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = (self.frag_total - self.next_frag) as usize;
        (rem, Some(rem))
    }
}

impl ExactSizeIterator for Fragments {}

impl FusedIterator for Fragments {}

/// Error that occurs when using [`Reassembler::reassemble`].
///
/// Any of these means the backend broke its delivery contract for the
/// affected origin. The open buffer for that action is torn down; the error
/// is not fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassembleError {
    /// The fragment total field was zero.
    #[error("zero fragment total")]
    ZeroTotal,
    /// A fragment arrived out of order within its action.
    #[error("fragment {got} out of order - expected {expected}")]
    OutOfOrder {
        /// Fragment index that arrived.
        got: u32,
        /// Fragment index that was expected next.
        expected: u32,
    },
    /// The fragment total changed between fragments of one action.
    #[error("fragment total changed mid-action - got {got}, opened with {opened}")]
    TotalMismatch {
        /// Total carried by the offending fragment.
        got: u32,
        /// Total carried by the fragment that opened the buffer.
        opened: u32,
    },
    /// The action kind changed between fragments of one action.
    #[error("action kind changed mid-action - got {got:?}, opened with {opened:?}")]
    KindMismatch {
        /// Kind carried by the offending fragment.
        got: ActKind,
        /// Kind carried by the fragment that opened the buffer.
        opened: ActKind,
    },
}

#[derive(Debug)]
struct OpenAction {
    kind: ActKind,
    frag_total: u32,
    next_frag: u32,
    payload: BytesMut,
}

/// Accumulates inbound fragments per `(origin, action id)` until an action is
/// complete.
///
/// Reassembly memory is bounded implicitly by backend flow control; there is
/// no explicit cap here.
#[derive(Debug, Default)]
pub struct Reassembler {
    open: AHashMap<(MemberId, u64), OpenAction>,
}

impl Reassembler {
    /// Creates a reassembler with no open buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment in, returning the completed action once its final
    /// fragment arrives.
    ///
    /// # Errors
    ///
    /// Errors if the fragment violates the delivery contract (out-of-order
    /// index, total or kind changing mid-action). The open buffer for the
    /// offending action is dropped; the caller is expected to surface an
    /// [`ActKind::Error`] action for the origin and carry on.
    pub fn reassemble(
        &mut self,
        header: &FragHeader,
        payload: Bytes,
    ) -> Result<Option<(ActKind, Bytes)>, ReassembleError> {
        use std::collections::hash_map::Entry;

        if header.frag_total == 0 {
            return Err(ReassembleError::ZeroTotal);
        }

        let key = (header.origin, header.action_id);
        match self.open.entry(key) {
            Entry::Vacant(entry) => {
                if header.frag_no != 0 {
                    return Err(ReassembleError::OutOfOrder {
                        got: header.frag_no,
                        expected: 0,
                    });
                }
                if header.frag_total == 1 {
                    // single-fragment fast path, no buffering
                    return Ok(Some((header.kind, payload)));
                }
                let mut buf = BytesMut::with_capacity(
                    payload.len() * header.frag_total as usize,
                );
                buf.put_slice(&payload);
                entry.insert(OpenAction {
                    kind: header.kind,
                    frag_total: header.frag_total,
                    next_frag: 1,
                    payload: buf,
                });
                Ok(None)
            }
            Entry::Occupied(mut entry) => {
                let open = entry.get_mut();
                if header.frag_total != open.frag_total {
                    let opened = open.frag_total;
                    entry.remove();
                    return Err(ReassembleError::TotalMismatch {
                        got: header.frag_total,
                        opened,
                    });
                }
                if header.kind != open.kind {
                    let opened = open.kind;
                    entry.remove();
                    return Err(ReassembleError::KindMismatch {
                        got: header.kind,
                        opened,
                    });
                }
                if header.frag_no != open.next_frag {
                    let expected = open.next_frag;
                    entry.remove();
                    return Err(ReassembleError::OutOfOrder {
                        got: header.frag_no,
                        expected,
                    });
                }

                open.payload.put_slice(&payload);
                open.next_frag += 1;
                if open.next_frag == open.frag_total {
                    let open = entry.remove();
                    Ok(Some((open.kind, open.payload.freeze())))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Number of actions with an open reassembly buffer.
    #[must_use]
    pub fn open_actions(&self) -> usize {
        self.open.len()
    }

    /// Drops all open buffers.
    pub fn clear(&mut self) {
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const ORIGIN: MemberId = MemberId(7);
    const PKT: usize = FragHeader::ENCODE_LEN + 4;

    fn feed(reasm: &mut Reassembler, mut frame: Bytes) -> Result<Option<(ActKind, Bytes)>, ReassembleError> {
        let header = FragHeader::decode(&mut frame).unwrap();
        reasm.reassemble(&header, frame)
    }

    #[test]
    fn header_round_trip() {
        let header = FragHeader {
            origin: ORIGIN,
            action_id: 12,
            frag_no: 3,
            frag_total: 4,
            kind: ActKind::Data,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(FragHeader::ENCODE_LEN, buf.len());
        assert_eq!(header, FragHeader::decode(&mut buf.freeze()).unwrap());
    }

    #[test]
    fn single_fragment_round_trip() {
        let mut reasm = Reassembler::new();
        let mut frags = fragment(ORIGIN, 1, ActKind::Data, Bytes::from_static(b"hi"), PKT).unwrap();
        assert_eq!(1, frags.len());

        let frame = frags.next().unwrap();
        assert_matches!(
            feed(&mut reasm, frame),
            Ok(Some((ActKind::Data, payload))) if payload == Bytes::from_static(b"hi")
        );
    }

    #[test]
    fn empty_payload_still_produces_one_fragment() {
        let mut frags = fragment(ORIGIN, 1, ActKind::Data, Bytes::new(), PKT).unwrap();
        assert_eq!(1, frags.frag_total());
        let frame = frags.next().unwrap();
        assert_eq!(FragHeader::ENCODE_LEN, frame.len());
        assert!(frags.next().is_none());
    }

    #[test]
    fn multi_fragment_round_trip() {
        // 10 bytes over a 4-byte budget: 3 fragments
        let payload = Bytes::from_static(b"abcdefghij");
        let mut reasm = Reassembler::new();
        let frags = fragment(ORIGIN, 2, ActKind::Data, payload.clone(), PKT)
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(3, frags.len());

        let [f0, f1, f2] = frags.try_into().unwrap();
        assert_matches!(feed(&mut reasm, f0), Ok(None));
        assert_matches!(feed(&mut reasm, f1), Ok(None));
        assert_matches!(
            feed(&mut reasm, f2),
            Ok(Some((ActKind::Data, out))) if out == payload
        );
        assert_eq!(0, reasm.open_actions());
    }

    #[test]
    fn interleaved_origins_reassemble_independently() {
        let other = MemberId(8);
        let mut reasm = Reassembler::new();
        let [a0, a1] = fragment(ORIGIN, 1, ActKind::Data, Bytes::from_static(b"aaaabb"), PKT)
            .unwrap()
            .collect::<Vec<_>>()
            .try_into()
            .unwrap();
        let [b0, b1] = fragment(other, 1, ActKind::Data, Bytes::from_static(b"ccccdd"), PKT)
            .unwrap()
            .collect::<Vec<_>>()
            .try_into()
            .unwrap();

        assert_matches!(feed(&mut reasm, a0), Ok(None));
        assert_matches!(feed(&mut reasm, b0), Ok(None));
        assert_matches!(
            feed(&mut reasm, a1),
            Ok(Some((_, out))) if out == Bytes::from_static(b"aaaabb")
        );
        assert_matches!(
            feed(&mut reasm, b1),
            Ok(Some((_, out))) if out == Bytes::from_static(b"ccccdd")
        );
    }

    #[test]
    fn out_of_order_fragment_tears_down() {
        let mut reasm = Reassembler::new();
        let [f0, _f1, f2] = fragment(ORIGIN, 3, ActKind::Data, Bytes::from_static(b"abcdefghij"), PKT)
            .unwrap()
            .collect::<Vec<_>>()
            .try_into()
            .unwrap();

        assert_matches!(feed(&mut reasm, f0), Ok(None));
        assert_matches!(
            feed(&mut reasm, f2),
            Err(ReassembleError::OutOfOrder { got: 2, expected: 1 })
        );
        assert_eq!(0, reasm.open_actions());
    }

    #[test]
    fn pkt_size_too_small() {
        assert_matches!(
            fragment(ORIGIN, 1, ActKind::Data, Bytes::new(), FragHeader::ENCODE_LEN),
            Err(FragmentError::PktSizeTooSmall { .. })
        );
    }

    #[test]
    fn random_payloads_round_trip() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let mut rng = StdRng::seed_from_u64(0xace);
        let mut reasm = Reassembler::new();
        for action_id in 0..64 {
            let len = rng.gen_range(0..512);
            let payload = (0..len).map(|_| rng.r#gen::<u8>()).collect::<Vec<_>>();
            let payload = Bytes::from(payload);
            let pkt_size = FragHeader::ENCODE_LEN + rng.gen_range(1..64);

            let mut out = None;
            for frame in
                fragment(ORIGIN, action_id, ActKind::Data, payload.clone(), pkt_size).unwrap()
            {
                assert!(frame.len() <= pkt_size);
                out = feed(&mut reasm, frame).unwrap();
            }
            assert_matches!(out, Some((ActKind::Data, got)) if got == payload);
        }
    }
}
