//! Total-order monitor: a seqno-indexed barrier for serializing critical
//! sections.
//!
//! Application threads that received actions with global seqnos use a
//! [`Monitor`] to apply them to shared state in exactly that order: each
//! thread [`grab`]s its seqno, runs its critical section, and [`release`]s.
//! `grab(s)` returns exactly after `release(s - 1)`.
//!
//! The monitor is a ring of `len` slots indexed by `seqno % len`. The ring
//! bounds memory and naturally rejects applications whose working set of
//! in-flight seqnos exceeds the configured concurrency; per-slot condition
//! variables give O(1) wake-up on release with no thundering herd.
//!
//! [`grab`]: Monitor::grab
//! [`release`]: Monitor::release

use std::sync::{
    Condvar, Mutex,
    atomic::{AtomicU64, Ordering},
};

use replinet_protocol::Seqno;

use crate::ErrorCode;

/// Error type for operations on a [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ToError {
    /// The seqno is outside the usable range: already released, already
    /// used, or the slot is not in a state the operation applies to. An
    /// application ordering bug.
    #[error("seqno out of range")]
    OutOfRange,
    /// The seqno is too far ahead of the released watermark for the ring to
    /// hold. It is safe to retry later, once earlier seqnos have been
    /// released.
    #[error("too many seqnos in flight")]
    Again,
    /// The wait was cancelled or withdrawn.
    #[error("wait aborted")]
    Aborted,
    /// The monitor still has parked waiters.
    #[error("waiters still parked")]
    Busy,
}

impl ToError {
    /// The stable negative integer code of this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::OutOfRange => ErrorCode::OutOfRange.code(),
            Self::Again => ErrorCode::Again.code(),
            Self::Aborted => ErrorCode::Aborted.code(),
            Self::Busy => ErrorCode::Busy.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Nothing claimed this slot.
    Empty,
    /// A thread is parked in [`Monitor::grab`] on this slot.
    Waiting,
    /// The predecessor was released while a thread was parked; the waiter
    /// owns the slot as soon as it wakes.
    Ready,
    /// A thread grabbed this seqno and has not released it yet.
    Used,
    /// The seqno was cancelled; the release watermark skips over it.
    Cancelled,
    /// The waiter withdrew and must renew before grabbing again. Blocks the
    /// release watermark until renewed or self-cancelled.
    Withdrawn,
}

#[derive(Debug)]
struct Ring {
    /// Highest released seqno; `grab(released + 1)` proceeds immediately.
    released: u64,
    /// Number of threads parked in [`Monitor::grab`].
    waiters: usize,
    slots: Box<[SlotState]>,
}

/// Seqno-ordered barrier. See the [module-level documentation](self).
#[derive(Debug)]
pub struct Monitor {
    ring: Mutex<Ring>,
    /// One condition per slot, indexed like `Ring::slots`.
    cond: Box<[Condvar]>,
    /// Mirror of `Ring::released` for the lock-free [`Monitor::seqno`].
    released: AtomicU64,
    len: u64,
}

impl Monitor {
    /// Creates a monitor of `len` slots whose first grabbable seqno is
    /// `seqno_0`.
    ///
    /// `len` should be no less than the maximum number of threads competing
    /// for the resource. `seqno_0` is normally 1, or the `seqno` field of
    /// the latest [`ConfDesc`].
    ///
    /// # Panics
    ///
    /// Panics if `len` is 0 or `seqno_0` is 0 or ILL.
    ///
    /// [`ConfDesc`]: replinet_protocol::ConfDesc
    #[must_use]
    pub fn new(len: usize, seqno_0: Seqno) -> Self {
        assert!(len > 0, "ring length must be positive");
        assert!(
            seqno_0.0 > 0 && !seqno_0.is_ill(),
            "starting seqno must be a valid group seqno"
        );
        let released = seqno_0.0 - 1;
        Self {
            ring: Mutex::new(Ring {
                released,
                waiters: 0,
                slots: vec![SlotState::Empty; len].into_boxed_slice(),
            }),
            cond: (0..len).map(|_| Condvar::new()).collect(),
            released: AtomicU64::new(released),
            len: len as u64,
        }
    }

    /// Grabs the critical section for seqno `s`, blocking until
    /// `release(s - 1)`.
    ///
    /// # Errors
    ///
    /// - [`ToError::OutOfRange`] if `s` was already released or the slot is
    ///   claimed by another thread;
    /// - [`ToError::Again`] if `s` is more than the ring length ahead of the
    ///   released watermark;
    /// - [`ToError::Aborted`] if `s` was cancelled or withdrawn, now or
    ///   while parked.
    pub fn grab(&self, s: Seqno) -> Result<(), ToError> {
        let mut ring = self.lock_ring();
        self.check_range(&ring, s)?;
        let idx = self.index(s);

        match ring.slots[idx] {
            SlotState::Cancelled | SlotState::Withdrawn => return Err(ToError::Aborted),
            SlotState::Waiting | SlotState::Ready | SlotState::Used => {
                return Err(ToError::OutOfRange);
            }
            SlotState::Empty => {}
        }

        if s.0 == ring.released + 1 {
            ring.slots[idx] = SlotState::Used;
            return Ok(());
        }

        ring.slots[idx] = SlotState::Waiting;
        ring.waiters += 1;
        loop {
            ring = self
                .cond[idx]
                .wait(ring)
                .expect("ring lock poisoned");
            match ring.slots[idx] {
                SlotState::Ready => {
                    ring.slots[idx] = SlotState::Used;
                    ring.waiters -= 1;
                    return Ok(());
                }
                SlotState::Cancelled | SlotState::Withdrawn => {
                    ring.waiters -= 1;
                    return Err(ToError::Aborted);
                }
                // spurious wake-up
                _ => {}
            }
        }
    }

    /// Releases the critical section for seqno `s` and wakes the waiter for
    /// `s + 1`, if any.
    ///
    /// Must be called by the thread that successfully grabbed `s`.
    ///
    /// # Errors
    ///
    /// [`ToError::OutOfRange`] if `s` is not the seqno currently being held
    /// - releasing out of order is an application error.
    pub fn release(&self, s: Seqno) -> Result<(), ToError> {
        let mut ring = self.lock_ring();
        let idx = self.index(s);
        if s.0 != ring.released + 1 || ring.slots[idx] != SlotState::Used {
            return Err(ToError::OutOfRange);
        }
        ring.slots[idx] = SlotState::Empty;
        ring.released = s.0;
        self.advance(&mut ring);
        Ok(())
    }

    /// Cancels the waiter for seqno `s`, making a present or future
    /// [`grab(s)`] return [`ToError::Aborted`].
    ///
    /// Callable from any thread, typically the current holder of an earlier
    /// seqno. The cancelled seqno is skipped when the release watermark
    /// reaches it, so cancellation never stalls the sequence.
    ///
    /// # Errors
    ///
    /// - [`ToError::OutOfRange`] if `s` was already released or is currently
    ///   held;
    /// - [`ToError::Again`] if `s` is too far ahead for the ring to mark.
    ///
    /// [`grab(s)`]: Monitor::grab
    pub fn cancel(&self, s: Seqno) -> Result<(), ToError> {
        let mut ring = self.lock_ring();
        self.check_range(&ring, s)?;
        let idx = self.index(s);

        match ring.slots[idx] {
            SlotState::Used | SlotState::Ready => Err(ToError::OutOfRange),
            SlotState::Waiting => {
                ring.slots[idx] = SlotState::Cancelled;
                self.cond[idx].notify_one();
                Ok(())
            }
            SlotState::Empty | SlotState::Withdrawn | SlotState::Cancelled => {
                ring.slots[idx] = SlotState::Cancelled;
                Ok(())
            }
        }
    }

    /// Cancels seqno `s` on the caller's own behalf, without ever grabbing
    /// it, and lets the release watermark pass through it.
    ///
    /// Used when the application knows it will never execute `s` - for
    /// example after its own transaction was rolled back. Unlike
    /// [`cancel`], an adjacent self-cancel (`s` right above the watermark)
    /// advances the watermark immediately.
    ///
    /// # Errors
    ///
    /// - [`ToError::OutOfRange`] if `s` was already released, is held, or
    ///   has a parked waiter;
    /// - [`ToError::Again`] if `s` is too far ahead for the ring to mark.
    ///
    /// [`cancel`]: Monitor::cancel
    pub fn self_cancel(&self, s: Seqno) -> Result<(), ToError> {
        let mut ring = self.lock_ring();
        self.check_range(&ring, s)?;
        let idx = self.index(s);

        match ring.slots[idx] {
            SlotState::Used | SlotState::Ready | SlotState::Waiting => Err(ToError::OutOfRange),
            SlotState::Empty | SlotState::Withdrawn | SlotState::Cancelled => {
                if s.0 == ring.released + 1 {
                    ring.slots[idx] = SlotState::Empty;
                    ring.released = s.0;
                    self.advance(&mut ring);
                } else {
                    ring.slots[idx] = SlotState::Cancelled;
                }
                Ok(())
            }
        }
    }

    /// Withdraws the parked waiter for seqno `s` from its waiting state
    /// without consuming the slot; the parked [`grab`] returns
    /// [`ToError::Aborted`].
    ///
    /// A withdrawn slot **blocks** the release watermark: the withdrawing
    /// thread must either [`renew_wait`] and [`grab`] again, or
    /// [`self_cancel`] to unblock the sequence.
    ///
    /// # Errors
    ///
    /// - [`ToError::OutOfRange`] if `s` was already released or has no
    ///   parked waiter;
    /// - [`ToError::Again`] if `s` is too far ahead for the ring to address.
    ///
    /// [`grab`]: Monitor::grab
    /// [`renew_wait`]: Monitor::renew_wait
    /// [`self_cancel`]: Monitor::self_cancel
    pub fn withdraw(&self, s: Seqno) -> Result<(), ToError> {
        let mut ring = self.lock_ring();
        // same window bound as grab: a slot index is only meaningful for
        // seqnos in (released, released + len]
        self.check_range(&ring, s)?;
        let idx = self.index(s);
        if ring.slots[idx] != SlotState::Waiting {
            return Err(ToError::OutOfRange);
        }
        ring.slots[idx] = SlotState::Withdrawn;
        self.cond[idx].notify_one();
        Ok(())
    }

    /// Re-arms a withdrawn slot so that `s` can be grabbed again.
    ///
    /// # Errors
    ///
    /// - [`ToError::OutOfRange`] if `s` was already released or its slot is
    ///   not withdrawn;
    /// - [`ToError::Again`] if `s` is too far ahead for the ring to address.
    pub fn renew_wait(&self, s: Seqno) -> Result<(), ToError> {
        let mut ring = self.lock_ring();
        self.check_range(&ring, s)?;
        let idx = self.index(s);
        if ring.slots[idx] != SlotState::Withdrawn {
            return Err(ToError::OutOfRange);
        }
        ring.slots[idx] = SlotState::Empty;
        Ok(())
    }

    /// A conservative lower bound on the last released seqno.
    ///
    /// No locks are taken; the true watermark may already be higher, but the
    /// returned seqno is guaranteed to be no longer in use. Since group
    /// seqnos start at 1, this can return 0.
    #[must_use]
    pub fn seqno(&self) -> Seqno {
        Seqno(self.released.load(Ordering::Acquire))
    }

    /// Checks that the monitor is quiescent and may be dropped.
    ///
    /// Dropping the monitor is what releases its memory; this check lets an
    /// owner of a shared handle verify that no thread is still parked in
    /// [`grab`] before letting go. Drain the waiters (release, [`cancel`])
    /// and retry on failure.
    ///
    /// # Errors
    ///
    /// [`ToError::Busy`] while any thread is parked in [`grab`].
    ///
    /// [`grab`]: Monitor::grab
    /// [`cancel`]: Monitor::cancel
    pub fn destroy(&self) -> Result<(), ToError> {
        if self.lock_ring().waiters > 0 {
            return Err(ToError::Busy);
        }
        Ok(())
    }

    fn lock_ring(&self) -> std::sync::MutexGuard<'_, Ring> {
        self.ring.lock().expect("ring lock poisoned")
    }

    fn index(&self, s: Seqno) -> usize {
        (s.0 % self.len) as usize
    }

    fn check_range(&self, ring: &Ring, s: Seqno) -> Result<(), ToError> {
        if s.is_ill() || s.0 <= ring.released {
            return Err(ToError::OutOfRange);
        }
        if s.0 - ring.released > self.len {
            return Err(ToError::Again);
        }
        Ok(())
    }

    /// Skips the watermark over any contiguous run of cancelled slots, then
    /// hands the next slot to its waiter if one is parked.
    fn advance(&self, ring: &mut Ring) {
        loop {
            let idx = self.index(Seqno(ring.released + 1));
            match ring.slots[idx] {
                SlotState::Cancelled => {
                    ring.slots[idx] = SlotState::Empty;
                    ring.released += 1;
                }
                SlotState::Waiting => {
                    ring.slots[idx] = SlotState::Ready;
                    self.cond[idx].notify_one();
                    break;
                }
                _ => break,
            }
        }
        self.released.store(ring.released, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn grab_and_release_in_order() {
        let to = Monitor::new(4, Seqno(1));
        assert_eq!(Seqno(0), to.seqno());

        to.grab(Seqno(1)).unwrap();
        to.release(Seqno(1)).unwrap();
        to.grab(Seqno(2)).unwrap();
        to.release(Seqno(2)).unwrap();
        assert_eq!(Seqno(2), to.seqno());
        to.destroy().unwrap();
    }

    #[test]
    fn released_seqno_is_out_of_range() {
        let to = Monitor::new(4, Seqno(1));
        to.grab(Seqno(1)).unwrap();
        to.release(Seqno(1)).unwrap();
        assert_matches!(to.grab(Seqno(1)), Err(ToError::OutOfRange));
        assert_matches!(to.cancel(Seqno(1)), Err(ToError::OutOfRange));
    }

    #[test]
    fn far_ahead_is_again() {
        let to = Monitor::new(4, Seqno(1));
        assert_matches!(to.grab(Seqno(5)), Err(ToError::Again));
        // 4 = released + len is the furthest markable seqno
        assert_matches!(to.cancel(Seqno(4)), Ok(()));
    }

    #[test]
    fn release_out_of_order_is_an_error() {
        let to = Monitor::new(4, Seqno(1));
        to.grab(Seqno(1)).unwrap();
        assert_matches!(to.release(Seqno(2)), Err(ToError::OutOfRange));
        to.release(Seqno(1)).unwrap();
        assert_matches!(to.release(Seqno(1)), Err(ToError::OutOfRange));
    }

    #[test]
    fn cancelled_seqno_aborts_grab_and_is_skipped() {
        let to = Monitor::new(4, Seqno(1));
        to.cancel(Seqno(2)).unwrap();

        to.grab(Seqno(1)).unwrap();
        assert_matches!(to.grab(Seqno(2)), Err(ToError::Aborted));

        // releasing 1 skips the cancelled 2: seqno 3 becomes adjacent
        to.release(Seqno(1)).unwrap();
        assert_eq!(Seqno(2), to.seqno());
        to.grab(Seqno(3)).unwrap();
        to.release(Seqno(3)).unwrap();
    }

    #[test]
    fn self_cancel_adjacent_advances_immediately() {
        let to = Monitor::new(4, Seqno(1));
        to.self_cancel(Seqno(1)).unwrap();
        assert_eq!(Seqno(1), to.seqno());
        to.grab(Seqno(2)).unwrap();
        to.release(Seqno(2)).unwrap();
    }

    #[test]
    fn self_cancel_ahead_is_skipped_on_release() {
        let to = Monitor::new(4, Seqno(1));
        to.grab(Seqno(1)).unwrap();
        to.self_cancel(Seqno(2)).unwrap();
        to.self_cancel(Seqno(3)).unwrap();
        to.release(Seqno(1)).unwrap();
        assert_eq!(Seqno(3), to.seqno());
    }

    #[test]
    fn renew_requires_a_withdrawn_slot() {
        let to = Monitor::new(4, Seqno(1));
        assert_matches!(to.renew_wait(Seqno(2)), Err(ToError::OutOfRange));
        assert_matches!(to.withdraw(Seqno(2)), Err(ToError::OutOfRange));
    }

    #[test]
    fn withdraw_and_renew_are_window_bounded() {
        let to = Monitor::new(4, Seqno(1));
        // the ring can only address (released, released + len] = (0, 4]
        assert_matches!(to.withdraw(Seqno(5)), Err(ToError::Again));
        assert_matches!(to.renew_wait(Seqno(5)), Err(ToError::Again));
        assert_matches!(to.withdraw(Seqno::ILL), Err(ToError::OutOfRange));
        assert_matches!(to.renew_wait(Seqno::ILL), Err(ToError::OutOfRange));
    }

    #[test]
    fn double_grab_is_an_error() {
        let to = Monitor::new(4, Seqno(1));
        to.grab(Seqno(1)).unwrap();
        assert_matches!(to.grab(Seqno(1)), Err(ToError::OutOfRange));
    }

    #[test]
    fn ill_seqno_is_rejected() {
        let to = Monitor::new(4, Seqno(1));
        assert_matches!(to.grab(Seqno::ILL), Err(ToError::OutOfRange));
    }

    #[test]
    fn seqno_zero_start() {
        // seqno_0 = 1 means the conservative estimate starts at 0
        let to = Monitor::new(1024, Seqno(1));
        assert_eq!(Seqno(0), to.seqno());
    }

    #[test]
    fn error_codes() {
        assert_eq!(-0x10b, ToError::OutOfRange.code());
        assert_eq!(-0x10a, ToError::Again.code());
        assert_eq!(-0x109, ToError::Aborted.code());
    }
}
