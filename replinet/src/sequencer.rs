//! Assignment of global and local seqnos to delivered actions.

use bytes::Bytes;
use replinet_protocol::{ActKind, Action, ConfDesc, Seqno, ViewDesc};

/// Per-connection seqno state, driven by the receive worker.
///
/// `global_next` counts ordered actions across the whole group history;
/// every member computes the same values because all members observe the
/// same ordered stream. `local_next` counts every delivered action of this
/// connection, service actions included, so the local sequence is gapless
/// from 1.
#[derive(Debug)]
pub(crate) struct Sequencer {
    global_next: Seqno,
    local_next: Seqno,
    primary: bool,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            global_next: Seqno(1),
            local_next: Seqno(1),
            primary: false,
        }
    }

    pub const fn is_primary(&self) -> bool {
        self.primary
    }

    /// Stamps one reassembled action with its seqnos.
    ///
    /// An ordered action delivered outside a primary configuration cannot be
    /// totally ordered; it degrades to an [`ActKind::Error`] action with an
    /// ILL global seqno.
    pub fn sequence(&mut self, kind: ActKind, payload: Bytes) -> Action {
        if kind.is_ordered() {
            if self.primary {
                Action {
                    kind,
                    payload,
                    global: self.global_next.get_inc(),
                    local: self.local_next.get_inc(),
                }
            } else {
                Action {
                    kind: ActKind::Error,
                    payload,
                    global: Seqno::ILL,
                    local: self.local_next.get_inc(),
                }
            }
        } else {
            Action {
                kind,
                payload,
                global: Seqno::ILL,
                local: self.local_next.get_inc(),
            }
        }
    }

    /// Turns a membership view into the service action delivered to the
    /// application.
    ///
    /// The action occupies the next local seqno slot but consumes no global
    /// seqno. The descriptor advertises `global_next` as the seqno this
    /// configuration continues from, which is also the value a fresh
    /// total-order monitor must be seeded with.
    pub fn view_change(&mut self, view: &ViewDesc) -> Action {
        self.primary = view.primary;
        let desc = ConfDesc {
            seqno: self.global_next,
            conf_id: view.conf_id,
            my_id: view.my_index,
            members: view.members.iter().map(|(_, name)| name.clone()).collect(),
        };
        let payload = match desc.encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!("undeliverable configuration descriptor: {err}");
                Bytes::new()
            }
        };
        Action {
            kind: if view.primary {
                ActKind::Primary
            } else {
                ActKind::NonPrimary
            },
            payload,
            global: Seqno::ILL,
            local: self.local_next.get_inc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use replinet_protocol::MemberId;

    use super::*;

    fn view(primary: bool, conf_id: i64) -> ViewDesc {
        ViewDesc {
            primary,
            conf_id,
            members: vec![(MemberId(0), "node0".to_owned())],
            my_index: 0,
        }
    }

    #[test]
    fn ordered_actions_get_both_seqnos() {
        let mut seq = Sequencer::new();
        seq.view_change(&view(true, 1));

        let first = seq.sequence(ActKind::Data, Bytes::from_static(b"a"));
        let second = seq.sequence(ActKind::CommitCut, Bytes::new());
        assert_eq!((Seqno(1), Seqno(2)), (first.global, first.local));
        assert_eq!((Seqno(2), Seqno(3)), (second.global, second.local));
    }

    #[test]
    fn unordered_actions_only_get_a_local_seqno() {
        let mut seq = Sequencer::new();
        seq.view_change(&view(true, 1));

        let action = seq.sequence(ActKind::Service, Bytes::new());
        assert_eq!(Seqno::ILL, action.global);
        assert_eq!(Seqno(2), action.local);

        // the global counter did not move
        let data = seq.sequence(ActKind::Data, Bytes::new());
        assert_eq!(Seqno(1), data.global);
    }

    #[test]
    fn ordered_actions_degrade_outside_primary() {
        let mut seq = Sequencer::new();
        seq.view_change(&view(false, 1));

        let action = seq.sequence(ActKind::Data, Bytes::from_static(b"a"));
        assert_eq!(ActKind::Error, action.kind);
        assert_eq!(Seqno::ILL, action.global);
        assert_eq!(Seqno(2), action.local);
    }

    #[test]
    fn views_occupy_local_slots_and_carry_the_continuation() {
        let mut seq = Sequencer::new();

        let primary = seq.view_change(&view(true, 1));
        assert_eq!(ActKind::Primary, primary.kind);
        assert_eq!(Seqno(1), primary.local);
        assert_eq!(Seqno::ILL, primary.global);

        seq.sequence(ActKind::Data, Bytes::new());
        seq.sequence(ActKind::Data, Bytes::new());

        let non_primary = seq.view_change(&view(false, 2));
        assert_eq!(ActKind::NonPrimary, non_primary.kind);
        assert_eq!(Seqno(4), non_primary.local);
        assert!(!seq.is_primary());

        // back to primary: the descriptor continues where the group left off
        let primary = seq.view_change(&view(true, 3));
        let desc = ConfDesc::decode(primary.payload).unwrap();
        assert_eq!(Seqno(3), desc.seqno);

        let data = seq.sequence(ActKind::Data, Bytes::new());
        assert_eq!(Seqno(3), data.global);
    }
}
