//! Process-local hub of named channels.

use std::sync::{Arc, LazyLock, Mutex};

use ahash::AHashMap;
use bytes::Bytes;
use crossbeam_channel::Sender;
use replinet_protocol::{BackendError, BackendEvent, MemberId, ViewDesc};

static HUB: LazyLock<Mutex<AHashMap<String, Arc<Group>>>> =
    LazyLock::new(|| Mutex::new(AHashMap::new()));

/// Forces the channel named `channel` into a primary or non-primary
/// configuration, broadcasting the resulting view to every member.
///
/// Returns `false` if no such channel exists yet. A freshly created channel
/// starts out primary.
///
/// This is a test control: real group transports decide primacy through
/// their view-synchrony protocol, the in-process hub has no partitions to
/// detect.
pub fn set_primary(channel: &str, primary: bool) -> bool {
    let group = {
        let hub = HUB.lock().expect("hub lock poisoned");
        hub.get(channel).cloned()
    };
    let Some(group) = group else {
        return false;
    };

    let mut state = group.state.lock().expect("group lock poisoned");
    state.primary = primary;
    state.conf_id += 1;
    state.broadcast_view();
    true
}

#[derive(Debug)]
pub(crate) struct Group {
    name: String,
    state: Mutex<GroupState>,
}

#[derive(Debug)]
struct GroupState {
    members: Vec<Member>,
    conf_id: i64,
    primary: bool,
    next_id: u64,
}

#[derive(Debug)]
struct Member {
    id: MemberId,
    tx: Sender<BackendEvent>,
}

impl Group {
    /// Attaches a new member to the channel named `channel`, creating the
    /// channel if needed.
    ///
    /// The new view, with the member included, is broadcast to everyone -
    /// the joiner's first event is its own membership view.
    pub(crate) fn attach(channel: &str, tx: Sender<BackendEvent>) -> (Arc<Self>, MemberId) {
        let group = {
            let mut hub = HUB.lock().expect("hub lock poisoned");
            hub.entry(channel.to_owned())
                .or_insert_with(|| {
                    Arc::new(Self {
                        name: channel.to_owned(),
                        state: Mutex::new(GroupState {
                            members: Vec::new(),
                            conf_id: 0,
                            primary: true,
                            next_id: 0,
                        }),
                    })
                })
                .clone()
        };

        let id = {
            let mut state = group.state.lock().expect("group lock poisoned");
            let id = MemberId(state.next_id);
            state.next_id += 1;
            state.members.push(Member { id, tx });
            state.conf_id += 1;
            tracing::debug!(channel = %group.name, member = %id, "member joined");
            state.broadcast_view();
            id
        };
        (group, id)
    }

    /// Detaches `id`, broadcasting the shrunk view to the remaining members.
    pub(crate) fn detach(&self, id: MemberId) {
        let mut state = self.state.lock().expect("group lock poisoned");
        let before = state.members.len();
        state.members.retain(|member| member.id != id);
        if state.members.len() == before {
            return;
        }
        state.conf_id += 1;
        tracing::debug!(channel = %self.name, member = %id, "member left");
        state.broadcast_view();
    }

    /// Fans one frame out to every member, the origin included.
    ///
    /// The whole fan-out happens under the group lock, so every member
    /// observes all frames of the channel in one and the same order.
    pub(crate) fn send(&self, origin: MemberId, frame: Bytes) -> Result<(), BackendError> {
        let state = self.state.lock().expect("group lock poisoned");
        if !state.members.iter().any(|member| member.id == origin) {
            return Err(BackendError::NotConnected);
        }
        for member in &state.members {
            // a member whose receiver is gone is about to detach; skip it
            let _ = member.tx.send(BackendEvent::Message {
                origin,
                frame: frame.clone(),
            });
        }
        Ok(())
    }
}

impl GroupState {
    fn broadcast_view(&self) {
        let members = self
            .members
            .iter()
            .map(|member| (member.id, format!("dummy.{}", member.id)))
            .collect::<Vec<_>>();
        for (my_index, member) in self.members.iter().enumerate() {
            let _ = member.tx.send(BackendEvent::View(ViewDesc {
                primary: self.primary,
                conf_id: self.conf_id,
                members: members.clone(),
                my_index,
            }));
        }
    }
}
