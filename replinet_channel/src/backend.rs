//! The `dummy://` backend driver.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use replinet_protocol::{Backend, BackendError, BackendEvent, MemberId};

use crate::group::Group;

/// Implementation of [`Backend`] over the process-local channel hub.
///
/// Selected by the `dummy://` URL scheme; the address part of the URL is
/// ignored, endpoints meet purely by channel name.
#[derive(Debug, Default)]
pub struct ChannelBackend {
    attached: Option<Attached>,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Attached {
    group: Arc<Group>,
    id: MemberId,
    rx: Receiver<BackendEvent>,
}

impl ChannelBackend {
    /// Creates a backend which is not attached to any channel yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for ChannelBackend {
    fn open(&mut self, channel: &str) -> Result<(), BackendError> {
        if self.attached.is_some() {
            return Err(BackendError::Protocol("backend already open"));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let (group, id) = Group::attach(channel, tx);
        self.attached = Some(Attached { group, id, rx });
        Ok(())
    }

    fn local_id(&self) -> Option<MemberId> {
        self.attached.as_ref().map(|attached| attached.id)
    }

    fn send(&self, frame: Bytes) -> Result<(), BackendError> {
        let attached = self.attached.as_ref().ok_or(BackendError::NotConnected)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        attached.group.send(attached.id, frame)
    }

    fn recv(&self) -> Result<BackendEvent, BackendError> {
        let attached = self.attached.as_ref().ok_or(BackendError::NotConnected)?;
        // after close the hub has dropped our sender; drain what is buffered,
        // then report Closed
        Ok(attached.rx.recv().unwrap_or(BackendEvent::Closed))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(attached) = &self.attached {
            attached.group.detach(attached.id);
        }
    }
}

impl Drop for ChannelBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn recv_view(backend: &ChannelBackend) -> replinet_protocol::ViewDesc {
        match backend.recv() {
            Ok(BackendEvent::View(view)) => view,
            other => panic!("expected view, got {other:?}"),
        }
    }

    #[test]
    fn join_delivers_own_view() {
        let mut backend = ChannelBackend::new();
        backend.open("backend.join").unwrap();

        let view = recv_view(&backend);
        assert!(view.primary);
        assert_eq!(1, view.members.len());
        assert_eq!(view.members[view.my_index].0, backend.local_id().unwrap());
    }

    #[test]
    fn fan_out_is_totally_ordered() {
        let mut a = ChannelBackend::new();
        let mut b = ChannelBackend::new();
        a.open("backend.order").unwrap();
        b.open("backend.order").unwrap();

        // drain views: a sees two (own join, b's join), b sees one
        recv_view(&a);
        recv_view(&a);
        recv_view(&b);

        a.send(Bytes::from_static(b"one")).unwrap();
        b.send(Bytes::from_static(b"two")).unwrap();

        let on_a = [a.recv().unwrap(), a.recv().unwrap()];
        let on_b = [b.recv().unwrap(), b.recv().unwrap()];
        for (x, y) in on_a.iter().zip(on_b.iter()) {
            match (x, y) {
                (
                    BackendEvent::Message { origin: o1, frame: f1 },
                    BackendEvent::Message { origin: o2, frame: f2 },
                ) => {
                    assert_eq!(o1, o2);
                    assert_eq!(f1, f2);
                }
                other => panic!("expected messages, got {other:?}"),
            }
        }
    }

    #[test]
    fn close_unblocks_recv_with_closed() {
        let mut backend = ChannelBackend::new();
        backend.open("backend.close").unwrap();
        recv_view(&backend);

        backend.close();
        assert_matches!(backend.recv(), Ok(BackendEvent::Closed));
        assert_matches!(backend.send(Bytes::new()), Err(BackendError::Closed));
    }

    #[test]
    fn leave_shrinks_the_view() {
        let mut a = ChannelBackend::new();
        let mut b = ChannelBackend::new();
        a.open("backend.leave").unwrap();
        b.open("backend.leave").unwrap();
        recv_view(&a);
        recv_view(&a);
        recv_view(&b);

        b.close();
        let view = recv_view(&a);
        assert_eq!(1, view.members.len());
        assert_eq!(view.members[0].0, a.local_id().unwrap());
    }

    #[test]
    fn set_primary_broadcasts_views() {
        let mut backend = ChannelBackend::new();
        backend.open("backend.primary").unwrap();
        recv_view(&backend);

        assert!(crate::set_primary("backend.primary", false));
        let view = recv_view(&backend);
        assert!(!view.primary);

        assert!(crate::set_primary("backend.primary", true));
        let view = recv_view(&backend);
        assert!(view.primary);

        assert!(!crate::set_primary("backend.no-such-channel", true));
    }
}
