//! Connection to a replication group.

use std::{
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
};

use ahash::AHashMap;
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use replinet_protocol::{
    ActKind, Action, Backend, BackendEvent, FragHeader, MemberId, Reassembler, Seqno, fragment,
};

use crate::{Config, Error, LogLevel, sequencer::Sequencer};

/// Default maximum network packet size in bytes, sized to a standard
/// Ethernet frame.
pub const DEFAULT_PKT_SIZE: usize = 1500;

/// Capacity of the outgoing action queue. A full queue blocks senders, which
/// is how backend backpressure reaches the application.
const OUT_QUEUE_CAP: usize = 64;

const STATE_CREATED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;
const STATE_FAILED: u8 = 3;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Backend bound, channel not joined yet.
    Created,
    /// Joined to a channel; actions flow.
    Open,
    /// Closed by the application; all operations fail with a closed error.
    Closed,
    /// Terminal state after a backend hard failure; the connection must be
    /// dropped.
    Failed,
}

/// Byte and action counters of a [`Connection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    /// Payload bytes accepted by [`Connection::send`] and
    /// [`Connection::replicate`].
    pub bytes_sent: usize,
    /// Payload bytes handed out by [`Connection::recv`].
    pub bytes_recv: usize,
    /// Actions accepted by [`Connection::send`] and
    /// [`Connection::replicate`].
    pub actions_sent: usize,
    /// Actions handed out by [`Connection::recv`].
    pub actions_recv: usize,
}

enum Outgoing {
    Action {
        kind: ActKind,
        payload: Bytes,
        action_id: u64,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum ReplOutcome {
    Delivered(Seqno, Seqno),
    NonPrimary,
    Closed,
    Failed,
}

/// Wait-object pairing an in-flight [`Connection::replicate`] with the
/// delivery of its own action.
#[derive(Default)]
struct ReplSlot {
    outcome: Mutex<Option<ReplOutcome>>,
    cond: Condvar,
}

impl ReplSlot {
    fn complete(&self, outcome: ReplOutcome) {
        *self.outcome.lock().expect("repl slot lock poisoned") = Some(outcome);
        self.cond.notify_one();
    }

    fn wait(&self) -> ReplOutcome {
        let mut outcome = self.outcome.lock().expect("repl slot lock poisoned");
        loop {
            if let Some(outcome) = outcome.take() {
                return outcome;
            }
            outcome = self
                .cond
                .wait(outcome)
                .expect("repl slot lock poisoned");
        }
    }
}

enum Lifecycle {
    Created {
        backend: Box<dyn Backend>,
        out_rx: Receiver<Outgoing>,
        delivery_tx: Sender<Action>,
    },
    Open {
        backend: Arc<dyn Backend>,
    },
    Closed,
}

struct Shared {
    config: Arc<Config>,
    state: AtomicU8,
    pkt_size: AtomicUsize,
    next_action_id: AtomicU64,
    out_tx: Sender<Outgoing>,
    delivery_rx: Receiver<Action>,
    repl: Mutex<AHashMap<u64, Arc<ReplSlot>>>,
    bytes_sent: AtomicUsize,
    bytes_recv: AtomicUsize,
    actions_sent: AtomicUsize,
    actions_recv: AtomicUsize,
}

impl Shared {
    fn mark_failed(&self) {
        let _ = self.state.compare_exchange(
            STATE_OPEN,
            STATE_FAILED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Completes and forgets every registered replicate wait-object.
    fn drain_repl(&self, outcome: ReplOutcome) {
        let slots = {
            let mut repl = self.repl.lock().expect("repl lock poisoned");
            repl.drain().map(|(_, slot)| slot).collect::<Vec<_>>()
        };
        for slot in slots {
            slot.complete(outcome);
        }
    }
}

/// Handle to a replication group.
///
/// Lifecycle: [`create`] binds a backend driver, [`open`] joins a channel
/// and starts the connection's send and receive workers, [`close`] drains
/// them, and dropping the handle releases everything (a drop while open
/// closes first). All operations take `&self` and may be called from any
/// number of threads concurrently.
///
/// [`create`]: Connection::create
/// [`open`]: Connection::open
/// [`close`]: Connection::close
pub struct Connection {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Creates a connection over the backend specified by `url`, in the form
    /// `"TYPE://ADDRESS"` - for example `"dummy://"`, or
    /// `"spread://localhost:4803"`.
    ///
    /// # Errors
    ///
    /// Errors if the URL is malformed or names an unknown backend scheme.
    pub fn create(url: &str, config: Arc<Config>) -> Result<Self, Error> {
        let backend = crate::backend::create(url)?;
        let (out_tx, out_rx) = crossbeam_channel::bounded(OUT_QUEUE_CAP);
        let (delivery_tx, delivery_rx) = crossbeam_channel::unbounded();
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state: AtomicU8::new(STATE_CREATED),
                pkt_size: AtomicUsize::new(DEFAULT_PKT_SIZE),
                next_action_id: AtomicU64::new(1),
                out_tx,
                delivery_rx,
                repl: Mutex::default(),
                bytes_sent: AtomicUsize::new(0),
                bytes_recv: AtomicUsize::new(0),
                actions_sent: AtomicUsize::new(0),
                actions_recv: AtomicUsize::new(0),
            }),
            lifecycle: Mutex::new(Lifecycle::Created {
                backend,
                out_rx,
                delivery_tx,
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Joins `channel`, creating it if it does not exist yet.
    ///
    /// Processes joined to the same channel receive the same actions. The
    /// first action received is typically the [`Primary`] view of the joined
    /// configuration.
    ///
    /// # Errors
    ///
    /// Errors if the channel name is empty, the connection is not in the
    /// created state, or the backend cannot join.
    ///
    /// [`Primary`]: ActKind::Primary
    pub fn open(&self, channel: &str) -> Result<(), Error> {
        if channel.is_empty() {
            return Err(Error::Channel("channel name is empty".to_owned()));
        }

        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
        match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::Created {
                mut backend,
                out_rx,
                delivery_tx,
            } => {
                if let Err(err) = backend.open(channel) {
                    *lifecycle = Lifecycle::Created {
                        backend,
                        out_rx,
                        delivery_tx,
                    };
                    return Err(Error::Backend(err));
                }
                let Some(local_id) = backend.local_id() else {
                    self.shared.state.store(STATE_FAILED, Ordering::Release);
                    return Err(Error::Internal("backend did not assign a member id"));
                };

                let backend: Arc<dyn Backend> = Arc::from(backend);
                self.shared.state.store(STATE_OPEN, Ordering::Release);
                self.shared
                    .config
                    .log(LogLevel::Info, &format!("joined channel `{channel}`"));

                let send_worker = {
                    let shared = Arc::clone(&self.shared);
                    let backend = Arc::clone(&backend);
                    thread::Builder::new()
                        .name("replinet-send".to_owned())
                        .spawn(move || run_send(&shared, &*backend, &out_rx, local_id))
                };
                let recv_worker = {
                    let shared = Arc::clone(&self.shared);
                    let backend = Arc::clone(&backend);
                    thread::Builder::new()
                        .name("replinet-recv".to_owned())
                        .spawn(move || run_recv(&shared, &*backend, delivery_tx, local_id))
                };
                match (send_worker, recv_worker) {
                    (Ok(send_worker), Ok(recv_worker)) => {
                        let mut workers = self.workers.lock().expect("workers lock poisoned");
                        workers.push(send_worker);
                        workers.push(recv_worker);
                        *lifecycle = Lifecycle::Open { backend };
                        Ok(())
                    }
                    (send_worker, _) => {
                        self.shared.state.store(STATE_FAILED, Ordering::Release);
                        let _ = self.shared.out_tx.send(Outgoing::Shutdown);
                        backend.close();
                        if let Ok(handle) = send_worker {
                            let _ = handle.join();
                        }
                        Err(Error::Internal("could not spawn connection workers"))
                    }
                }
            }
            other => {
                let err = match &other {
                    Lifecycle::Open { .. } => Error::Channel("already joined".to_owned()),
                    _ => self.closed_error(),
                };
                *lifecycle = other;
                Err(err)
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CREATED => ConnState::Created,
            STATE_OPEN => ConnState::Open,
            STATE_CLOSED => ConnState::Closed,
            _ => ConnState::Failed,
        }
    }

    /// Snapshot of this connection's byte and action counters.
    #[must_use]
    pub fn stats(&self) -> ConnStats {
        ConnStats {
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            bytes_recv: self.shared.bytes_recv.load(Ordering::Relaxed),
            actions_sent: self.shared.actions_sent.load(Ordering::Relaxed),
            actions_recv: self.shared.actions_recv.load(Ordering::Relaxed),
        }
    }

    /// Sends an action to the group and returns once it is queued.
    ///
    /// The payload buffer is consumed: whether or not delivery succeeds, the
    /// library releases it. The call may block on backpressure from the
    /// outgoing queue but does not wait for delivery; the action comes back
    /// through [`recv`] once the group has ordered it. Returns the number of
    /// payload bytes queued.
    ///
    /// # Errors
    ///
    /// Errors if `kind` is not application-sendable or the connection is not
    /// open.
    ///
    /// [`recv`]: Connection::recv
    pub fn send(&self, kind: ActKind, payload: Bytes) -> Result<usize, Error> {
        if !kind.is_sendable() {
            return Err(Error::Unsendable(kind));
        }
        self.ensure_open()?;

        let len = payload.len();
        let action_id = self.shared.next_action_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .out_tx
            .send(Outgoing::Action {
                kind,
                payload,
                action_id,
            })
            .map_err(|_| self.closed_error())?;

        self.shared.bytes_sent.fetch_add(len, Ordering::Relaxed);
        self.shared.actions_sent.fetch_add(1, Ordering::Relaxed);
        Ok(len)
    }

    /// Receives the next action delivered to this connection.
    ///
    /// Blocks until an action is available. The payload buffer is freshly
    /// allocated and owned by the caller.
    ///
    /// # Errors
    ///
    /// Errors if the connection is closed or failed.
    pub fn recv(&self) -> Result<Action, Error> {
        self.ensure_open()?;
        let action = self
            .shared
            .delivery_rx
            .recv()
            .map_err(|_| self.closed_error())?;

        self.shared
            .bytes_recv
            .fetch_add(action.payload.len(), Ordering::Relaxed);
        self.shared.actions_recv.fetch_add(1, Ordering::Relaxed);
        Ok(action)
    }

    /// Replicates an action: sends it and blocks until this connection
    /// observes it in its own delivery stream, then returns the assigned
    /// `(global, local)` seqnos.
    ///
    /// The action is also delivered through [`recv`] with the same seqnos.
    /// Unlike [`send`], the library keeps only its own reference to the
    /// payload; the caller's buffer stays valid.
    ///
    /// # Errors
    ///
    /// Errors if `kind` is not application-sendable, the connection is not
    /// open, or the group moves to a non-primary configuration before the
    /// action is ordered.
    ///
    /// [`recv`]: Connection::recv
    /// [`send`]: Connection::send
    pub fn replicate(&self, kind: ActKind, payload: Bytes) -> Result<(Seqno, Seqno), Error> {
        if !kind.is_sendable() {
            return Err(Error::Unsendable(kind));
        }
        self.ensure_open()?;

        let len = payload.len();
        let action_id = self.shared.next_action_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(ReplSlot::default());
        self.shared
            .repl
            .lock()
            .expect("repl lock poisoned")
            .insert(action_id, Arc::clone(&slot));

        if self
            .shared
            .out_tx
            .send(Outgoing::Action {
                kind,
                payload,
                action_id,
            })
            .is_err()
        {
            self.shared
                .repl
                .lock()
                .expect("repl lock poisoned")
                .remove(&action_id);
            return Err(self.closed_error());
        }
        self.shared.bytes_sent.fetch_add(len, Ordering::Relaxed);
        self.shared.actions_sent.fetch_add(1, Ordering::Relaxed);

        match slot.wait() {
            ReplOutcome::Delivered(global, local) => Ok((global, local)),
            ReplOutcome::NonPrimary => Err(Error::NonPrimary),
            ReplOutcome::Closed => Err(Error::Closed),
            ReplOutcome::Failed => Err(Error::Failed),
        }
    }

    /// Advertises the last action seqno this node has applied to its state.
    ///
    /// Peers use the watermark to trim history; the value never affects
    /// ordering. Delivered to the group as a [`Service`] action carrying the
    /// seqno as an 8-byte big-endian payload.
    ///
    /// [`Service`]: ActKind::Service
    pub fn set_last_applied(&self, seqno: Seqno) -> Result<(), Error> {
        self.ensure_open()?;
        let mut payload = BytesMut::with_capacity(Seqno::ENCODE_LEN);
        payload.put_u64(seqno.0);
        let action_id = self.shared.next_action_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .out_tx
            .send(Outgoing::Action {
                kind: ActKind::Service,
                payload: payload.freeze(),
                action_id,
            })
            .map_err(|_| self.closed_error())
    }

    /// Sets this connection's maximum network packet size, the unit
    /// outbound actions are fragmented to. Defaults to
    /// [`DEFAULT_PKT_SIZE`].
    ///
    /// # Errors
    ///
    /// Errors if `pkt_size` cannot fit a fragment header plus one payload
    /// byte.
    pub fn set_pkt_size(&self, pkt_size: usize) -> Result<(), Error> {
        if pkt_size <= FragHeader::ENCODE_LEN {
            return Err(Error::PktSizeTooSmall(pkt_size));
        }
        self.shared.pkt_size.store(pkt_size, Ordering::Relaxed);
        Ok(())
    }

    /// This connection's maximum network packet size.
    #[must_use]
    pub fn pkt_size(&self) -> usize {
        self.shared.pkt_size.load(Ordering::Relaxed)
    }

    /// Closes the connection.
    ///
    /// Blocks until both workers have drained. Unblocks every thread parked
    /// in [`send`], [`recv`] or [`replicate`] with a closed error; further
    /// operations fail the same way.
    ///
    /// # Errors
    ///
    /// Errors if the connection was already closed.
    ///
    /// [`send`]: Connection::send
    /// [`recv`]: Connection::recv
    /// [`replicate`]: Connection::replicate
    pub fn close(&self) -> Result<(), Error> {
        let mut lifecycle = self.lifecycle.lock().expect("lifecycle lock poisoned");
        match std::mem::replace(&mut *lifecycle, Lifecycle::Closed) {
            Lifecycle::Created { .. } => {
                self.shared.state.store(STATE_CLOSED, Ordering::Release);
                Ok(())
            }
            Lifecycle::Open { backend } => {
                let _ = self.shared.state.compare_exchange(
                    STATE_OPEN,
                    STATE_CLOSED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                let _ = self.shared.out_tx.send(Outgoing::Shutdown);
                backend.close();
                let workers = {
                    let mut workers = self.workers.lock().expect("workers lock poisoned");
                    workers.drain(..).collect::<Vec<_>>()
                };
                for worker in workers {
                    let _ = worker.join();
                }
                // waiters registered while we were shutting down
                self.shared.drain_repl(ReplOutcome::Closed);
                self.shared.config.log(LogLevel::Info, "connection closed");
                Ok(())
            }
            Lifecycle::Closed => Err(self.closed_error()),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_OPEN => Ok(()),
            STATE_CREATED => Err(Error::NotConnected),
            STATE_CLOSED => Err(Error::Closed),
            _ => Err(Error::Failed),
        }
    }

    fn closed_error(&self) -> Error {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CREATED => Error::NotConnected,
            STATE_FAILED => Error::Failed,
            _ => Error::Closed,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Drains the outgoing queue into backend writes, one action at a time so
/// fragments of different actions never interleave on the wire.
fn run_send(
    shared: &Shared,
    backend: &dyn Backend,
    out_rx: &Receiver<Outgoing>,
    local_id: MemberId,
) {
    while let Ok(out) = out_rx.recv() {
        let Outgoing::Action {
            kind,
            payload,
            action_id,
        } = out
        else {
            break;
        };

        let pkt_size = shared.pkt_size.load(Ordering::Relaxed);
        let frags = match fragment(local_id, action_id, kind, payload, pkt_size) {
            Ok(frags) => frags,
            Err(err) => {
                shared
                    .config
                    .log(LogLevel::Error, &format!("cannot fragment action: {err}"));
                if let Some(slot) = shared
                    .repl
                    .lock()
                    .expect("repl lock poisoned")
                    .remove(&action_id)
                {
                    slot.complete(ReplOutcome::Failed);
                }
                continue;
            }
        };

        tracing::trace!(action_id, frags = frags.frag_total(), "sending action");
        for frame in frags {
            if let Err(err) = backend.send(frame) {
                shared
                    .config
                    .log(LogLevel::Error, &format!("backend send failed: {err}"));
                shared.mark_failed();
                backend.close();
                return;
            }
        }
    }
}

/// Drains backend events through reassembly and sequencing into the
/// delivery queue, completing replicate wait-objects along the way.
fn run_recv(
    shared: &Shared,
    backend: &dyn Backend,
    delivery_tx: Sender<Action>,
    local_id: MemberId,
) {
    let mut reasm = Reassembler::new();
    let mut seq = Sequencer::new();

    loop {
        match backend.recv() {
            Ok(BackendEvent::Message { origin, mut frame }) => {
                let Ok(header) = FragHeader::decode(&mut frame) else {
                    shared.config.log(
                        LogLevel::Warn,
                        &format!("undecodable frame from member {origin}"),
                    );
                    let _ = delivery_tx.send(seq.sequence(ActKind::Error, Bytes::new()));
                    continue;
                };

                match reasm.reassemble(&header, frame) {
                    Ok(Some((kind, payload))) => {
                        let action = seq.sequence(kind, payload);
                        tracing::trace!(
                            %origin,
                            ?kind,
                            global = %action.global,
                            local = %action.local,
                            "action delivered"
                        );
                        if origin == local_id {
                            complete_repl(shared, header.action_id, kind, &action);
                        }
                        let _ = delivery_tx.send(action);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        shared.config.log(
                            LogLevel::Warn,
                            &format!("reassembly failed for member {origin}: {err}"),
                        );
                        if origin == local_id {
                            if let Some(slot) = shared
                                .repl
                                .lock()
                                .expect("repl lock poisoned")
                                .remove(&header.action_id)
                            {
                                slot.complete(ReplOutcome::Failed);
                            }
                        }
                        let _ = delivery_tx.send(seq.sequence(ActKind::Error, Bytes::new()));
                    }
                }
            }
            Ok(BackendEvent::View(view)) => {
                shared.config.log(
                    LogLevel::Info,
                    &format!(
                        "{} configuration: conf id {}, {} members, own index {}",
                        if view.primary { "primary" } else { "non-primary" },
                        view.conf_id,
                        view.members.len(),
                        view.my_index,
                    ),
                );
                let action = seq.view_change(&view);
                if !view.primary {
                    // ordered actions cannot complete in this configuration
                    shared.drain_repl(ReplOutcome::NonPrimary);
                }
                let _ = delivery_tx.send(action);
            }
            Ok(BackendEvent::Closed) => break,
            Err(err) => {
                shared
                    .config
                    .log(LogLevel::Error, &format!("backend recv failed: {err}"));
                shared.mark_failed();
                break;
            }
        }
    }

    let outcome = if shared.state.load(Ordering::Acquire) == STATE_FAILED {
        ReplOutcome::Failed
    } else {
        ReplOutcome::Closed
    };
    shared.drain_repl(outcome);
    // dropping delivery_tx unblocks every thread parked in recv
}

fn complete_repl(shared: &Shared, action_id: u64, sent_kind: ActKind, action: &Action) {
    let Some(slot) = shared
        .repl
        .lock()
        .expect("repl lock poisoned")
        .remove(&action_id)
    else {
        return;
    };
    if action.kind == sent_kind {
        slot.complete(ReplOutcome::Delivered(action.global, action.local));
    } else {
        // the sequencer degraded an ordered action outside primary
        slot.complete(ReplOutcome::NonPrimary);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn lifecycle_errors() {
        let conn = Connection::create("dummy://", Config::new()).unwrap();
        assert_eq!(ConnState::Created, conn.state());
        assert_matches!(conn.send(ActKind::Data, Bytes::new()), Err(Error::NotConnected));
        assert_matches!(conn.recv(), Err(Error::NotConnected));
        assert_matches!(conn.open(""), Err(Error::Channel(_)));

        conn.open("conn.lifecycle").unwrap();
        assert_eq!(ConnState::Open, conn.state());
        assert_matches!(conn.open("conn.lifecycle"), Err(Error::Channel(_)));

        conn.close().unwrap();
        assert_eq!(ConnState::Closed, conn.state());
        assert_matches!(conn.send(ActKind::Data, Bytes::new()), Err(Error::Closed));
        assert_matches!(conn.recv(), Err(Error::Closed));
        assert_matches!(conn.close(), Err(Error::Closed));
    }

    #[test]
    fn only_sendable_kinds_are_accepted() {
        let conn = Connection::create("dummy://", Config::new()).unwrap();
        conn.open("conn.kinds").unwrap();

        assert_matches!(
            conn.send(ActKind::Primary, Bytes::new()),
            Err(Error::Unsendable(ActKind::Primary))
        );
        assert_matches!(
            conn.replicate(ActKind::Service, Bytes::new()),
            Err(Error::Unsendable(ActKind::Service))
        );
    }

    #[test]
    fn pkt_size_is_validated() {
        let conn = Connection::create("dummy://", Config::new()).unwrap();
        assert_eq!(DEFAULT_PKT_SIZE, conn.pkt_size());
        assert_matches!(
            conn.set_pkt_size(FragHeader::ENCODE_LEN),
            Err(Error::PktSizeTooSmall(_))
        );
        conn.set_pkt_size(FragHeader::ENCODE_LEN + 1).unwrap();
        assert_eq!(FragHeader::ENCODE_LEN + 1, conn.pkt_size());
    }

    #[test]
    fn send_and_recv_round_trip() {
        let conn = Connection::create("dummy://", Config::new()).unwrap();
        conn.open("conn.roundtrip").unwrap();

        let view = conn.recv().unwrap();
        assert_eq!(ActKind::Primary, view.kind);
        assert_eq!(Seqno(1), view.local);
        assert_eq!(Seqno::ILL, view.global);

        let sent = conn.send(ActKind::Data, Bytes::from_static(b"hello")).unwrap();
        assert_eq!(5, sent);

        let action = conn.recv().unwrap();
        assert_eq!(ActKind::Data, action.kind);
        assert_eq!(Bytes::from_static(b"hello"), action.payload);
        assert_eq!(Seqno(1), action.global);
        assert_eq!(Seqno(2), action.local);

        let stats = conn.stats();
        assert_eq!(5, stats.bytes_sent);
        assert_eq!(1, stats.actions_sent);
        assert_eq!(2, stats.actions_recv);
    }

    #[test]
    fn last_applied_arrives_as_service_action() {
        let conn = Connection::create("dummy://", Config::new()).unwrap();
        conn.open("conn.lastapplied").unwrap();
        conn.recv().unwrap(); // own primary view

        conn.set_last_applied(Seqno(17)).unwrap();
        let action = conn.recv().unwrap();
        assert_eq!(ActKind::Service, action.kind);
        assert_eq!(Seqno::ILL, action.global);
        assert_eq!(17, u64::from_be_bytes(action.payload.as_ref().try_into().unwrap()));
    }
}
