//! The `spread://` / `gcomm://` backend driver.

use std::{
    collections::VecDeque,
    io::BufReader,
    net::{Shutdown, TcpStream},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use replinet_protocol::{Backend, BackendError, BackendEvent, MemberId};

use crate::frame::{self, InFrame};

/// Default port of a Spread daemon.
pub const SPREAD_DEFAULT_PORT: u16 = 4803;
/// Default port of a gcomm daemon.
pub const GCOMM_DEFAULT_PORT: u16 = 4567;

/// Implementation of [`Backend`] over a TCP connection to an external group
/// daemon.
///
/// The daemon owns membership and total order; the driver joins a channel
/// with a `Join` frame, then relays `Msg` frames in both directions and
/// surfaces inbound `View` frames as [`BackendEvent::View`].
#[derive(Debug)]
pub struct TcpBackend {
    addr: String,
    connected: Option<Connected>,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Connected {
    id: MemberId,
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<TcpStream>,
    // dedicated handle so close never waits on the reader or writer locks
    shutdown: TcpStream,
    pending: Mutex<VecDeque<BackendEvent>>,
}

impl TcpBackend {
    /// Creates a driver that will dial `address` on [`open`], appending
    /// `default_port` if the address does not carry one.
    ///
    /// [`open`]: Backend::open
    #[must_use]
    pub fn new(address: &str, default_port: u16) -> Self {
        let addr = if address.contains(':') {
            address.to_owned()
        } else {
            format!("{address}:{default_port}")
        };
        Self {
            addr,
            connected: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Address this driver dials, port included.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Backend for TcpBackend {
    fn open(&mut self, channel: &str) -> Result<(), BackendError> {
        if self.connected.is_some() {
            return Err(BackendError::Protocol("backend already open"));
        }

        let stream = TcpStream::connect(&self.addr).map_err(|source| {
            BackendError::CouldNotConnect {
                addr: self.addr.clone(),
                source,
            }
        })?;
        stream.set_nodelay(true)?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let shutdown = stream.try_clone()?;

        let mut writer = stream;
        frame::write_join(&mut writer, channel)?;

        // the daemon answers a join with the new membership view; everything
        // that arrives before it is stale traffic for the previous view
        let mut pending = VecDeque::new();
        let id = loop {
            match frame::read_frame(&mut reader)? {
                InFrame::View(view) => {
                    let id = view
                        .members
                        .get(view.my_index)
                        .map(|(id, _)| *id)
                        .ok_or(BackendError::Protocol("view index outside member list"))?;
                    pending.push_back(BackendEvent::View(view));
                    break id;
                }
                InFrame::Msg { .. } => continue,
            }
        };
        tracing::debug!(addr = %self.addr, channel, member = %id, "joined channel");

        self.connected = Some(Connected {
            id,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            shutdown,
            pending: Mutex::new(pending),
        });
        Ok(())
    }

    fn local_id(&self) -> Option<MemberId> {
        self.connected.as_ref().map(|connected| connected.id)
    }

    fn send(&self, frame: Bytes) -> Result<(), BackendError> {
        let connected = self.connected.as_ref().ok_or(BackendError::NotConnected)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        let mut writer = connected.writer.lock().expect("writer lock poisoned");
        frame::write_msg(&mut *writer, &frame)?;
        Ok(())
    }

    fn recv(&self) -> Result<BackendEvent, BackendError> {
        let connected = self.connected.as_ref().ok_or(BackendError::NotConnected)?;
        if let Some(event) = connected
            .pending
            .lock()
            .expect("pending lock poisoned")
            .pop_front()
        {
            return Ok(event);
        }
        if self.closed.load(Ordering::Acquire) {
            return Ok(BackendEvent::Closed);
        }

        let mut reader = connected.reader.lock().expect("reader lock poisoned");
        match frame::read_frame(&mut *reader) {
            Ok(InFrame::Msg { origin, frame }) => Ok(BackendEvent::Message { origin, frame }),
            Ok(InFrame::View(view)) => Ok(BackendEvent::View(view)),
            // a read failure after local close is the shutdown we asked for
            Err(_) if self.closed.load(Ordering::Acquire) => Ok(BackendEvent::Closed),
            Err(err) => Err(err),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(connected) = &self.connected {
            if let Ok(mut writer) = connected.writer.lock() {
                let _ = frame::write_leave(&mut *writer);
            }
            let _ = connected.shutdown.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_port_is_appended() {
        assert_eq!("localhost:4803", TcpBackend::new("localhost", SPREAD_DEFAULT_PORT).addr());
        assert_eq!(
            "localhost:9999",
            TcpBackend::new("localhost:9999", SPREAD_DEFAULT_PORT).addr()
        );
    }

    #[test]
    fn open_fails_when_no_daemon_listens() {
        // port 1 is essentially never bound
        let mut backend = TcpBackend::new("127.0.0.1:1", GCOMM_DEFAULT_PORT);
        assert_matches!(
            backend.open("test"),
            Err(BackendError::CouldNotConnect { .. })
        );
    }

    #[test]
    fn ops_before_open_fail() {
        let backend = TcpBackend::new("127.0.0.1", GCOMM_DEFAULT_PORT);
        assert!(backend.local_id().is_none());
        assert_matches!(backend.send(Bytes::new()), Err(BackendError::NotConnected));
        assert_matches!(backend.recv(), Err(BackendError::NotConnected));
    }
}
