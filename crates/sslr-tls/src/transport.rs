//! Transport and event-loop seam.
//!
//! The engine never blocks: it reads what the transport has buffered,
//! queues what it wants written, and posts follow-up events for everything
//! else. The host side runs on a tokio current-thread runtime inside a
//! `LocalSet`. [`Scheduler`] routes events into per-connection channels and
//! arms timers with `tokio::time::sleep`; [`drive_connection`] moves bytes
//! between an `AsyncRead + AsyncWrite` stream and a [`StreamComm`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, trace};
use sslr_types::TlsError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::connection::SslConnection;
use crate::record::{MAX_CIPHERTEXT_LENGTH, RECORD_HEADER_LEN};

/// Identifies one connection within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

/// Work items delivered to a connection by its event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StartHandshake,
    /// The transport has bytes to read.
    DataAvailable,
    /// Continue draining queued application data.
    ContinueEncrypt,
    /// Continue draining the priority queue after a short pause.
    FlushPriority,
    /// The ServerHello timer fired; stale generations are ignored.
    HelloTimeout { generation: u32 },
    /// A sibling connection finished negotiating the shared session.
    SessionNegotiated { success: bool },
    /// The transport was re-established after a version fallback.
    Reconnect,
}

/// Byte transport plus event posting, as seen by the engine.
pub trait ProtocolComm {
    /// Read available bytes. `Ok(0)` means nothing is available right now;
    /// check [`closed`](Self::closed) to tell end-of-stream apart.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, TlsError>;

    /// Send all of `data`.
    fn send_data(&mut self, data: &[u8]) -> Result<(), TlsError>;

    /// True once the peer has closed the stream.
    fn closed(&self) -> bool;

    /// Drop the current stream and open a fresh one to the same peer.
    fn reconnect(&mut self) -> Result<(), TlsError>;

    fn post_message(&mut self, to: ConnectionId, event: ConnectionEvent);

    fn post_delayed_message(&mut self, to: ConnectionId, event: ConnectionEvent, delay: Duration);
}

/// Routes events to registered connections.
///
/// Clones share one routing table. Delayed posts spawn a local task, so
/// [`post_delayed`](Self::post_delayed) must run inside a `LocalSet`.
#[derive(Clone, Default)]
pub struct Scheduler {
    routes: Rc<RefCell<HashMap<ConnectionId, UnboundedSender<ConnectionEvent>>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the queue its driver consumes.
    /// Registering an id twice replaces the earlier queue.
    pub fn register(&self, id: ConnectionId) -> EventQueue {
        let (tx, rx) = unbounded_channel();
        self.routes.borrow_mut().insert(id, tx);
        EventQueue { rx }
    }

    pub fn unregister(&self, id: ConnectionId) {
        self.routes.borrow_mut().remove(&id);
    }

    /// Deliver `event` to `to`. Events for unknown connections are dropped.
    pub fn post(&self, to: ConnectionId, event: ConnectionEvent) {
        let routes = self.routes.borrow();
        match routes.get(&to) {
            Some(tx) => {
                if let Err(e) = tx.send(event) {
                    trace!("{to:?}: queue closed, dropping {:?}", e.0);
                }
            }
            None => trace!("{to:?}: not registered, dropping {event:?}"),
        }
    }

    /// Deliver `event` to `to` once `delay` has elapsed.
    pub fn post_delayed(&self, to: ConnectionId, event: ConnectionEvent, delay: Duration) {
        let scheduler = self.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            scheduler.post(to, event);
        });
    }
}

/// Receiving end of one connection's events.
pub struct EventQueue {
    rx: UnboundedReceiver<ConnectionEvent>,
}

impl EventQueue {
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Buffered [`ProtocolComm`] filled and drained by [`drive_connection`].
///
/// The engine sees only these buffers; the async stream behind them is
/// owned by the driver, which also performs the reconnects requested here.
pub struct StreamComm {
    scheduler: Scheduler,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    eof: bool,
    reconnect_requested: bool,
}

impl StreamComm {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            inbound: Vec::new(),
            outbound: Vec::new(),
            eof: false,
            reconnect_requested: false,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn push_inbound(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// The peer closed its end. Buffered bytes stay readable.
    pub fn mark_closed(&mut self) {
        self.eof = true;
    }

    pub fn take_outbound(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outbound)
    }

    pub fn take_reconnect_request(&mut self) -> bool {
        std::mem::take(&mut self.reconnect_requested)
    }
}

impl ProtocolComm for StreamComm {
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.drain(..n);
        Ok(n)
    }

    fn send_data(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.outbound.extend_from_slice(data);
        Ok(())
    }

    fn closed(&self) -> bool {
        self.eof && self.inbound.is_empty()
    }

    fn reconnect(&mut self) -> Result<(), TlsError> {
        self.inbound.clear();
        self.outbound.clear();
        self.eof = false;
        self.reconnect_requested = true;
        Ok(())
    }

    fn post_message(&mut self, to: ConnectionId, event: ConnectionEvent) {
        self.scheduler.post(to, event);
    }

    fn post_delayed_message(&mut self, to: ConnectionId, event: ConnectionEvent, delay: Duration) {
        self.scheduler.post_delayed(to, event, delay);
    }
}

/// Run `conn` over `stream` until the connection terminates.
///
/// `events` must be the queue registered for `conn.id()`. `connect` opens a
/// fresh stream to the same peer when the engine falls back to an older
/// version. Transport write failures are reported to the engine as a
/// closed stream; only a failed reconnect is returned as an error.
pub async fn drive_connection<S, F, Fut>(
    conn: &mut SslConnection<StreamComm>,
    mut events: EventQueue,
    mut stream: S,
    mut connect: F,
) -> Result<(), TlsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<S>>,
{
    let id = conn.id();
    let mut buf = vec![0u8; RECORD_HEADER_LEN + MAX_CIPHERTEXT_LENGTH];
    // Cleared on EOF or an I/O error, set again by a reconnect.
    let mut open = true;

    loop {
        let out = conn.comm_mut().take_outbound();
        if open && !out.is_empty() {
            let written = match stream.write_all(&out).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                debug!("{id:?}: write failed: {e}");
                open = false;
                conn.comm_mut().mark_closed();
                conn.handle_event(ConnectionEvent::DataAvailable);
                continue;
            }
            trace!("{id:?}: wrote {} bytes", out.len());
        }

        if conn.comm_mut().take_reconnect_request() {
            debug!("{id:?}: opening a fresh stream");
            stream = connect().await?;
            open = true;
        }

        if conn.is_terminated() {
            break;
        }

        tokio::select! {
            event = events.next() => match event {
                Some(event) => conn.handle_event(event),
                None => break,
            },
            read = stream.read(&mut buf), if open => {
                match read {
                    Ok(0) => {
                        open = false;
                        conn.comm_mut().mark_closed();
                    }
                    Ok(n) => conn.comm_mut().push_inbound(&buf[..n]),
                    Err(e) => {
                        debug!("{id:?}: read failed: {e}");
                        open = false;
                        conn.comm_mut().mark_closed();
                    }
                }
                conn.handle_event(ConnectionEvent::DataAvailable);
            }
        }
    }

    conn.comm().scheduler().unregister(id);
    Ok(())
}
