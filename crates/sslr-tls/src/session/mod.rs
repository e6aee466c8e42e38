//! Resumable sessions and the per-process session cache.
//!
//! Everything here is single-threaded: sessions are shared between
//! connections through `Rc`, and the cache through `Rc<RefCell<_>>`. A
//! session stays registered while it is resumable; once it is marked
//! non-resumable it is dropped as soon as no connection references it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use log::debug;
use zeroize::Zeroize;

use crate::connection_info::SecurityRating;
use crate::transport::ConnectionId;
use crate::{CipherSuite, ProtocolVersion};

/// Cached state of a completed full handshake.
pub struct Session {
    id: Vec<u8>,
    cipher_suite: CipherSuite,
    version: ProtocolVersion,
    master_secret: Vec<u8>,
    server_name: String,
    peer_certificates: Vec<Vec<u8>>,
    resumable: Cell<bool>,
    security: Cell<Option<SecurityRating>>,
}

impl Session {
    pub fn new(
        id: Vec<u8>,
        cipher_suite: CipherSuite,
        version: ProtocolVersion,
        master_secret: Vec<u8>,
        server_name: &str,
        peer_certificates: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            // An empty id means the server will not resume it.
            resumable: Cell::new(!id.is_empty()),
            id,
            cipher_suite,
            version,
            master_secret,
            server_name: server_name.to_string(),
            peer_certificates,
            security: Cell::new(None),
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.peer_certificates
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable.get()
    }

    /// Taint the session; it will not be offered again.
    pub fn mark_non_resumable(&self) {
        if self.resumable.replace(false) {
            debug!("session for {} marked non-resumable", self.server_name);
        }
    }

    pub fn security(&self) -> Option<SecurityRating> {
        self.security.get()
    }

    pub fn set_security(&self, rating: SecurityRating) {
        self.security.set(Some(rating));
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id_len", &self.id.len())
            .field("cipher_suite", &self.cipher_suite)
            .field("version", &self.version)
            .field("server_name", &self.server_name)
            .field("resumable", &self.resumable.get())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

/// Outcome of [`SessionCache::begin_negotiation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationSlot {
    /// This connection negotiates the server's session.
    Owner,
    /// Another connection is negotiating; wait for its result.
    Wait,
}

#[derive(Debug, Default)]
struct ServerEntry {
    last_session: Option<Vec<u8>>,
    version_ceiling: Option<ProtocolVersion>,
    negotiating: Option<ConnectionId>,
    waiters: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: HashMap<Vec<u8>, Rc<Session>>,
    servers: HashMap<String, ServerEntry>,
}

pub type SharedSessionCache = Rc<RefCell<SessionCache>>;

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedSessionCache {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &[u8]) -> bool {
        self.sessions.contains_key(id)
    }

    /// A resumable session by id.
    pub fn find_session_record(&self, id: &[u8]) -> Option<Rc<Session>> {
        self.sessions
            .get(id)
            .filter(|s| s.is_resumable())
            .cloned()
    }

    /// The most recent resumable session for `server`.
    pub fn find_for_server(&self, server: &str) -> Option<Rc<Session>> {
        let id = self.servers.get(server)?.last_session.as_ref()?;
        self.find_session_record(id)
    }

    /// Register a completed session. Non-resumable sessions are not kept.
    pub fn add_session_record(&mut self, session: Rc<Session>) {
        self.purge();
        if !session.is_resumable() {
            return;
        }
        debug!("caching session for {}", session.server_name());
        self.servers
            .entry(session.server_name().to_string())
            .or_default()
            .last_session = Some(session.id().to_vec());
        self.sessions.insert(session.id().to_vec(), session);
    }

    /// Mark a session non-resumable and drop it if no connection uses it.
    pub fn invalidate(&mut self, id: &[u8]) {
        if let Some(s) = self.sessions.get(id) {
            s.mark_non_resumable();
        }
        self.purge();
    }

    /// Drop non-resumable sessions that only the cache still references.
    pub fn purge(&mut self) {
        self.sessions
            .retain(|_, s| s.is_resumable() || Rc::strong_count(s) > 1);
    }

    /// Highest version to offer `server`, if a fallback lowered it.
    pub fn version_ceiling(&self, server: &str) -> Option<ProtocolVersion> {
        self.servers.get(server)?.version_ceiling
    }

    pub fn set_version_ceiling(&mut self, server: &str, version: ProtocolVersion) {
        self.servers.entry(server.to_string()).or_default().version_ceiling = Some(version);
    }

    /// Claim the right to negotiate a session with `server`.
    pub fn begin_negotiation(&mut self, server: &str, conn: ConnectionId) -> NegotiationSlot {
        let entry = self.servers.entry(server.to_string()).or_default();
        match entry.negotiating {
            Some(owner) if owner != conn => {
                if !entry.waiters.contains(&conn) {
                    entry.waiters.push(conn);
                }
                NegotiationSlot::Wait
            }
            _ => {
                entry.negotiating = Some(conn);
                NegotiationSlot::Owner
            }
        }
    }

    /// Release the negotiation claim. Returns the connections to notify.
    pub fn finish_negotiation(&mut self, server: &str, conn: ConnectionId) -> Vec<ConnectionId> {
        match self.servers.get_mut(server) {
            Some(entry) if entry.negotiating == Some(conn) => {
                entry.negotiating = None;
                std::mem::take(&mut entry.waiters)
            }
            Some(entry) => {
                entry.waiters.retain(|c| *c != conn);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

/// A connection's reference to a session.
///
/// Dropping the last connection reference to a non-resumable session
/// removes it from the cache.
pub struct SessionHandle {
    session: Rc<Session>,
    cache: Weak<RefCell<SessionCache>>,
}

impl SessionHandle {
    pub fn new(session: Rc<Session>, cache: &SharedSessionCache) -> Self {
        Self {
            session,
            cache: Rc::downgrade(cache),
        }
    }

    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    /// Connections currently referencing the session.
    pub fn connection_count(&self) -> usize {
        let cached = self
            .cache
            .upgrade()
            .and_then(|c| {
                c.try_borrow()
                    .ok()
                    .map(|c| c.sessions.get(self.session.id()).is_some_and(|s| Rc::ptr_eq(s, &self.session)))
            })
            .unwrap_or(false);
        Rc::strong_count(&self.session) - usize::from(cached)
    }

    /// Another handle to the same session.
    pub fn share(&self) -> Self {
        Self {
            session: Rc::clone(&self.session),
            cache: self.cache.clone(),
        }
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.session).finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.session.is_resumable() {
            return;
        }
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        // Cache + this handle: we are the last connection.
        if Rc::strong_count(&self.session) == 2 {
            if let Ok(mut c) = cache.try_borrow_mut() {
                let id = self.session.id().to_vec();
                if c.sessions.get(&id).is_some_and(|s| Rc::ptr_eq(s, &self.session)) {
                    c.sessions.remove(&id);
                    debug!("released non-resumable session for {}", self.session.server_name());
                }
            }
        }
    }
}
