//! Client connection state machine.
//!
//! Records are dispatched by (state, content type) through
//! [`record_action`]; inbound alerts by (state, alert) through
//! [`alert_action`]. Handshake messages are validated against the ordered
//! action queues seeded by the negotiated [`VersionPolicy`].
//!
//! Everything runs on the caller's thread. Whenever work has to wait (more
//! transport bytes, a sibling connection negotiating the shared session, a
//! pipeline continuation, a ServerHello timer) the connection posts an
//! event through its [`ProtocolComm`] and returns.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use sslr_types::{CryptoError, TlsError};
use subtle::ConstantTimeEq;

use crate::alert::{alert_for_error, error_sends_alert, Alert, AlertDescription, AlertLevel};
use crate::cert_verify::{verify_certificate, CertificateCheck, CertificateVerdict};
use crate::config::SslConfig;
use crate::connection_info::{ConnectionInfo, SecurityRating};
use crate::connection_state::ConnectionState;
use crate::crypt::{requires_record_splitting, CipherSuiteParams};
use crate::handshake::actions::{ActionQueue, Incoming, MessageTag, PostAction};
use crate::handshake::codec::{
    decode_certificate, decode_certificate_request, decode_certificate_status, decode_finished,
    decode_protocol_list, decode_renegotiation_info, decode_server_hello, encode_certificate,
    encode_client_hello, encode_client_key_exchange, encode_finished, encode_next_protocol,
    extension_type, find_extension, CertificateMsg, ClientHello, Extension, HandshakeReassembler,
    NextProtocolMsg,
};
use crate::handshake::key_exchange::RsaKeyExchange;
use crate::handshake::{HandshakeMessage, HandshakeType};
use crate::record::layer::{PipelineProgress, RecordLayer, TrafficStats};
use crate::record::{ContentType, Record};
use crate::session::{NegotiationSlot, Session, SessionHandle, SharedSessionCache};
use crate::transport::{ConnectionEvent, ConnectionId, ProtocolComm};
use crate::version::{FlightOptions, VersionPolicy};
use crate::{CipherSuite, ProtocolVersion};


/// Pause before continuing a priority queue that exceeded one pass.
const PRIORITY_FLUSH_DELAY: Duration = Duration::from_millis(1);

/// Notifications to the layer above the connection.
pub trait ConnectionObserver {
    /// The first handshake completed. Renegotiations refresh
    /// `connection_info` without calling this again.
    fn on_security_established(&mut self, _info: &ConnectionInfo) {}

    /// Decrypted application data is available to [`SslConnection::read`].
    fn on_data_ready(&mut self, _available: usize) {}

    /// Traffic counters after a send or receive pass.
    fn on_progress(&mut self, _stats: &TrafficStats) {}

    /// An alert was sent (`received == false`) or received.
    fn on_alert(&mut self, _alert: Alert, _received: bool) {}

    /// The connection ended; `None` is a clean close. Called exactly once.
    fn on_terminated(&mut self, _error: Option<&TlsError>) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Connection-level protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslState {
    PreHandshake,
    /// Another connection is negotiating the session for this server.
    WaitingForSession,
    SentClientHello,
    Negotiating,
    Connected,
    /// close_notify sent, waiting for the peer's.
    CloseConnection,
    /// Answering the peer's close_notify.
    CloseConnection2,
    /// Transport being re-established for a version fallback.
    Reconnecting,
    NotConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordAction {
    Handshake,
    ChangeCipher,
    Alert,
    Application,
    Drop,
    Unexpected,
}

/// Record dispatch table.
fn record_action(
    state: SslState,
    content_type: ContentType,
    renegotiating: bool,
    change_cipher_pending: bool,
) -> RecordAction {
    use SslState::*;
    match (state, content_type) {
        (_, ContentType::Alert) => RecordAction::Alert,
        (CloseConnection | CloseConnection2 | NotConnected, _) => RecordAction::Drop,
        (SentClientHello | Negotiating, ContentType::Handshake) => RecordAction::Handshake,
        (Negotiating, ContentType::ChangeCipherSpec) if !change_cipher_pending => {
            RecordAction::ChangeCipher
        }
        (SentClientHello | Negotiating, ContentType::ApplicationData)
            if renegotiating && !change_cipher_pending =>
        {
            RecordAction::Application
        }
        (Connected, ContentType::Handshake) => RecordAction::Handshake,
        (Connected, ContentType::ApplicationData) => RecordAction::Application,
        _ => RecordAction::Unexpected,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertAction {
    Ignore,
    Close,
    CloseNotify,
    /// Retry with a lower version, if allowed.
    Fallback,
    AbortRenegotiation,
}

/// Inbound alert table. A fatal alert is never ignored.
fn alert_action(state: SslState, alert: Alert, renegotiating: bool) -> AlertAction {
    use AlertDescription::*;
    use SslState::*;
    match (state, alert.level, alert.description) {
        (_, _, CloseNotify) => AlertAction::CloseNotify,
        (SentClientHello, AlertLevel::Fatal, _) if !renegotiating => AlertAction::Fallback,
        (_, AlertLevel::Fatal, _) => AlertAction::Close,
        (SentClientHello | Negotiating, AlertLevel::Warning, NoRenegotiation) if renegotiating => {
            AlertAction::AbortRenegotiation
        }
        (SentClientHello, AlertLevel::Warning, UnrecognizedName) => AlertAction::Ignore,
        (_, AlertLevel::Warning, _) => AlertAction::Ignore,
    }
}

fn pending_of(pending: &mut Option<ConnectionState>) -> Result<&mut ConnectionState, TlsError> {
    pending
        .as_mut()
        .ok_or_else(|| TlsError::InternalError("no pending connection state".into()))
}

fn random32() -> Result<[u8; 32], TlsError> {
    let mut r = [0u8; 32];
    getrandom::getrandom(&mut r).map_err(|_| TlsError::CryptoError(CryptoError::RandomFailed))?;
    Ok(r)
}

/// One client connection over a [`ProtocolComm`].
pub struct SslConnection<C: ProtocolComm> {
    id: ConnectionId,
    config: Arc<SslConfig>,
    comm: C,
    observer: Box<dyn ConnectionObserver>,
    sessions: SharedSessionCache,
    state: SslState,
    record_layer: RecordLayer,
    current: ConnectionState,
    pending: Option<ConnectionState>,
    reassembler: HandshakeReassembler,
    recv_actions: ActionQueue,
    send_actions: ActionQueue,
    /// Version offered in the current ClientHello.
    attempt_version: ProtocolVersion,
    negotiated_version: Option<ProtocolVersion>,
    /// ChangeCipherSpec received, Finished still outstanding.
    change_cipher_pending: bool,
    pending_session_id: Vec<u8>,
    status_acknowledged: bool,
    renegotiating: bool,
    secure_renegotiation: bool,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
    ever_connected: bool,
    fallback_used: bool,
    negotiation_owner: bool,
    hello_timer_generation: u32,
    pipelining_forbidden: bool,
    info: Option<ConnectionInfo>,
    error: Option<TlsError>,
    terminated: bool,
    silenced: bool,
}

impl<C: ProtocolComm> SslConnection<C> {
    pub fn new(
        id: ConnectionId,
        config: Arc<SslConfig>,
        comm: C,
        sessions: SharedSessionCache,
        observer: Box<dyn ConnectionObserver>,
    ) -> Self {
        let record_layer = RecordLayer::new(config.network_buffer_size, config.max_records_per_pass);
        let reassembler = HandshakeReassembler::new(config.max_handshake_message_len);
        let attempt_version = config.max_enabled_version().unwrap_or(ProtocolVersion::Tls12);
        Self {
            id,
            config,
            comm,
            observer,
            sessions,
            state: SslState::PreHandshake,
            record_layer,
            current: ConnectionState::initial(),
            pending: None,
            reassembler,
            recv_actions: ActionQueue::new(),
            send_actions: ActionQueue::new(),
            attempt_version,
            negotiated_version: None,
            change_cipher_pending: false,
            pending_session_id: Vec::new(),
            status_acknowledged: false,
            renegotiating: false,
            secure_renegotiation: false,
            client_verify_data: Vec::new(),
            server_verify_data: Vec::new(),
            ever_connected: false,
            fallback_used: false,
            negotiation_owner: false,
            hello_timer_generation: 0,
            pipelining_forbidden: false,
            info: None,
            error: None,
            terminated: false,
            silenced: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SslState {
        self.state
    }

    /// True once the connection has shut down and ignores further events.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn comm_mut(&mut self) -> &mut C {
        &mut self.comm
    }

    /// Parameters of the last completed handshake.
    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    /// The error that terminated the connection, if any.
    pub fn error(&self) -> Option<&TlsError> {
        self.error.as_ref()
    }

    pub fn traffic_stats(&self) -> TrafficStats {
        self.record_layer.stats()
    }

    /// The active session, if the handshake produced or resumed one.
    pub fn session(&self) -> Option<&Rc<Session>> {
        self.current.session.as_ref().map(|h| h.session())
    }

    fn server_key(&self) -> String {
        self.config.server_name.clone().unwrap_or_default()
    }

    fn policy(&self) -> VersionPolicy {
        VersionPolicy::for_version(self.negotiated_version.unwrap_or(self.attempt_version))
    }

    fn write_version(&self) -> u16 {
        self.negotiated_version.unwrap_or(self.attempt_version).wire()
    }

    fn pending_mut(&mut self) -> Result<&mut ConnectionState, TlsError> {
        pending_of(&mut self.pending)
    }

    // -----------------------------------------------------------------
    // Public entry points
    // -----------------------------------------------------------------

    /// Deliver an event from the hosting loop.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        if self.terminated {
            return;
        }
        trace!("{:?}: event {event:?} in {:?}", self.id, self.state);
        let result = match event {
            ConnectionEvent::StartHandshake => self.start_handshake(),
            ConnectionEvent::DataAvailable => self.process_received_data(),
            ConnectionEvent::ContinueEncrypt | ConnectionEvent::FlushPriority => self.pump_output(),
            ConnectionEvent::HelloTimeout { generation } => self.hello_timeout(generation),
            ConnectionEvent::SessionNegotiated { success } => {
                self.session_negotiated_continue_handshake(success)
            }
            ConnectionEvent::Reconnect => self.reconnected(),
        };
        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// Queue application data. Data written before the handshake completes
    /// is sent once it does.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        if self.terminated
            || matches!(
                self.state,
                SslState::CloseConnection | SslState::CloseConnection2 | SslState::NotConnected
            )
        {
            return Err(TlsError::ConnectionClosed);
        }
        self.record_layer.queue_application(data);
        if self.state == SslState::Connected || self.renegotiating {
            if let Err(e) = self.pump_output() {
                self.fail(e);
                return Err(TlsError::ConnectionClosed);
            }
        }
        Ok(data.len())
    }

    /// Copy decrypted application data into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        self.record_layer.read_application_data(buf)
    }

    pub fn available(&self) -> usize {
        self.record_layer.available()
    }

    /// Send close_notify and wait for the peer's.
    pub fn close(&mut self) {
        if self.terminated {
            return;
        }
        match self.state {
            SslState::Connected | SslState::Negotiating | SslState::SentClientHello => {
                self.queue_alert(Alert::warning(AlertDescription::CloseNotify));
                self.state = SslState::CloseConnection;
                if let Err(e) = self.pump_output() {
                    self.fail(e);
                }
            }
            SslState::CloseConnection | SslState::CloseConnection2 => {}
            _ => self.terminate(None),
        }
    }

    /// Send any coalesced records now.
    pub fn flush(&mut self) -> Result<(), TlsError> {
        self.record_layer.flush(&mut self.comm)
    }

    /// Abort without further callbacks. An unfinished handshake leaves its
    /// session non-resumable.
    pub fn stop(&mut self) {
        if self.terminated {
            return;
        }
        debug!("{:?}: stopped in {:?}", self.id, self.state);
        self.silenced = true;
        if let Some(pending) = &self.pending {
            if let Some(s) = &pending.session {
                s.mark_non_resumable();
            }
        }
        self.terminate(Some(TlsError::Cancelled));
    }

    // -----------------------------------------------------------------
    // Handshake start, session wait, fallback
    // -----------------------------------------------------------------

    fn start_handshake(&mut self) -> Result<(), TlsError> {
        if self.state != SslState::PreHandshake {
            return Ok(());
        }
        let server = self.server_key();
        let max = self
            .config
            .max_enabled_version()
            .ok_or(TlsError::UnsupportedVersion)?;
        let ceiling = self.sessions.borrow().version_ceiling(&server);
        self.attempt_version = ceiling.map_or(max, |c| c.min(max));
        if !self.config.is_enabled(self.attempt_version) {
            return Err(TlsError::UnsupportedVersion);
        }

        if self.config.session_resumption {
            let resumable = self.sessions.borrow().find_for_server(&server).is_some();
            if !resumable {
                let slot = self.sessions.borrow_mut().begin_negotiation(&server, self.id);
                if slot == NegotiationSlot::Wait {
                    debug!("{:?}: waiting for session negotiation with {server}", self.id);
                    self.state = SslState::WaitingForSession;
                    return Ok(());
                }
                self.negotiation_owner = true;
            }
        }
        self.send_client_hello()
    }

    /// A sibling connection finished negotiating the session we waited for.
    pub fn session_negotiated_continue_handshake(&mut self, success: bool) -> Result<(), TlsError> {
        if self.state != SslState::WaitingForSession {
            return Ok(());
        }
        debug!(
            "{:?}: session negotiation finished elsewhere (success: {success})",
            self.id
        );
        let server = self.server_key();
        let resumable = success && self.sessions.borrow().find_for_server(&server).is_some();
        if !resumable {
            let slot = self.sessions.borrow_mut().begin_negotiation(&server, self.id);
            if slot == NegotiationSlot::Wait {
                return Ok(());
            }
            self.negotiation_owner = true;
        }
        self.send_client_hello()
    }

    fn send_client_hello(&mut self) -> Result<(), TlsError> {
        let version = self.attempt_version;
        let policy = VersionPolicy::for_version(version);
        let suites = self.config.suites_for(version);
        if suites.is_empty() {
            return Err(TlsError::NoSharedCipherSuite);
        }

        let mut pending = ConnectionState::new();
        pending.client_random = random32()?;
        let server = self.server_key();
        if self.config.session_resumption {
            let cached = self.sessions.borrow().find_for_server(&server);
            if let Some(session) = cached {
                if session.version() <= version && suites.contains(&session.cipher_suite()) {
                    pending.session = Some(SessionHandle::new(session, &self.sessions));
                }
            }
        }
        let session_id = pending
            .session
            .as_ref()
            .map(|s| s.id().to_vec())
            .unwrap_or_default();

        let mut cipher_suites = suites;
        let mut extensions = Vec::new();
        if policy.supports_extensions() {
            if let Some(name) = &self.config.server_name {
                extensions.push(Extension::server_name(name));
            }
            if self.config.request_certificate_status {
                extensions.push(Extension::status_request());
            }
            if !self.config.next_protocols.is_empty() {
                extensions.push(Extension::next_protocol_negotiation());
            }
            extensions.push(Extension::renegotiation_info(&self.client_verify_data));
        } else if !self.renegotiating {
            cipher_suites.push(CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);
        }

        let hello = encode_client_hello(&ClientHello {
            version: version.wire(),
            random: pending.client_random,
            session_id,
            cipher_suites,
            compression_methods: vec![0],
            extensions,
        });
        pending.transcript.update(&hello);
        self.pending = Some(pending);
        self.reassembler.clear();
        self.change_cipher_pending = false;
        self.status_acknowledged = false;
        self.send_actions.clear();
        policy.seed_hello(&mut self.recv_actions);

        if !self.renegotiating {
            self.record_layer
                .set_write_records_to_out_buffer(self.config.coalesce_handshake_records);
        }
        self.record_layer.queue_priority(ContentType::Handshake, hello);
        self.state = SslState::SentClientHello;
        debug!("{:?}: ClientHello sent offering {version}", self.id);

        if let Some(timeout) = self.config.server_hello_timeout {
            if self.fallback_target().is_some() {
                self.hello_timer_generation = self.hello_timer_generation.wrapping_add(1);
                self.comm.post_delayed_message(
                    self.id,
                    ConnectionEvent::HelloTimeout {
                        generation: self.hello_timer_generation,
                    },
                    timeout,
                );
            }
        }
        self.pump_output()
    }

    /// Version to retry with, if a fallback is allowed right now.
    fn fallback_target(&self) -> Option<ProtocolVersion> {
        if !self.config.allow_version_fallback
            || self.ever_connected
            || self.fallback_used
            || self.renegotiating
            || self.config.is_strict_transport(&self.server_key())
        {
            return None;
        }
        ProtocolVersion::ALL.into_iter().find(|v| {
            *v < self.attempt_version && *v <= ProtocolVersion::Tls10 && self.config.is_enabled(*v)
        })
    }

    fn start_fallback(&mut self, target: ProtocolVersion, reason: &str) -> Result<(), TlsError> {
        warn!(
            "{:?}: {reason} while offering {}; retrying with {target}",
            self.id, self.attempt_version
        );
        let server = self.server_key();
        self.sessions.borrow_mut().set_version_ceiling(&server, target);
        if let Some(pending) = self.pending.take() {
            if let Some(s) = &pending.session {
                s.mark_non_resumable();
            }
        }
        self.fallback_used = true;
        self.hello_timer_generation = self.hello_timer_generation.wrapping_add(1);
        self.record_layer.reset();
        self.reassembler.clear();
        self.recv_actions.clear();
        self.send_actions.clear();
        self.current = ConnectionState::initial();
        self.negotiated_version = None;
        self.attempt_version = target;
        self.state = SslState::Reconnecting;
        self.comm.reconnect()?;
        self.comm.post_message(self.id, ConnectionEvent::Reconnect);
        Ok(())
    }

    fn reconnected(&mut self) -> Result<(), TlsError> {
        if self.state != SslState::Reconnecting {
            return Ok(());
        }
        self.send_client_hello()
    }

    fn hello_timeout(&mut self, generation: u32) -> Result<(), TlsError> {
        if generation != self.hello_timer_generation || self.state != SslState::SentClientHello {
            return Ok(());
        }
        match self.fallback_target() {
            Some(target) => self.start_fallback(target, "no ServerHello in time"),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------
    // Receive path
    // -----------------------------------------------------------------

    /// Read what the transport has and process every complete record.
    pub fn process_received_data(&mut self) -> Result<(), TlsError> {
        loop {
            if self.terminated || self.state == SslState::Reconnecting {
                return Ok(());
            }
            let n = self.record_layer.fill_from(&mut self.comm)?;
            while !self.terminated && self.state != SslState::Reconnecting {
                let accept_new_version = self.state == SslState::SentClientHello && !self.renegotiating;
                let read = self.current.read_state_mut()?;
                let Some(record) = self.record_layer.next_record(read, accept_new_version)? else {
                    break;
                };
                self.handle_record(record)?;
            }
            if n == 0 {
                break;
            }
        }
        if !self.terminated && self.state != SslState::Reconnecting {
            self.observer.on_progress(&self.record_layer.stats());
            if self.comm.closed() {
                return self.transport_closed();
            }
        }
        Ok(())
    }

    fn transport_closed(&mut self) -> Result<(), TlsError> {
        match self.state {
            SslState::CloseConnection | SslState::CloseConnection2 => {
                self.terminate(None);
                Ok(())
            }
            SslState::SentClientHello => match self.fallback_target() {
                Some(target) => self.start_fallback(target, "connection closed by server"),
                None => Err(TlsError::ConnectionClosed),
            },
            _ => Err(TlsError::ConnectionClosed),
        }
    }

    fn handle_record(&mut self, record: Record) -> Result<(), TlsError> {
        let action = record_action(
            self.state,
            record.content_type,
            self.renegotiating,
            self.change_cipher_pending,
        );
        trace!(
            "{:?}: {:?} record ({} bytes) in {:?} -> {action:?}",
            self.id,
            record.content_type,
            record.fragment.len(),
            self.state
        );
        match action {
            RecordAction::Alert => self.handle_alert(&record.fragment),
            RecordAction::Handshake => self.handle_handshake_record(&record.fragment),
            RecordAction::ChangeCipher => self.handle_change_cipher(&record.fragment),
            RecordAction::Application => {
                if self.reassembler.is_mid_message() {
                    return Err(TlsError::UnexpectedMessage(
                        "application data inside a handshake message".into(),
                    ));
                }
                self.record_layer.push_application_data(&record.fragment);
                self.observer.on_data_ready(self.record_layer.available());
                Ok(())
            }
            RecordAction::Drop => Ok(()),
            RecordAction::Unexpected => Err(TlsError::UnexpectedMessage(format!(
                "{:?} record in state {:?}",
                record.content_type, self.state
            ))),
        }
    }

    fn handle_alert(&mut self, fragment: &[u8]) -> Result<(), TlsError> {
        for alert in Alert::decode_all(fragment)? {
            self.handle_one_alert(alert)?;
            if self.terminated || self.state == SslState::Reconnecting {
                break;
            }
        }
        Ok(())
    }

    fn handle_one_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        self.observer.on_alert(alert, true);
        let action = alert_action(self.state, alert, self.renegotiating);
        debug!("{:?}: received {alert:?} -> {action:?}", self.id);
        match action {
            AlertAction::Ignore => Ok(()),
            AlertAction::CloseNotify => {
                if self.state == SslState::CloseConnection {
                    self.terminate(None);
                    return Ok(());
                }
                if !self.ever_connected {
                    return Err(TlsError::ConnectionClosed);
                }
                self.state = SslState::CloseConnection2;
                self.queue_alert(Alert::warning(AlertDescription::CloseNotify));
                self.pump_output()?;
                self.terminate(None);
                Ok(())
            }
            AlertAction::Fallback => match self.fallback_target() {
                Some(target) => {
                    self.start_fallback(target, &format!("fatal alert {:?}", alert.description))
                }
                None => Err(TlsError::AlertReceived(format!("{:?}", alert.description))),
            },
            AlertAction::Close => {
                warn!("{:?}: fatal alert {:?} received", self.id, alert.description);
                Err(TlsError::AlertReceived(format!("{:?}", alert.description)))
            }
            AlertAction::AbortRenegotiation => {
                warn!("{:?}: server refused renegotiation", self.id);
                self.pending = None;
                self.renegotiating = false;
                self.recv_actions.clear();
                self.send_actions.clear();
                self.reassembler.clear();
                self.state = SslState::Connected;
                self.pump_output()
            }
        }
    }

    fn handle_change_cipher(&mut self, fragment: &[u8]) -> Result<(), TlsError> {
        if fragment != [1u8].as_slice() {
            return Err(TlsError::DecodeError("malformed ChangeCipherSpec".into()));
        }
        if self.reassembler.is_mid_message() {
            return Err(TlsError::UnexpectedMessage(
                "ChangeCipherSpec inside a handshake message".into(),
            ));
        }
        match self.recv_actions.match_incoming(MessageTag::ChangeCipherSpec)? {
            Incoming::Accept(PostAction::ActivateRead) => {
                let read = self.pending_mut()?.take_read()?;
                self.current.install_read(read);
                self.change_cipher_pending = true;
                debug!("{:?}: read cipher state activated", self.id);
                Ok(())
            }
            _ => Err(TlsError::InternalError(
                "ChangeCipherSpec entry without read activation".into(),
            )),
        }
    }

    fn handle_handshake_record(&mut self, fragment: &[u8]) -> Result<(), TlsError> {
        self.reassembler.push(fragment);
        while let Some((msg, raw)) = self.reassembler.next_message()? {
            self.handle_handshake_message(msg, &raw)?;
            if self.terminated || !matches!(
                self.state,
                SslState::SentClientHello | SslState::Negotiating | SslState::Connected
            ) {
                break;
            }
        }
        self.pump_output()
    }

    fn handle_handshake_message(&mut self, msg: HandshakeMessage, raw: &[u8]) -> Result<(), TlsError> {
        if self.state == SslState::Connected {
            return match msg.msg_type {
                HandshakeType::HelloRequest => self.handle_hello_request(),
                other => Err(TlsError::UnexpectedMessage(format!(
                    "{other:?} after handshake completed"
                ))),
            };
        }

        let action = match self
            .recv_actions
            .match_incoming(MessageTag::Handshake(msg.msg_type))?
        {
            Incoming::Ignored => {
                trace!("{:?}: ignoring {:?}", self.id, msg.msg_type);
                return Ok(());
            }
            Incoming::Accept(action) => action,
        };
        debug!("{:?}: handshake {:?}", self.id, msg.msg_type);

        if msg.msg_type == HandshakeType::Finished {
            self.process_finished(&msg.body, raw)?;
        } else {
            self.pending_mut()?.transcript.update(raw);
            match msg.msg_type {
                HandshakeType::ServerHello => self.process_server_hello(&msg.body)?,
                HandshakeType::Certificate => self.process_certificate(&msg.body)?,
                HandshakeType::CertificateStatus => {
                    let status = decode_certificate_status(&msg.body)?;
                    self.pending_mut()?.ocsp_response = Some(status.response);
                }
                HandshakeType::ServerKeyExchange => {
                    let pending = self.pending_mut()?;
                    let kx = pending
                        .key_exchange
                        .as_mut()
                        .ok_or_else(|| TlsError::InternalError("no key exchange object".into()))?;
                    kx.process_server_key_exchange(&msg.body)?;
                }
                HandshakeType::CertificateRequest => {
                    let tls12 = self.policy() == VersionPolicy::Tls12;
                    decode_certificate_request(&msg.body, tls12)?;
                    self.pending_mut()?.certificate_requested = true;
                }
                HandshakeType::ServerHelloDone => {
                    if !msg.body.is_empty() {
                        return Err(TlsError::DecodeError("non-empty ServerHelloDone".into()));
                    }
                    self.process_server_hello_done()?;
                }
                other => {
                    return Err(TlsError::UnexpectedMessage(format!(
                        "{other:?} is never sent to a client"
                    )))
                }
            }
        }

        match action {
            PostAction::Complete => self.complete_handshake(),
            PostAction::UnblockSends => {
                self.send_actions.unblock();
                self.drive_send_actions()
            }
            _ => Ok(()),
        }
    }

    fn handle_hello_request(&mut self) -> Result<(), TlsError> {
        let policy = self.policy();
        if !self.config.allow_renegotiation || !self.secure_renegotiation {
            debug!("{:?}: refusing renegotiation", self.id);
            return match policy.translate_alert(AlertDescription::NoRenegotiation) {
                Some(desc) => {
                    self.queue_alert(Alert::warning(desc));
                    Ok(())
                }
                None => Err(TlsError::HandshakeFailed(
                    "renegotiation refused and no alert to say so".into(),
                )),
            };
        }
        debug!("{:?}: renegotiating", self.id);
        self.renegotiating = true;
        self.attempt_version = self.negotiated_version.unwrap_or(self.attempt_version);
        self.send_client_hello()
    }

    fn process_server_hello(&mut self, body: &[u8]) -> Result<(), TlsError> {
        let sh = decode_server_hello(body)?;
        let version = ProtocolVersion::from_wire(sh.version).ok_or(TlsError::UnsupportedVersion)?;
        if version > self.attempt_version || !self.config.is_enabled(version) {
            return Err(TlsError::UnsupportedVersion);
        }
        if self.renegotiating && Some(version) != self.negotiated_version {
            return Err(TlsError::IllegalParameter(
                "protocol version changed on renegotiation".into(),
            ));
        }
        if !self.config.suites_for(self.attempt_version).contains(&sh.cipher_suite) {
            return Err(TlsError::IllegalParameter(format!(
                "server selected unoffered suite {:#06x}",
                sh.cipher_suite.0
            )));
        }
        let params = CipherSuiteParams::from_suite(sh.cipher_suite)?;
        if !params.supports_version(version) {
            return Err(TlsError::IllegalParameter(format!(
                "{} not allowed with {version}",
                params.name
            )));
        }
        if sh.compression_method != 0 {
            return Err(TlsError::IllegalParameter(format!(
                "compression method {}",
                sh.compression_method
            )));
        }

        let policy = VersionPolicy::for_version(version);
        let mut expected_ri = self.client_verify_data.clone();
        expected_ri.extend_from_slice(&self.server_verify_data);
        match find_extension(&sh.extensions, extension_type::RENEGOTIATION_INFO) {
            Some(ext) => {
                let got = decode_renegotiation_info(&ext.data)?;
                if !bool::from(got.ct_eq(&expected_ri)) {
                    return Err(TlsError::HandshakeFailed(
                        "renegotiation_info mismatch".into(),
                    ));
                }
                self.secure_renegotiation = true;
            }
            None if self.renegotiating => {
                return Err(TlsError::HandshakeFailed(
                    "server dropped renegotiation_info".into(),
                ));
            }
            None => self.secure_renegotiation = false,
        }
        self.status_acknowledged = self.config.request_certificate_status
            && find_extension(&sh.extensions, extension_type::STATUS_REQUEST).is_some();
        let server_protocols =
            match find_extension(&sh.extensions, extension_type::NEXT_PROTOCOL_NEGOTIATION) {
                Some(_) if self.config.next_protocols.is_empty() => {
                    return Err(TlsError::IllegalParameter("unsolicited NPN extension".into()))
                }
                Some(ext) => Some(decode_protocol_list(&ext.data)?),
                None => None,
            };

        // Stop the ServerHello timer.
        self.hello_timer_generation = self.hello_timer_generation.wrapping_add(1);
        self.negotiated_version = Some(version);
        self.record_layer.set_read_version(version.wire());

        let encryptor = self.config.premaster_encryptor.clone();
        let pending = pending_of(&mut self.pending)?;
        pending.server_random = sh.random;
        pending.version = Some(version);
        pending.suite = Some(params);
        pending.server_protocols = server_protocols;

        let resumed = match &pending.session {
            Some(s) if !sh.session_id.is_empty() && s.id() == sh.session_id.as_slice() => {
                if s.cipher_suite() != sh.cipher_suite || s.version() != version {
                    return Err(TlsError::IllegalParameter(
                        "resumed session with different parameters".into(),
                    ));
                }
                true
            }
            _ => false,
        };

        if resumed {
            let master = pending
                .session
                .as_ref()
                .map(|s| s.master_secret().to_vec())
                .unwrap_or_default();
            pending.set_master_secret(master);
            pending.calculate_keys(true)?;
            pending.resumed = true;
            let npn = pending.server_protocols.is_some();
            policy.seed_resumed(&mut self.send_actions, &mut self.recv_actions, npn);
            self.select_next_protocol()?;
            debug!("{:?}: resuming session", self.id);
        } else {
            pending.session = None;
            let encryptor = encryptor.ok_or_else(|| {
                TlsError::HandshakeFailed("no premaster encryptor configured".into())
            })?;
            pending.key_exchange = Some(Box::new(RsaKeyExchange::new(encryptor)));
            self.pending_session_id = sh.session_id;
            policy.seed_server_flight(&mut self.recv_actions, self.status_acknowledged);
        }
        self.state = SslState::Negotiating;
        Ok(())
    }

    fn process_certificate(&mut self, body: &[u8]) -> Result<(), TlsError> {
        let cert = decode_certificate(body)?;
        if cert.chain.is_empty() {
            return Err(TlsError::HandshakeFailed("server sent no certificate".into()));
        }
        self.pending_mut()?.peer_certificates = cert.chain;
        Ok(())
    }

    fn select_next_protocol(&mut self) -> Result<(), TlsError> {
        let ours = self.config.next_protocols.clone();
        let pending = self.pending_mut()?;
        if let Some(theirs) = &pending.server_protocols {
            let chosen = ours
                .iter()
                .find(|p| theirs.contains(*p))
                .or_else(|| ours.first())
                .cloned();
            pending.next_protocol = chosen;
        }
        Ok(())
    }

    fn process_server_hello_done(&mut self) -> Result<(), TlsError> {
        let server_name = self.config.server_name.clone();
        let handler = self.config.certificate_handler.clone();
        let pending = self.pending_mut()?;
        let verdict = verify_certificate(
            handler.as_ref(),
            &CertificateCheck {
                server_name: server_name.as_deref(),
                chain: &pending.peer_certificates,
                ocsp_response: pending.ocsp_response.as_deref(),
            },
        );
        match verdict {
            CertificateVerdict::Trusted { key_bits } => pending.key_bits = key_bits,
            CertificateVerdict::RevocationUnknown { key_bits } => {
                pending.key_bits = key_bits;
                pending.revocation_unknown = true;
            }
            CertificateVerdict::Rejected(desc) => {
                self.queue_translated_fatal(desc);
                return Err(TlsError::CertVerifyFailed(format!(
                    "certificate rejected ({desc:?})"
                )));
            }
        }

        let client_version = self.attempt_version.wire();
        let pending = pending_of(&mut self.pending)?;
        let leaf = pending.peer_certificates.first().cloned().unwrap_or_default();
        let kx = pending
            .key_exchange
            .as_mut()
            .ok_or_else(|| TlsError::InternalError("no key exchange object".into()))?;
        kx.prepare_premaster(client_version, &leaf)?;
        pending.calculate_master_secret()?;
        pending.calculate_keys(true)?;

        let params = pending.suite_params()?;
        let version = pending.policy()?.version();
        let session = Session::new(
            std::mem::take(&mut self.pending_session_id),
            params.suite,
            version,
            pending.master_secret().to_vec(),
            server_name.as_deref().unwrap_or_default(),
            pending.peer_certificates.clone(),
        );
        let revocation_unknown = pending.revocation_unknown;
        let certificate_requested = pending.certificate_requested;
        let handle = SessionHandle::new(Rc::new(session), &self.sessions);
        if revocation_unknown || !self.config.session_resumption {
            handle.mark_non_resumable();
        }
        pending.session = Some(handle);
        self.select_next_protocol()?;

        let policy = self.policy();
        if certificate_requested && !policy.supports_extensions() {
            self.queue_alert(Alert::warning(AlertDescription::NoCertificate));
        }
        let next_protocol = self.pending_mut()?.next_protocol.is_some();
        policy.seed_client_flight(
            &mut self.send_actions,
            &mut self.recv_actions,
            FlightOptions {
                certificate_requested,
                next_protocol,
            },
        );
        self.drive_send_actions()
    }

    fn process_finished(&mut self, body: &[u8], raw: &[u8]) -> Result<(), TlsError> {
        let policy = self.policy();
        let pending = pending_of(&mut self.pending)?;
        let received = decode_finished(body, policy.finished_len())?;
        let expected = policy.finished_message(pending.master_secret(), &pending.transcript, false)?;
        if !bool::from(received.ct_eq(&expected)) {
            return Err(TlsError::HandshakeFailed("server Finished mismatch".into()));
        }
        pending.transcript.update(raw);
        self.server_verify_data = received;
        self.change_cipher_pending = false;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Send path
    // -----------------------------------------------------------------

    fn drive_send_actions(&mut self) -> Result<(), TlsError> {
        let ssl3 = !self.policy().supports_extensions();
        while let Some(entry) = self.send_actions.next_send() {
            debug!("{:?}: sending {}", self.id, entry.tag);
            match entry.tag {
                MessageTag::ChangeCipherSpec => {
                    let next_write = self.pending_mut()?.take_write()?;
                    self.record_layer.queue_change_cipher(next_write);
                }
                MessageTag::Handshake(HandshakeType::Certificate) => {
                    let msg = encode_certificate(&CertificateMsg::default());
                    self.queue_handshake(msg)?;
                }
                MessageTag::Handshake(HandshakeType::ClientKeyExchange) => {
                    let pending = self.pending_mut()?;
                    let kx = pending
                        .key_exchange
                        .as_ref()
                        .ok_or_else(|| TlsError::InternalError("no key exchange object".into()))?;
                    let msg = encode_client_key_exchange(kx.client_key_exchange()?, ssl3);
                    self.queue_handshake(msg)?;
                }
                MessageTag::Handshake(HandshakeType::NextProtocol) => {
                    let selected = self.pending_mut()?.next_protocol.clone().unwrap_or_default();
                    let msg = encode_next_protocol(&NextProtocolMsg {
                        selected_protocol: selected,
                    });
                    self.queue_handshake(msg)?;
                }
                MessageTag::Handshake(HandshakeType::Finished) => {
                    let policy = self.policy();
                    let pending = self.pending_mut()?;
                    let verify =
                        policy.finished_message(pending.master_secret(), &pending.transcript, true)?;
                    let msg = encode_finished(&verify);
                    self.client_verify_data = verify;
                    self.queue_handshake(msg)?;
                }
                other => {
                    return Err(TlsError::InternalError(format!("cannot send {other}")));
                }
            }
            if entry.action == PostAction::Complete {
                self.complete_handshake()?;
            }
        }
        self.pump_output()
    }

    fn queue_handshake(&mut self, msg: Vec<u8>) -> Result<(), TlsError> {
        self.pending_mut()?.transcript.update(&msg);
        self.record_layer.queue_priority(ContentType::Handshake, msg);
        Ok(())
    }

    fn queue_alert(&mut self, alert: Alert) {
        self.observer.on_alert(alert, false);
        self.record_layer
            .queue_priority(ContentType::Alert, alert.encode().to_vec());
    }

    /// Queue a fatal alert normalised for the current version. Nothing is
    /// queued if the version has no legal equivalent.
    fn queue_translated_fatal(&mut self, desc: AlertDescription) {
        if let Some(d) = self.policy().translate_alert(desc) {
            self.queue_alert(Alert::fatal(d));
        }
    }

    /// Seal and send what is queued; post a continuation if a pass did
    /// not drain everything.
    fn pump_output(&mut self) -> Result<(), TlsError> {
        if self.terminated {
            return Ok(());
        }
        let version = self.write_version();
        let allow_application = self.state == SslState::Connected
            || (self.renegotiating && self.state != SslState::CloseConnection);
        let write = self.current.write_state_mut()?;
        let progress = self.record_layer.progress_encryption_pipeline(
            &mut self.comm,
            write,
            version,
            allow_application,
        )?;
        self.record_layer.flush(&mut self.comm)?;
        match progress {
            PipelineProgress::Idle => {}
            PipelineProgress::MorePriority => {
                self.comm
                    .post_delayed_message(self.id, ConnectionEvent::FlushPriority, PRIORITY_FLUSH_DELAY)
            }
            PipelineProgress::MoreApplication => {
                self.comm.post_message(self.id, ConnectionEvent::ContinueEncrypt)
            }
        }
        if !self.silenced {
            self.observer.on_progress(&self.record_layer.stats());
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Completion and teardown
    // -----------------------------------------------------------------

    fn complete_handshake(&mut self) -> Result<(), TlsError> {
        let mut next = self
            .pending
            .take()
            .ok_or_else(|| TlsError::InternalError("no pending connection state".into()))?;
        // The live cipher states stay in `current`'s slots; a queued write
        // switch still applies to whatever state is active when it is sent.
        if let Ok(read) = self.current.take_read() {
            next.install_read(read);
        }
        if let Ok(write) = self.current.take_write() {
            next.install_write(write);
        }
        let mut previous = std::mem::replace(&mut self.current, next);
        previous.release();

        let params = self.current.suite_params()?;
        let version = self.current.policy()?.version();
        let resumed = self.current.resumed;
        let mut key_bits = self.current.key_bits;
        let revocation_unknown = self.current.revocation_unknown;

        if let Some(handle) = &self.current.session {
            if resumed {
                key_bits = handle.security().map_or(0, |r| r.key_bits);
            }
            if revocation_unknown {
                warn!(
                    "{:?}: revocation status unknown; session not resumable, pipelining disabled",
                    self.id
                );
                handle.mark_non_resumable();
            }
            if !resumed {
                self.sessions
                    .borrow_mut()
                    .add_session_record(Rc::clone(handle.session()));
            }
        }
        self.pipelining_forbidden |= revocation_unknown;

        let rating = SecurityRating {
            version,
            cipher_name: params.name,
            cipher_bits: params.cipher.strength_bits(),
            key_bits,
            revocation_unknown,
        };
        if let Some(handle) = &self.current.session {
            handle.set_security(rating);
        }

        self.recv_actions.clear();
        self.send_actions.clear();
        self.change_cipher_pending = false;
        self.renegotiating = false;
        let first_handshake = !self.ever_connected;
        self.ever_connected = true;
        self.state = SslState::Connected;

        let split = self.config.record_splitting
            && version <= ProtocolVersion::Tls10
            && requires_record_splitting(params.suite);
        self.record_layer.enable_application_traffic(split);
        self.record_layer.set_write_records_to_out_buffer(false);

        if self.negotiation_owner {
            self.negotiation_owner = false;
            let waiters = self
                .sessions
                .borrow_mut()
                .finish_negotiation(&self.server_key(), self.id);
            for w in waiters {
                self.comm
                    .post_message(w, ConnectionEvent::SessionNegotiated { success: true });
            }
        }

        let info = ConnectionInfo {
            version,
            cipher_suite: params.suite,
            resumed,
            server_name: self.config.server_name.clone(),
            peer_certificates: self
                .current
                .session
                .as_ref()
                .map(|s| s.peer_certificates().to_vec())
                .unwrap_or_else(|| self.current.peer_certificates.clone()),
            next_protocol: self.current.next_protocol.clone(),
            security: rating,
            pipelining_forbidden: self.pipelining_forbidden,
        };
        debug!(
            "{:?}: handshake complete: {}{}",
            self.id,
            rating.summary(),
            if resumed { " (resumed)" } else { "" }
        );
        if first_handshake {
            self.observer.on_security_established(&info);
        }
        self.info = Some(info);
        Ok(())
    }

    fn fail(&mut self, err: TlsError) {
        if self.terminated {
            return;
        }
        warn!("{:?}: connection failed in {:?}: {err}", self.id, self.state);
        if error_sends_alert(&err) && !matches!(err, TlsError::CertVerifyFailed(_)) {
            self.queue_translated_fatal(alert_for_error(&err));
        }
        for state in [Some(&self.current), self.pending.as_ref()].into_iter().flatten() {
            if let Some(s) = &state.session {
                s.mark_non_resumable();
            }
        }
        if error_sends_alert(&err) {
            self.state = SslState::NotConnected;
            if let Err(e) = self.pump_output() {
                debug!("{:?}: fatal alert not sent: {e}", self.id);
            }
        }
        self.terminate(Some(err));
    }

    fn terminate(&mut self, error: Option<TlsError>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.state = SslState::NotConnected;
        self.hello_timer_generation = self.hello_timer_generation.wrapping_add(1);
        // A stopped connection drops whatever is still buffered.
        if !self.silenced {
            if let Err(e) = self.record_layer.flush(&mut self.comm) {
                debug!("{:?}: final flush failed: {e}", self.id);
            }
        }

        if self.negotiation_owner {
            self.negotiation_owner = false;
            let waiters = self
                .sessions
                .borrow_mut()
                .finish_negotiation(&self.server_key(), self.id);
            for w in waiters {
                self.comm
                    .post_message(w, ConnectionEvent::SessionNegotiated { success: false });
            }
        }
        if let Some(mut pending) = self.pending.take() {
            pending.release();
        }
        self.current.release();
        self.sessions.borrow_mut().purge();

        match &error {
            Some(e) => debug!("{:?}: terminated: {e}", self.id),
            None => debug!("{:?}: closed", self.id),
        }
        if !self.silenced {
            self.observer.on_terminated(error.as_ref());
        }
        self.error = error;
    }
}
