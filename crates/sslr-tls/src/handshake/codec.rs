//! Handshake message encoding/decoding for SSL 3.0 through TLS 1.2.

use sslr_types::TlsError;

use super::{HandshakeMessage, HandshakeType};
use crate::CipherSuite;

/// Handshake header: msg_type(1) || length(3).
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Extension type codes used by the client.
pub mod extension_type {
    pub const SERVER_NAME: u16 = 0;
    pub const STATUS_REQUEST: u16 = 5;
    pub const NEXT_PROTOCOL_NEGOTIATION: u16 = 13172;
    pub const RENEGOTIATION_INFO: u16 = 0xff01;
}

// ---------------------------------------------------------------------------
// Message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub ext_type: u16,
    pub data: Vec<u8>,
}

impl Extension {
    /// server_name with a single host_name entry.
    pub fn server_name(host: &str) -> Self {
        let name = host.as_bytes();
        let mut data = Vec::with_capacity(name.len() + 5);
        data.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
        data.push(0); // host_name
        data.extend_from_slice(&(name.len() as u16).to_be_bytes());
        data.extend_from_slice(name);
        Self {
            ext_type: extension_type::SERVER_NAME,
            data,
        }
    }

    /// status_request for OCSP with no responder ids or extensions.
    pub fn status_request() -> Self {
        Self {
            ext_type: extension_type::STATUS_REQUEST,
            data: vec![1, 0, 0, 0, 0],
        }
    }

    pub fn next_protocol_negotiation() -> Self {
        Self {
            ext_type: extension_type::NEXT_PROTOCOL_NEGOTIATION,
            data: Vec::new(),
        }
    }

    /// renegotiation_info carrying the previous verify_data (empty on the
    /// initial handshake).
    pub fn renegotiation_info(verify_data: &[u8]) -> Self {
        let mut data = Vec::with_capacity(verify_data.len() + 1);
        data.push(verify_data.len() as u8);
        data.extend_from_slice(verify_data);
        Self {
            ext_type: extension_type::RENEGOTIATION_INFO,
            data,
        }
    }
}

/// Find an extension by type.
pub fn find_extension(extensions: &[Extension], ext_type: u16) -> Option<&Extension> {
    extensions.iter().find(|e| e.ext_type == ext_type)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    /// Empty means the extensions block is omitted entirely.
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateMsg {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatusMsg {
    pub status_type: u8,
    pub response: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateRequestMsg {
    pub certificate_types: Vec<u8>,
    /// TLS 1.2 only.
    pub signature_algorithms: Vec<u16>,
    pub authorities: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextProtocolMsg {
    pub selected_protocol: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    fn err(&self, field: &str) -> TlsError {
        TlsError::DecodeError(format!("{}: truncated {field}", self.what))
    }

    fn bytes(&mut self, n: usize, field: &str) -> Result<&'a [u8], TlsError> {
        if self.data.len() - self.pos < n {
            return Err(self.err(field));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self, field: &str) -> Result<u8, TlsError> {
        Ok(self.bytes(1, field)?[0])
    }

    fn u16(&mut self, field: &str) -> Result<u16, TlsError> {
        let b = self.bytes(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, field: &str) -> Result<usize, TlsError> {
        let b = self.bytes(3, field)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self, field: &str) -> Result<&'a [u8], TlsError> {
        let n = self.u8(field)? as usize;
        self.bytes(n, field)
    }

    fn vec16(&mut self, field: &str) -> Result<&'a [u8], TlsError> {
        let n = self.u16(field)? as usize;
        self.bytes(n, field)
    }

    fn vec24(&mut self, field: &str) -> Result<&'a [u8], TlsError> {
        let n = self.u24(field)?;
        self.bytes(n, field)
    }

    fn random(&mut self) -> Result<[u8; 32], TlsError> {
        let mut r = [0u8; 32];
        r.copy_from_slice(self.bytes(32, "random")?);
        Ok(r)
    }

    fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    fn finish(&self) -> Result<(), TlsError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TlsError::DecodeError(format!(
                "{}: {} trailing bytes",
                self.what,
                self.data.len() - self.pos
            )))
        }
    }
}

fn push_u24(out: &mut Vec<u8>, n: usize) {
    out.push((n >> 16) as u8);
    out.push((n >> 8) as u8);
    out.push(n as u8);
}

// ---------------------------------------------------------------------------
// Handshake header
// ---------------------------------------------------------------------------

/// Parse a handshake header.
/// Returns (HandshakeType, body_slice, total_bytes_consumed).
pub fn parse_handshake_header(data: &[u8]) -> Result<(HandshakeType, &[u8], usize), TlsError> {
    if data.len() < HANDSHAKE_HEADER_LEN {
        return Err(TlsError::DecodeError("handshake header too short".into()));
    }
    let msg_type = HandshakeType::from_u8(data[0]).ok_or_else(|| {
        TlsError::UnexpectedMessage(format!("unknown handshake type: {}", data[0]))
    })?;
    let length = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | (data[3] as usize);
    let total = HANDSHAKE_HEADER_LEN + length;
    if data.len() < total {
        return Err(TlsError::DecodeError("handshake message body truncated".into()));
    }
    Ok((msg_type, &data[HANDSHAKE_HEADER_LEN..total], total))
}

/// Wrap a handshake body with the 4-byte header.
pub fn wrap_handshake(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    out.push(msg_type as u8);
    push_u24(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Collects handshake messages that span record boundaries, and splits
/// records that carry several messages.
#[derive(Debug)]
pub struct HandshakeReassembler {
    buf: Vec<u8>,
    max_message_len: usize,
}

impl HandshakeReassembler {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_message_len,
        }
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// The next complete message and its raw encoding (header included),
    /// or `None` if more data is needed.
    pub fn next_message(&mut self) -> Result<Option<(HandshakeMessage, Vec<u8>)>, TlsError> {
        if self.buf.len() < HANDSHAKE_HEADER_LEN {
            return Ok(None);
        }
        let msg_type = HandshakeType::from_u8(self.buf[0]).ok_or_else(|| {
            TlsError::UnexpectedMessage(format!("unknown handshake type: {}", self.buf[0]))
        })?;
        let length =
            ((self.buf[1] as usize) << 16) | ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
        if length > self.max_message_len {
            return Err(TlsError::IllegalParameter(format!(
                "handshake message of {length} bytes exceeds limit {}",
                self.max_message_len
            )));
        }
        let total = HANDSHAKE_HEADER_LEN + length;
        if self.buf.len() < total {
            return Ok(None);
        }
        let raw: Vec<u8> = self.buf.drain(..total).collect();
        let body = raw[HANDSHAKE_HEADER_LEN..].to_vec();
        Ok(Some((HandshakeMessage { msg_type, body }, raw)))
    }

    /// True while part of a message is buffered.
    pub fn is_mid_message(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

fn encode_extensions(extensions: &[Extension]) -> Vec<u8> {
    let mut out = Vec::new();
    for ext in extensions {
        out.extend_from_slice(&ext.ext_type.to_be_bytes());
        out.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
        out.extend_from_slice(&ext.data);
    }
    out
}

fn decode_extensions(r: &mut Reader<'_>) -> Result<Vec<Extension>, TlsError> {
    if r.is_empty() {
        return Ok(Vec::new());
    }
    let block = r.vec16("extensions")?;
    let mut er = Reader::new(block, "extensions");
    let mut out = Vec::new();
    while !er.is_empty() {
        let ext_type = er.u16("extension type")?;
        let data = er.vec16("extension data")?.to_vec();
        if out.iter().any(|e: &Extension| e.ext_type == ext_type) {
            return Err(TlsError::IllegalParameter(format!(
                "duplicate extension {ext_type}"
            )));
        }
        out.push(Extension { ext_type, data });
    }
    Ok(out)
}

/// Protocols advertised in a server's NPN extension.
pub fn decode_protocol_list(data: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
    let mut r = Reader::new(data, "next_protocol_negotiation");
    let mut out = Vec::new();
    while !r.is_empty() {
        let p = r.vec8("protocol")?;
        if p.is_empty() {
            return Err(TlsError::DecodeError("empty protocol name".into()));
        }
        out.push(p.to_vec());
    }
    Ok(out)
}

/// verify_data carried by renegotiation_info.
pub fn decode_renegotiation_info(data: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut r = Reader::new(data, "renegotiation_info");
    let v = r.vec8("verify_data")?.to_vec();
    r.finish()?;
    Ok(v)
}

// ---------------------------------------------------------------------------
// Hellos
// ---------------------------------------------------------------------------

pub fn encode_client_hello(ch: &ClientHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(128);
    body.extend_from_slice(&ch.version.to_be_bytes());
    body.extend_from_slice(&ch.random);
    body.push(ch.session_id.len() as u8);
    body.extend_from_slice(&ch.session_id);
    body.extend_from_slice(&((ch.cipher_suites.len() * 2) as u16).to_be_bytes());
    for s in &ch.cipher_suites {
        body.extend_from_slice(&s.0.to_be_bytes());
    }
    body.push(ch.compression_methods.len() as u8);
    body.extend_from_slice(&ch.compression_methods);
    if !ch.extensions.is_empty() {
        let ext = encode_extensions(&ch.extensions);
        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext);
    }
    wrap_handshake(HandshakeType::ClientHello, &body)
}

pub fn decode_client_hello(data: &[u8]) -> Result<ClientHello, TlsError> {
    let mut r = Reader::new(data, "ClientHello");
    let version = r.u16("version")?;
    let random = r.random()?;
    let session_id = r.vec8("session_id")?.to_vec();
    if session_id.len() > 32 {
        return Err(TlsError::IllegalParameter("session_id longer than 32".into()));
    }
    let suites = r.vec16("cipher_suites")?;
    if suites.len() % 2 != 0 {
        return Err(TlsError::DecodeError("odd cipher_suites length".into()));
    }
    let cipher_suites = suites
        .chunks_exact(2)
        .map(|c| CipherSuite(u16::from_be_bytes([c[0], c[1]])))
        .collect();
    let compression_methods = r.vec8("compression_methods")?.to_vec();
    let extensions = decode_extensions(&mut r)?;
    r.finish()?;
    Ok(ClientHello {
        version,
        random,
        session_id,
        cipher_suites,
        compression_methods,
        extensions,
    })
}

pub fn encode_server_hello(sh: &ServerHello) -> Vec<u8> {
    let mut body = Vec::with_capacity(80);
    body.extend_from_slice(&sh.version.to_be_bytes());
    body.extend_from_slice(&sh.random);
    body.push(sh.session_id.len() as u8);
    body.extend_from_slice(&sh.session_id);
    body.extend_from_slice(&sh.cipher_suite.0.to_be_bytes());
    body.push(sh.compression_method);
    if !sh.extensions.is_empty() {
        let ext = encode_extensions(&sh.extensions);
        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext);
    }
    wrap_handshake(HandshakeType::ServerHello, &body)
}

pub fn decode_server_hello(data: &[u8]) -> Result<ServerHello, TlsError> {
    let mut r = Reader::new(data, "ServerHello");
    let version = r.u16("version")?;
    let random = r.random()?;
    let session_id = r.vec8("session_id")?.to_vec();
    if session_id.len() > 32 {
        return Err(TlsError::IllegalParameter("session_id longer than 32".into()));
    }
    let cipher_suite = CipherSuite(r.u16("cipher_suite")?);
    let compression_method = r.u8("compression_method")?;
    let extensions = decode_extensions(&mut r)?;
    r.finish()?;
    Ok(ServerHello {
        version,
        random,
        session_id,
        cipher_suite,
        compression_method,
        extensions,
    })
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

pub fn encode_certificate(msg: &CertificateMsg) -> Vec<u8> {
    let mut list = Vec::new();
    for cert in &msg.chain {
        push_u24(&mut list, cert.len());
        list.extend_from_slice(cert);
    }
    let mut body = Vec::with_capacity(list.len() + 3);
    push_u24(&mut body, list.len());
    body.extend_from_slice(&list);
    wrap_handshake(HandshakeType::Certificate, &body)
}

pub fn decode_certificate(data: &[u8]) -> Result<CertificateMsg, TlsError> {
    let mut r = Reader::new(data, "Certificate");
    let list = r.vec24("certificate_list")?;
    r.finish()?;
    let mut lr = Reader::new(list, "Certificate");
    let mut chain = Vec::new();
    while !lr.is_empty() {
        let cert = lr.vec24("certificate")?;
        if cert.is_empty() {
            return Err(TlsError::DecodeError("empty certificate entry".into()));
        }
        chain.push(cert.to_vec());
    }
    Ok(CertificateMsg { chain })
}

pub fn encode_certificate_status(msg: &CertificateStatusMsg) -> Vec<u8> {
    let mut body = vec![msg.status_type];
    push_u24(&mut body, msg.response.len());
    body.extend_from_slice(&msg.response);
    wrap_handshake(HandshakeType::CertificateStatus, &body)
}

pub fn decode_certificate_status(data: &[u8]) -> Result<CertificateStatusMsg, TlsError> {
    let mut r = Reader::new(data, "CertificateStatus");
    let status_type = r.u8("status_type")?;
    if status_type != 1 {
        return Err(TlsError::IllegalParameter(format!(
            "certificate status type {status_type}"
        )));
    }
    let response = r.vec24("ocsp_response")?.to_vec();
    r.finish()?;
    Ok(CertificateStatusMsg {
        status_type,
        response,
    })
}

pub fn encode_certificate_request(msg: &CertificateRequestMsg, tls12: bool) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(msg.certificate_types.len() as u8);
    body.extend_from_slice(&msg.certificate_types);
    if tls12 {
        body.extend_from_slice(&((msg.signature_algorithms.len() * 2) as u16).to_be_bytes());
        for a in &msg.signature_algorithms {
            body.extend_from_slice(&a.to_be_bytes());
        }
    }
    let mut names = Vec::new();
    for dn in &msg.authorities {
        names.extend_from_slice(&(dn.len() as u16).to_be_bytes());
        names.extend_from_slice(dn);
    }
    body.extend_from_slice(&(names.len() as u16).to_be_bytes());
    body.extend_from_slice(&names);
    wrap_handshake(HandshakeType::CertificateRequest, &body)
}

pub fn decode_certificate_request(data: &[u8], tls12: bool) -> Result<CertificateRequestMsg, TlsError> {
    let mut r = Reader::new(data, "CertificateRequest");
    let certificate_types = r.vec8("certificate_types")?.to_vec();
    let mut signature_algorithms = Vec::new();
    if tls12 {
        let algs = r.vec16("supported_signature_algorithms")?;
        if algs.len() % 2 != 0 {
            return Err(TlsError::DecodeError("odd signature algorithm list".into()));
        }
        signature_algorithms = algs
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
    }
    let names = r.vec16("certificate_authorities")?;
    r.finish()?;
    let mut nr = Reader::new(names, "CertificateRequest");
    let mut authorities = Vec::new();
    while !nr.is_empty() {
        authorities.push(nr.vec16("distinguished_name")?.to_vec());
    }
    Ok(CertificateRequestMsg {
        certificate_types,
        signature_algorithms,
        authorities,
    })
}

// ---------------------------------------------------------------------------
// Key exchange and the rest
// ---------------------------------------------------------------------------

pub fn encode_server_hello_done() -> Vec<u8> {
    wrap_handshake(HandshakeType::ServerHelloDone, &[])
}

pub fn encode_hello_request() -> Vec<u8> {
    wrap_handshake(HandshakeType::HelloRequest, &[])
}

/// SSL 3.0 sends the encrypted premaster bare; TLS prefixes its length.
pub fn encode_client_key_exchange(exchange_keys: &[u8], ssl3: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(exchange_keys.len() + 2);
    if !ssl3 {
        body.extend_from_slice(&(exchange_keys.len() as u16).to_be_bytes());
    }
    body.extend_from_slice(exchange_keys);
    wrap_handshake(HandshakeType::ClientKeyExchange, &body)
}

pub fn decode_client_key_exchange(data: &[u8], ssl3: bool) -> Result<Vec<u8>, TlsError> {
    if ssl3 {
        return Ok(data.to_vec());
    }
    let mut r = Reader::new(data, "ClientKeyExchange");
    let v = r.vec16("exchange_keys")?.to_vec();
    r.finish()?;
    Ok(v)
}

/// NextProtocol, padded so the body is a multiple of 32 bytes.
pub fn encode_next_protocol(msg: &NextProtocolMsg) -> Vec<u8> {
    let len = msg.selected_protocol.len();
    let padding = 32 - ((len + 2) % 32);
    let mut body = Vec::with_capacity(len + 2 + padding);
    body.push(len as u8);
    body.extend_from_slice(&msg.selected_protocol);
    body.push(padding as u8);
    body.resize(body.len() + padding, 0);
    wrap_handshake(HandshakeType::NextProtocol, &body)
}

pub fn decode_next_protocol(data: &[u8]) -> Result<NextProtocolMsg, TlsError> {
    let mut r = Reader::new(data, "NextProtocol");
    let selected_protocol = r.vec8("selected_protocol")?.to_vec();
    r.vec8("padding")?;
    r.finish()?;
    Ok(NextProtocolMsg { selected_protocol })
}

pub fn encode_finished(verify_data: &[u8]) -> Vec<u8> {
    wrap_handshake(HandshakeType::Finished, verify_data)
}

pub fn decode_finished(data: &[u8], expected_len: usize) -> Result<Vec<u8>, TlsError> {
    if data.len() != expected_len {
        return Err(TlsError::DecodeError(format!(
            "Finished of {} bytes, expected {expected_len}",
            data.len()
        )));
    }
    Ok(data.to_vec())
}
