//! Streaming record engine.
//!
//! Incoming bytes are framed into records and queued undecrypted, so each
//! record is opened with whatever read state is active when it is dispatched
//! (a ChangeCipherSpec switches keys between two records of the same read).
//! Outgoing data sits in two queues: the priority queue (handshake, alert,
//! ChangeCipherSpec and the key switch that follows it) always drains before
//! application data.

use std::collections::VecDeque;

use log::{debug, trace};
use sslr_types::TlsError;

use super::cipher_state::CipherState;
use super::{parse_header, ContentType, Record, MAX_PLAINTEXT_LENGTH, RECORD_HEADER_LEN};
use crate::transport::ProtocolComm;

/// Smallest accepted network buffer.
pub const MIN_NETWORK_BUFFER_SIZE: usize = 4096;

/// Accumulates one record's header and body across transport reads.
#[derive(Debug, Default)]
pub struct RecordFramer {
    header: [u8; RECORD_HEADER_LEN],
    header_len: usize,
    current: Option<(ContentType, u16, usize)>,
    body: Vec<u8>,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume bytes from `data`. Returns how many were used and the record
    /// completed by them, if any.
    pub fn feed(&mut self, data: &[u8]) -> Result<(usize, Option<Record>), TlsError> {
        let mut used = 0;
        if self.current.is_none() {
            let take = (RECORD_HEADER_LEN - self.header_len).min(data.len());
            self.header[self.header_len..self.header_len + take].copy_from_slice(&data[..take]);
            self.header_len += take;
            used += take;
            if self.header_len < RECORD_HEADER_LEN {
                return Ok((used, None));
            }
            let (ct, version, length) = parse_header(&self.header)?;
            self.current = Some((ct, version, length));
            self.body = Vec::with_capacity(length);
        }
        let Some((ct, version, length)) = self.current else {
            return Ok((used, None));
        };
        let take = (length - self.body.len()).min(data.len() - used);
        self.body.extend_from_slice(&data[used..used + take]);
        used += take;
        if self.body.len() < length {
            return Ok((used, None));
        }
        self.current = None;
        self.header_len = 0;
        let fragment = std::mem::take(&mut self.body);
        Ok((used, Some(Record::new(ct, version, fragment))))
    }

    /// True when no partial record is buffered.
    pub fn is_idle(&self) -> bool {
        self.header_len == 0 && self.current.is_none()
    }
}

/// Outgoing priority-queue item.
pub enum OutboundItem {
    Data {
        content_type: ContentType,
        payload: Vec<u8>,
    },
    /// Internal marker: switch to the next write state. Never on the wire.
    ActivateWriteCipher(Box<CipherState>),
}

/// Record pipeline status bits, orthogonal to the handshake state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordLayerStatus {
    /// Send the next application byte alone (BEAST 1/(n-1) split).
    pub perform_application_data_split: bool,
    /// Accumulate sealed records and only hand them to the transport on flush.
    pub write_records_to_out_buffer: bool,
    /// Application data may be sealed.
    pub application_traffic: bool,
    /// The negotiated suite and version need the split at all.
    pub split_eligible: bool,
}

/// Result of one encrypt pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineProgress {
    Idle,
    MorePriority,
    MoreApplication,
}

/// Byte and record counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub app_bytes_in: u64,
    pub app_bytes_out: u64,
    pub wire_bytes_in: u64,
    pub wire_bytes_out: u64,
    pub records_in: u64,
    pub records_out: u64,
}

impl TrafficStats {
    /// Protocol overhead of everything sent so far.
    pub fn overhead_out(&self) -> u64 {
        self.wire_bytes_out.saturating_sub(self.app_bytes_out)
    }

    pub fn overhead_in(&self) -> u64 {
        self.wire_bytes_in.saturating_sub(self.app_bytes_in)
    }
}

pub struct RecordLayer {
    network_buffer_size: usize,
    max_records_per_pass: usize,
    read_buf: Vec<u8>,
    read_len: usize,
    framer: RecordFramer,
    encrypted_in: VecDeque<Record>,
    app_in: VecDeque<u8>,
    priority: VecDeque<OutboundItem>,
    app_out: VecDeque<Vec<u8>>,
    out_buffer: Vec<u8>,
    read_version: Option<u16>,
    status: RecordLayerStatus,
    stats: TrafficStats,
}

impl RecordLayer {
    pub fn new(network_buffer_size: usize, max_records_per_pass: usize) -> Self {
        let size = network_buffer_size.max(MIN_NETWORK_BUFFER_SIZE);
        Self {
            network_buffer_size: size,
            max_records_per_pass: max_records_per_pass.max(1),
            read_buf: vec![0u8; size],
            read_len: 0,
            framer: RecordFramer::new(),
            encrypted_in: VecDeque::new(),
            app_in: VecDeque::new(),
            priority: VecDeque::new(),
            app_out: VecDeque::new(),
            out_buffer: Vec::new(),
            read_version: None,
            status: RecordLayerStatus::default(),
            stats: TrafficStats::default(),
        }
    }

    /// Drop all buffered state, e.g. before reconnecting.
    pub fn reset(&mut self) {
        let app_out = std::mem::take(&mut self.app_out);
        let stats = self.stats;
        *self = Self::new(self.network_buffer_size, self.max_records_per_pass);
        // Unsent application data survives a reconnect.
        self.app_out = app_out;
        self.stats = stats;
    }

    pub fn status(&self) -> RecordLayerStatus {
        self.status
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    // ---------------------------------------------------------------
    // Receive path
    // ---------------------------------------------------------------

    /// Read what the transport has and frame complete records.
    /// Returns the number of bytes read.
    pub fn fill_from<C: ProtocolComm + ?Sized>(&mut self, comm: &mut C) -> Result<usize, TlsError> {
        let n = comm.read_data(&mut self.read_buf[self.read_len..])?;
        self.read_len += n;
        self.stats.wire_bytes_in += n as u64;

        let mut pos = 0;
        while pos < self.read_len {
            let (used, record) = self.framer.feed(&self.read_buf[pos..self.read_len])?;
            pos += used;
            if let Some(record) = record {
                trace!(
                    "framed {:?} record, version {:#06x}, {} bytes",
                    record.content_type,
                    record.version,
                    record.fragment.len()
                );
                self.encrypted_in.push_back(record);
            }
            if used == 0 {
                break;
            }
        }
        self.read_buf.copy_within(pos..self.read_len, 0);
        self.read_len -= pos;
        Ok(n)
    }

    pub fn has_pending_records(&self) -> bool {
        !self.encrypted_in.is_empty()
    }

    pub fn set_read_version(&mut self, version: u16) {
        self.read_version = Some(version);
    }

    /// Pop the next framed record and remove its protection.
    ///
    /// A record whose version differs from the negotiated read version is
    /// accepted (and adopted) only when `accept_new_version` is set.
    pub fn next_record(
        &mut self,
        read_state: &mut CipherState,
        accept_new_version: bool,
    ) -> Result<Option<Record>, TlsError> {
        let Some(record) = self.encrypted_in.pop_front() else {
            return Ok(None);
        };
        match self.read_version {
            Some(v) if v != record.version => {
                if !accept_new_version {
                    return Err(TlsError::IllegalParameter(format!(
                        "record version {:#06x}, expected {v:#06x}",
                        record.version
                    )));
                }
                self.read_version = Some(record.version);
            }
            None => self.read_version = Some(record.version),
            _ => {}
        }

        let plain = if read_state.is_plaintext() {
            record
        } else {
            record.decrypt(read_state)?
        };
        if plain.fragment.len() > MAX_PLAINTEXT_LENGTH {
            return Err(TlsError::RecordOverflow);
        }
        self.stats.records_in += 1;
        Ok(Some(plain))
    }

    /// Hand decrypted application bytes to the consumer buffer.
    pub fn push_application_data(&mut self, data: &[u8]) {
        self.app_in.extend(data);
        self.stats.app_bytes_in += data.len() as u64;
    }

    pub fn available(&self) -> usize {
        self.app_in.len()
    }

    pub fn read_application_data(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.app_in.len());
        for (dst, src) in buf.iter_mut().zip(self.app_in.drain(..n)) {
            *dst = src;
        }
        n
    }

    // ---------------------------------------------------------------
    // Send path
    // ---------------------------------------------------------------

    pub fn queue_priority(&mut self, content_type: ContentType, payload: Vec<u8>) {
        self.priority.push_back(OutboundItem::Data {
            content_type,
            payload,
        });
    }

    /// Queue ChangeCipherSpec followed by the switch to `next_write`.
    pub fn queue_change_cipher(&mut self, next_write: CipherState) {
        self.queue_priority(ContentType::ChangeCipherSpec, vec![1]);
        self.priority
            .push_back(OutboundItem::ActivateWriteCipher(Box::new(next_write)));
    }

    /// Queue application data. Re-arms the record split when traffic
    /// restarts from an empty queue.
    pub fn queue_application(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if self.app_out.is_empty() && self.status.application_traffic {
            self.status.perform_application_data_split = self.status.split_eligible;
        }
        self.app_out.push_back(data.to_vec());
    }

    /// Open the application data path after a completed handshake.
    pub fn enable_application_traffic(&mut self, split_eligible: bool) {
        self.status.application_traffic = true;
        self.status.split_eligible = split_eligible;
        self.status.perform_application_data_split = split_eligible;
    }

    pub fn suspend_application_traffic(&mut self) {
        self.status.application_traffic = false;
    }

    pub fn set_write_records_to_out_buffer(&mut self, on: bool) {
        self.status.write_records_to_out_buffer = on;
    }

    fn max_fragment(&self) -> usize {
        self.network_buffer_size.min(MAX_PLAINTEXT_LENGTH)
    }

    /// Split a logical message into wire-sized pieces.
    pub fn fragment_message<'a>(&self, data: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        data.chunks(self.max_fragment())
    }

    fn emit<C: ProtocolComm + ?Sized>(
        &mut self,
        comm: &mut C,
        write_state: &mut CipherState,
        content_type: ContentType,
        version: u16,
        fragment: &[u8],
    ) -> Result<(), TlsError> {
        let sealed = Record::new(content_type, version, fragment.to_vec()).encrypt(write_state)?;
        let bytes = sealed.to_bytes();
        self.stats.wire_bytes_out += bytes.len() as u64;
        self.stats.records_out += 1;
        self.out_buffer.extend_from_slice(&bytes);
        if !self.status.write_records_to_out_buffer {
            self.flush(comm)?;
        }
        Ok(())
    }

    /// Seal and send queued data, at most `max_records_per_pass` records.
    ///
    /// The priority queue is drained first. Application data is only
    /// touched when `allow_application` is set and the traffic is enabled.
    pub fn progress_encryption_pipeline<C: ProtocolComm + ?Sized>(
        &mut self,
        comm: &mut C,
        write_state: &mut CipherState,
        version: u16,
        allow_application: bool,
    ) -> Result<PipelineProgress, TlsError> {
        let mut records = 0;

        while let Some(item) = self.priority.pop_front() {
            match item {
                OutboundItem::Data {
                    content_type,
                    payload,
                } => {
                    for piece in self.fragment_message(&payload) {
                        self.emit(comm, write_state, content_type, version, piece)?;
                        records += 1;
                    }
                }
                OutboundItem::ActivateWriteCipher(next) => {
                    debug!("write cipher state activated");
                    *write_state = *next;
                }
            }
            if records >= self.max_records_per_pass && !self.priority.is_empty() {
                return Ok(PipelineProgress::MorePriority);
            }
        }

        if !allow_application || !self.status.application_traffic {
            return Ok(PipelineProgress::Idle);
        }

        while let Some(chunk) = self.app_out.pop_front() {
            if records >= self.max_records_per_pass {
                self.app_out.push_front(chunk);
                return Ok(PipelineProgress::MoreApplication);
            }
            let mut start = 0;
            if self.status.perform_application_data_split {
                self.status.perform_application_data_split = false;
                if chunk.len() > 1 {
                    trace!("splitting application record 1/(n-1)");
                    self.emit(comm, write_state, ContentType::ApplicationData, version, &chunk[..1])?;
                    records += 1;
                    start = 1;
                }
            }
            for piece in self.fragment_message(&chunk[start..]) {
                self.emit(comm, write_state, ContentType::ApplicationData, version, piece)?;
                records += 1;
            }
            self.stats.app_bytes_out += chunk.len() as u64;
        }
        Ok(PipelineProgress::Idle)
    }

    /// Send everything accumulated in the out buffer.
    pub fn flush<C: ProtocolComm + ?Sized>(&mut self, comm: &mut C) -> Result<(), TlsError> {
        if self.out_buffer.is_empty() {
            return Ok(());
        }
        trace!("flushing {} bytes", self.out_buffer.len());
        let result = comm.send_data(&self.out_buffer);
        self.out_buffer.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::cipher_state::RecordMac;
    use crate::transport::{ConnectionEvent, ConnectionId};
    use sslr_crypto::cipher::new_cipher;
    use sslr_types::{CipherAlgId, HashAlgId};
    use std::time::Duration;

    #[derive(Default)]
    struct Pipe {
        inbound: Vec<u8>,
        sent: Vec<Vec<u8>>,
        chunk: usize,
    }

    impl ProtocolComm for Pipe {
        fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
            let limit = if self.chunk == 0 { buf.len() } else { self.chunk };
            let n = buf.len().min(self.inbound.len()).min(limit);
            buf[..n].copy_from_slice(&self.inbound[..n]);
            self.inbound.drain(..n);
            Ok(n)
        }
        fn send_data(&mut self, data: &[u8]) -> Result<(), TlsError> {
            self.sent.push(data.to_vec());
            Ok(())
        }
        fn closed(&self) -> bool {
            false
        }
        fn reconnect(&mut self) -> Result<(), TlsError> {
            Ok(())
        }
        fn post_message(&mut self, _to: ConnectionId, _event: ConnectionEvent) {}
        fn post_delayed_message(&mut self, _: ConnectionId, _: ConnectionEvent, _: Duration) {}
    }

    fn aes_state() -> CipherState {
        let mut s = CipherState::new();
        s.configure(
            new_cipher(CipherAlgId::Aes128Cbc).unwrap(),
            RecordMac::Hmac(HashAlgId::Sha1),
        );
        s.load_secret(&[1u8; 20]).unwrap();
        s.load_key_iv(&[2u8; 16], &[3u8; 16]).unwrap();
        s
    }

    fn sent_records(pipe: &Pipe) -> Vec<Record> {
        let all: Vec<u8> = pipe.sent.concat();
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < all.len() {
            let (r, used) = Record::parse(&all[pos..]).unwrap();
            out.push(r);
            pos += used;
        }
        out
    }

    #[test]
    fn test_framer_across_byte_sized_reads() {
        let mut pipe = Pipe {
            chunk: 1,
            ..Default::default()
        };
        pipe.inbound
            .extend(Record::new(ContentType::Handshake, 0x0301, vec![9; 10]).to_bytes());
        pipe.inbound
            .extend(Record::new(ContentType::Alert, 0x0301, vec![1, 0]).to_bytes());
        let mut layer = RecordLayer::new(4096, 8);
        let mut plain = CipherState::plaintext();
        let mut got = Vec::new();
        while layer.fill_from(&mut pipe).unwrap() > 0 {
            while let Some(r) = layer.next_record(&mut plain, false).unwrap() {
                got.push(r);
            }
        }
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].fragment, vec![9; 10]);
        assert_eq!(got[1].content_type, ContentType::Alert);
    }

    #[test]
    fn test_version_mismatch_rejected_unless_accepted() {
        let mut pipe = Pipe::default();
        pipe.inbound
            .extend(Record::new(ContentType::Handshake, 0x0303, vec![1]).to_bytes());
        pipe.inbound
            .extend(Record::new(ContentType::Handshake, 0x0301, vec![2]).to_bytes());
        pipe.inbound
            .extend(Record::new(ContentType::Handshake, 0x0302, vec![3]).to_bytes());
        let mut layer = RecordLayer::new(4096, 8);
        layer.set_read_version(0x0303);
        let mut plain = CipherState::plaintext();
        layer.fill_from(&mut pipe).unwrap();
        assert!(layer.next_record(&mut plain, false).unwrap().is_some());
        assert!(layer.next_record(&mut plain, true).unwrap().is_some());
        assert!(matches!(
            layer.next_record(&mut plain, false),
            Err(TlsError::IllegalParameter(_))
        ));
    }

    #[test]
    fn test_priority_drains_before_application() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 64);
        let mut write = CipherState::plaintext();
        layer.enable_application_traffic(false);
        layer.queue_application(b"app");
        layer.queue_priority(ContentType::Alert, vec![1, 0]);
        layer.queue_priority(ContentType::Handshake, vec![0, 0, 0, 0]);
        let progress = layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0301, true)
            .unwrap();
        assert_eq!(progress, PipelineProgress::Idle);
        let types: Vec<ContentType> = sent_records(&pipe).iter().map(|r| r.content_type).collect();
        assert_eq!(
            types,
            vec![
                ContentType::Alert,
                ContentType::Handshake,
                ContentType::ApplicationData
            ]
        );
    }

    #[test]
    fn test_fragment_message_caps_at_buffer_size() {
        let layer = RecordLayer::new(4096, 8);
        let data = vec![0u8; 10_000];
        let sizes: Vec<usize> = layer.fragment_message(&data).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4096, 4096, 1808]);

        let big = RecordLayer::new(64 * 1024, 8);
        let data = vec![0u8; 20_000];
        let sizes: Vec<usize> = big.fragment_message(&data).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![MAX_PLAINTEXT_LENGTH, 20_000 - MAX_PLAINTEXT_LENGTH]);
    }

    #[test]
    fn test_pipeline_fragments_at_buffer_size() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 64);
        let mut write = CipherState::plaintext();
        layer.enable_application_traffic(false);
        layer.queue_priority(ContentType::Handshake, vec![0x0b; 10_000]);
        layer.queue_application(&[0x61; 9000]);
        layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0303, true)
            .unwrap();

        let recs = sent_records(&pipe);
        let shape: Vec<(ContentType, usize)> =
            recs.iter().map(|r| (r.content_type, r.fragment.len())).collect();
        assert_eq!(
            shape,
            vec![
                (ContentType::Handshake, 4096),
                (ContentType::Handshake, 4096),
                (ContentType::Handshake, 1808),
                (ContentType::ApplicationData, 4096),
                (ContentType::ApplicationData, 4096),
                (ContentType::ApplicationData, 808),
            ]
        );
    }

    #[test]
    fn test_split_first_application_record() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 64);
        let mut write = aes_state();
        layer.enable_application_traffic(true);
        layer.queue_application(b"GET / HTTP/1.0");
        layer.queue_application(b"more");
        layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0301, true)
            .unwrap();

        let mut read = aes_state();
        let plains: Vec<Vec<u8>> = sent_records(&pipe)
            .iter()
            .map(|r| r.decrypt(&mut read).unwrap().fragment)
            .collect();
        assert_eq!(
            plains,
            vec![b"G".to_vec(), b"ET / HTTP/1.0".to_vec(), b"more".to_vec()]
        );

        // Traffic restarts from an empty queue: split again.
        pipe.sent.clear();
        layer.queue_application(b"xyz");
        layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0301, true)
            .unwrap();
        let plains: Vec<Vec<u8>> = sent_records(&pipe)
            .iter()
            .map(|r| r.decrypt(&mut read).unwrap().fragment)
            .collect();
        assert_eq!(plains, vec![b"x".to_vec(), b"yz".to_vec()]);
    }

    #[test]
    fn test_no_split_when_not_eligible() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 64);
        let mut write = CipherState::plaintext();
        layer.enable_application_traffic(false);
        layer.queue_application(b"hello");
        layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0303, true)
            .unwrap();
        let recs = sent_records(&pipe);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].fragment, b"hello");
    }

    #[test]
    fn test_activate_write_cipher_switches_mid_queue() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 64);
        let mut write = CipherState::plaintext();
        layer.queue_priority(ContentType::Handshake, vec![16, 0, 0, 0]);
        layer.queue_change_cipher(aes_state());
        layer.queue_priority(ContentType::Handshake, vec![20, 0, 0, 0]);
        layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0301, false)
            .unwrap();
        let recs = sent_records(&pipe);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].fragment, vec![16, 0, 0, 0]);
        assert_eq!(recs[1].content_type, ContentType::ChangeCipherSpec);
        assert_eq!(recs[1].fragment, vec![1]);
        // protected: 4 + 20 MAC -> padded to 32
        assert_eq!(recs[2].fragment.len(), 32);
        assert_eq!(write.sequence_number(), 1);
    }

    #[test]
    fn test_pipeline_yields_after_budget() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 2);
        let mut write = CipherState::plaintext();
        layer.enable_application_traffic(false);
        for _ in 0..5 {
            layer.queue_application(b"chunk");
        }
        let p = layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0303, true)
            .unwrap();
        assert_eq!(p, PipelineProgress::MoreApplication);
        assert_eq!(sent_records(&pipe).len(), 2);
        let p = layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0303, true)
            .unwrap();
        assert_eq!(p, PipelineProgress::MoreApplication);
        let p = layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0303, true)
            .unwrap();
        assert_eq!(p, PipelineProgress::Idle);
        assert_eq!(sent_records(&pipe).len(), 5);

        for _ in 0..3 {
            layer.queue_priority(ContentType::Handshake, vec![0, 0, 0, 0]);
        }
        let p = layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0303, false)
            .unwrap();
        assert_eq!(p, PipelineProgress::MorePriority);
    }

    #[test]
    fn test_coalescing_defers_send_until_flush() {
        let mut pipe = Pipe::default();
        let mut layer = RecordLayer::new(4096, 64);
        let mut write = CipherState::plaintext();
        layer.set_write_records_to_out_buffer(true);
        layer.queue_priority(ContentType::Handshake, vec![1, 0, 0, 0]);
        layer.queue_priority(ContentType::Handshake, vec![2, 0, 0, 0]);
        layer
            .progress_encryption_pipeline(&mut pipe, &mut write, 0x0301, false)
            .unwrap();
        assert!(pipe.sent.is_empty());
        layer.flush(&mut pipe).unwrap();
        assert_eq!(pipe.sent.len(), 1);
        assert_eq!(sent_records(&pipe).len(), 2);
        assert_eq!(layer.stats().records_out, 2);
    }

    #[test]
    fn test_application_read_buffer() {
        let mut layer = RecordLayer::new(4096, 8);
        layer.push_application_data(b"hello world");
        let mut buf = [0u8; 5];
        assert_eq!(layer.read_application_data(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(layer.available(), 6);
        assert_eq!(layer.stats().app_bytes_in, 11);
    }
}
