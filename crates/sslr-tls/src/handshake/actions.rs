//! Ordered handshake action queues.
//!
//! Each direction keeps a list of entries. The receive queue is scanned in
//! order and the first entry matching an incoming message governs the
//! transition. An optional (`Expect`) entry that is passed over can no
//! longer match; a `MustReceive` entry that does not match is a protocol
//! error. `Ignore` entries swallow their message type and stay in place.

use std::fmt;

use sslr_types::TlsError;

use super::HandshakeType;

/// What a queue entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    Handshake(HandshakeType),
    ChangeCipherSpec,
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageTag::Handshake(t) => write!(f, "{t:?}"),
            MessageTag::ChangeCipherSpec => f.write_str("ChangeCipherSpec"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// May arrive; skipped if something later arrives first.
    Expect,
    /// Must be the next message of its group.
    MustReceive,
    /// Silently dropped whenever it arrives.
    Ignore,
    /// Queued for sending.
    WillSend,
    Sent,
    Received,
    /// Queued for sending once unblocked.
    Block,
}

/// Step performed after an entry is received or sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    None,
    /// Promote the pending read cipher.
    ActivateRead,
    /// Queue the pending write cipher behind the ChangeCipherSpec.
    ActivateWrite,
    /// Release blocked sends (resumed handshake, server Finished verified).
    UnblockSends,
    /// The handshake is complete after this message.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionEntry {
    pub tag: MessageTag,
    pub status: ActionStatus,
    pub action: PostAction,
}

impl ActionEntry {
    pub fn new(tag: MessageTag, status: ActionStatus, action: PostAction) -> Self {
        Self {
            tag,
            status,
            action,
        }
    }
}

/// Result of matching an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    /// Process the message, then perform the action.
    Accept(PostAction),
    /// Drop the message.
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct ActionQueue {
    entries: Vec<ActionEntry>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: MessageTag, status: ActionStatus, action: PostAction) {
        self.entries.push(ActionEntry::new(tag, status, action));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Find the entry governing an incoming message.
    pub fn match_incoming(&mut self, tag: MessageTag) -> Result<Incoming, TlsError> {
        let mut skipped = Vec::new();
        let mut found = None;
        for (i, entry) in self.entries.iter().enumerate() {
            match entry.status {
                ActionStatus::Ignore if entry.tag == tag => return Ok(Incoming::Ignored),
                ActionStatus::Expect | ActionStatus::MustReceive if entry.tag == tag => {
                    found = Some(i);
                    break;
                }
                ActionStatus::Expect => skipped.push(i),
                ActionStatus::MustReceive => {
                    return Err(TlsError::UnexpectedMessage(format!(
                        "received {tag}, expected {}",
                        entry.tag
                    )))
                }
                _ => {}
            }
        }
        let Some(i) = found else {
            return Err(TlsError::UnexpectedMessage(format!(
                "received {tag}, not expected at this point"
            )));
        };
        self.entries[i].status = ActionStatus::Received;
        let action = self.entries[i].action;
        for j in skipped.into_iter().rev() {
            self.entries.remove(j);
        }
        Ok(Incoming::Accept(action))
    }

    /// Take the next sendable entry, marking it sent. Stops at a blocked
    /// entry so the send order is preserved.
    pub fn next_send(&mut self) -> Option<ActionEntry> {
        for entry in self.entries.iter_mut() {
            match entry.status {
                ActionStatus::WillSend => {
                    entry.status = ActionStatus::Sent;
                    return Some(*entry);
                }
                ActionStatus::Block => return None,
                _ => {}
            }
        }
        None
    }

    pub fn unblock(&mut self) {
        for entry in self.entries.iter_mut() {
            if entry.status == ActionStatus::Block {
                entry.status = ActionStatus::WillSend;
            }
        }
    }

    /// Tags still waiting to be sent, in order.
    pub fn pending_sends(&self) -> Vec<MessageTag> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, ActionStatus::WillSend | ActionStatus::Block))
            .map(|e| e.tag)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CERT: MessageTag = MessageTag::Handshake(HandshakeType::Certificate);
    const SKE: MessageTag = MessageTag::Handshake(HandshakeType::ServerKeyExchange);
    const CREQ: MessageTag = MessageTag::Handshake(HandshakeType::CertificateRequest);
    const DONE: MessageTag = MessageTag::Handshake(HandshakeType::ServerHelloDone);
    const FIN: MessageTag = MessageTag::Handshake(HandshakeType::Finished);
    const HREQ: MessageTag = MessageTag::Handshake(HandshakeType::HelloRequest);

    fn server_flight() -> ActionQueue {
        let mut q = ActionQueue::new();
        q.push(HREQ, ActionStatus::Ignore, PostAction::None);
        q.push(CERT, ActionStatus::MustReceive, PostAction::None);
        q.push(SKE, ActionStatus::Expect, PostAction::None);
        q.push(CREQ, ActionStatus::Expect, PostAction::None);
        q.push(DONE, ActionStatus::MustReceive, PostAction::None);
        q
    }

    #[test]
    fn test_in_order_flight() {
        let mut q = server_flight();
        assert_eq!(q.match_incoming(CERT).unwrap(), Incoming::Accept(PostAction::None));
        assert_eq!(q.match_incoming(DONE).unwrap(), Incoming::Accept(PostAction::None));
        // Everything up to ServerHelloDone is settled.
        assert!(matches!(
            q.match_incoming(CERT),
            Err(TlsError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_skipped_expect_becomes_unreachable() {
        let mut q = server_flight();
        q.match_incoming(CERT).unwrap();
        q.match_incoming(CREQ).unwrap();
        // SKE was passed over and can no longer arrive.
        assert!(matches!(
            q.match_incoming(SKE),
            Err(TlsError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_must_receive_mismatch_is_error() {
        let mut q = server_flight();
        assert!(matches!(
            q.match_incoming(DONE),
            Err(TlsError::UnexpectedMessage(_))
        ));
        let mut q = server_flight();
        q.match_incoming(CERT).unwrap();
        assert!(matches!(
            q.match_incoming(FIN),
            Err(TlsError::UnexpectedMessage(_))
        ));
    }

    #[test]
    fn test_ignore_is_sticky() {
        let mut q = server_flight();
        assert_eq!(q.match_incoming(HREQ).unwrap(), Incoming::Ignored);
        q.match_incoming(CERT).unwrap();
        assert_eq!(q.match_incoming(HREQ).unwrap(), Incoming::Ignored);
    }

    #[test]
    fn test_send_order_and_block() {
        let mut q = ActionQueue::new();
        q.push(
            MessageTag::ChangeCipherSpec,
            ActionStatus::Block,
            PostAction::ActivateWrite,
        );
        q.push(FIN, ActionStatus::Block, PostAction::Complete);
        assert!(q.next_send().is_none());
        assert_eq!(q.pending_sends(), vec![MessageTag::ChangeCipherSpec, FIN]);
        q.unblock();
        let first = q.next_send().unwrap();
        assert_eq!(first.tag, MessageTag::ChangeCipherSpec);
        assert_eq!(first.action, PostAction::ActivateWrite);
        assert_eq!(q.next_send().unwrap().tag, FIN);
        assert!(q.next_send().is_none());
        assert!(q.pending_sends().is_empty());
    }
}
