//! Ordered queue of transactions against one device channel.

use std::{collections::VecDeque, fmt::Display};

use crate::frame::CODE_LEN;

/// Number of zero bytes sent to, and expected back from, a device to resynchronize it.
pub const SYNC_LEN: usize = 64;

/// What is written to the device for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A text command.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// The payload as bytes, as they are written to the device.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Binary(b) => b.as_slice(),
        }
    }

    /// The four character command code at the start of the payload, if there is one.
    pub fn code(&self) -> Option<&str> {
        let bytes = self.as_bytes().get(..CODE_LEN)?;
        std::str::from_utf8(bytes)
            .ok()
            .filter(|code| code.bytes().all(|b| b.is_ascii_graphic()))
    }
}

impl Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Text(s) => write!(f, "{s}"),
            Payload::Binary(b) => write!(f, "{}", b.escape_ascii()),
        }
    }
}

/// Who issued a transaction and receives its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A client connection, identified by its name.
    Client(String),
    /// The daemon itself, e.g., for status polling.
    Internal,
}

impl Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Client(name) => write!(f, "{name}"),
            Source::Internal => write!(f, "self"),
        }
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Queued by a client, not yet transmitted.
    New,
    /// Queued as idle status poll, not yet transmitted.
    Status,
    /// Transmitted, awaiting the reply.
    Sent,
    /// Status poll transmitted, awaiting the reply. The reply is not echoed to any client.
    SentStatus,
    /// Resynchronization request, always at the head of the queue.
    Sync,
}

/// One request against a device that awaits exactly one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    payload: Payload,
    reply_len: usize,
    source: Source,
    status: TxStatus,
    transmitted: bool,
}

impl Transaction {
    /// A new transaction issued by a client or by the daemon.
    pub fn new(payload: Payload, reply_len: usize, source: Source) -> Self {
        Transaction {
            payload,
            reply_len,
            source,
            status: TxStatus::New,
            transmitted: false,
        }
    }

    /// A status poll issued by the daemon itself.
    pub fn status_poll(payload: Payload, reply_len: usize) -> Self {
        Transaction {
            status: TxStatus::Status,
            ..Transaction::new(payload, reply_len, Source::Internal)
        }
    }

    /// A resynchronization request: [`SYNC_LEN`] zero bytes that expect as many bytes back.
    pub fn sync(source: Source) -> Self {
        Transaction {
            status: TxStatus::Sync,
            ..Transaction::new(Payload::Binary(vec![0; SYNC_LEN]), SYNC_LEN, source)
        }
    }

    /// What is written to the device.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Number of bytes the reply is expected to have.
    pub fn reply_len(&self) -> usize {
        self.reply_len
    }

    /// Who receives the reply.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Current lifecycle state.
    pub fn status(&self) -> TxStatus {
        self.status
    }

    /// Is the transaction on the device, awaiting its reply?
    pub fn is_in_flight(&self) -> bool {
        match self.status {
            TxStatus::Sent | TxStatus::SentStatus => true,
            TxStatus::Sync => self.transmitted,
            TxStatus::New | TxStatus::Status => false,
        }
    }
}

/// Ordered list of pending transactions for one channel.
///
/// The queue is strictly first in, first out, with the exception of [`TxStatus::Sync`]
/// transactions which are always put in front of the current head.
#[derive(Debug, Default)]
pub struct CommandQueue {
    txs: VecDeque<Transaction>,
}

impl CommandQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transaction. Sync transactions pre-empt the queue.
    pub fn push(&mut self, tx: Transaction) {
        if tx.status == TxStatus::Sync {
            self.txs.push_front(tx);
        } else {
            self.txs.push_back(tx);
        }
    }

    /// The transaction at the head of the queue.
    pub fn head(&self) -> Option<&Transaction> {
        self.txs.front()
    }

    /// The transaction right after the head.
    pub fn second(&self) -> Option<&Transaction> {
        self.txs.get(1)
    }

    /// Remove and return the head of the queue.
    pub fn pop_head(&mut self) -> Option<Transaction> {
        self.txs.pop_front()
    }

    /// Advance the head for transmission, if it may be transmitted now.
    ///
    /// A new head becomes [`TxStatus::Sent`], a status poll becomes [`TxStatus::SentStatus`],
    /// and a sync is marked as transmitted. If the head is already in flight, nothing may be
    /// transmitted and `None` is returned, such that there is never more than one transaction on
    /// the device.
    pub fn next_to_transmit(&mut self) -> Option<&Transaction> {
        let head = self.txs.front_mut()?;
        if head.is_in_flight() {
            return None;
        }
        match head.status {
            TxStatus::New => head.status = TxStatus::Sent,
            TxStatus::Status => head.status = TxStatus::SentStatus,
            TxStatus::Sync => head.transmitted = true,
            TxStatus::Sent | TxStatus::SentStatus => unreachable!("in-flight heads return early"),
        }
        Some(head)
    }

    /// Drop all transactions.
    pub fn clear(&mut self) {
        self.txs.clear();
    }

    /// Number of queued transactions.
    pub fn len(&self) -> usize {
        self.txs.len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Iterate over all transactions, head first.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.txs.iter()
    }
}
