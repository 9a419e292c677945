//! The state machine that drives a [`CommandQueue`] against one device link.

use std::fmt::Display;

use tracing::{debug, info, warn};

use crate::{
    DaemonError, Link, StatusRegistry,
    frame::{CODE_LEN, contains_error_marker, verify_checksum},
    queue::{CommandQueue, Source, Transaction, TxStatus},
};

/// Device specific behavior of a [`Channel`].
pub trait DeviceProtocol {
    /// Transactions that are queued whenever the channel is idle, to keep the registry current.
    fn status_polls(&self) -> Vec<Transaction>;

    /// Decode a reply with a valid checksum to the given transaction.
    ///
    /// Decoded values are written to the registry. The returned text is sent to the client that
    /// issued the transaction. Return `None` if the reply is not known, in which case the raw
    /// reply is passed on instead.
    fn decode_reply(
        &self,
        tx: &Transaction,
        reply: &[u8],
        status: &StatusRegistry,
    ) -> Option<String>;
}

/// Configuration of a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Queue the device's status polls when idle.
    pub status_polling: bool,
    /// Log the queue on every tick and all traffic. Disables status polling.
    pub debug: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            status_polling: true,
            debug: false,
        }
    }
}

/// Body of a reply to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// A text line.
    Text(String),
    /// Raw bytes as received from the device.
    Binary(Vec<u8>),
}

impl Display for ReplyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyBody::Text(s) => write!(f, "{s}"),
            ReplyBody::Binary(b) => write!(f, "{}", b.escape_ascii()),
        }
    }
}

/// A reply that the framework has to deliver to the named client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Name of the client connection.
    pub to: String,
    /// What to send.
    pub body: ReplyBody,
}

impl Reply {
    fn text(to: &Source, text: impl Into<String>) -> Option<Self> {
        match to {
            Source::Client(name) => Some(Reply {
                to: name.clone(),
                body: ReplyBody::Text(text.into()),
            }),
            Source::Internal => None,
        }
    }
}

/// How a reply from the device was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The reply was decoded against the head transaction.
    Decoded,
    /// The reply was not known and passed on raw.
    Passthrough,
    /// The checksum did not match. The head was dropped and a sync was queued.
    ChecksumFailed,
    /// The device reported that it could not execute the command.
    DeviceError,
    /// A pending sync completed.
    Synced,
    /// No transaction was awaiting a reply.
    Unsolicited,
}

/// Result of handing a device reply to a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEvent {
    /// How the reply was handled.
    pub outcome: Outcome,
    /// Reply to deliver to a client, if any.
    pub reply: Option<Reply>,
}

/// One physical device channel with its queue of transactions.
///
/// The channel guarantees that at most one transaction is on the device at any time. The
/// framework drives it by calling [`Channel::on_tick`] periodically and [`Channel::on_binary`]
/// whenever a complete reply of the announced length arrived.
#[derive(Debug)]
pub struct Channel<L: Link, D: DeviceProtocol> {
    link: L,
    device: D,
    queue: CommandQueue,
    status: StatusRegistry,
    config: ChannelConfig,
}

impl<L: Link, D: DeviceProtocol> Channel<L, D> {
    /// Create a new channel that is not yet connected.
    ///
    /// # Arguments
    /// * `link` - The device side link.
    /// * `device` - Device specific polling and decoding.
    /// * `status` - Registry the decoded values are written to, shared with the client side.
    /// * `config` - Channel configuration.
    pub fn new(link: L, device: D, status: StatusRegistry, config: ChannelConfig) -> Self {
        Channel {
            link,
            device,
            queue: CommandQueue::new(),
            status,
            config,
        }
    }

    /// Queue a transaction.
    ///
    /// Returns [`DaemonError::NotConnected`] if the hardware is not connected.
    pub fn submit(&mut self, tx: Transaction) -> Result<(), DaemonError> {
        if !self.status.is_connected() {
            return Err(DaemonError::NotConnected);
        }
        if self.config.debug {
            debug!(payload = %tx.payload(), nbytes = tx.reply_len(), source = %tx.source(), "queue");
        }
        self.queue.push(tx);
        Ok(())
    }

    /// Periodic tick: transmit the head of the queue, or queue status polls if idle.
    pub fn on_tick(&mut self) -> Result<(), DaemonError> {
        if !self.status.is_connected() {
            return Ok(());
        }
        if self.config.debug {
            for tx in self.queue.iter() {
                debug!(payload = %tx.payload(), nbytes = tx.reply_len(), source = %tx.source(), status = ?tx.status(), "queued");
            }
        }

        if self.queue.is_empty() {
            if self.config.status_polling && !self.config.debug {
                for tx in self.device.status_polls() {
                    self.queue.push(tx);
                }
            }
            return Ok(());
        }

        if let Some(tx) = self.queue.next_to_transmit() {
            if self.config.debug {
                debug!(payload = %tx.payload(), nbytes = tx.reply_len(), "transmit");
            }
            self.link.set_binary_length(tx.reply_len().max(CODE_LEN));
            self.link.write_raw(tx.payload().as_bytes())?;
        }
        Ok(())
    }

    /// Handle a complete reply from the device.
    pub fn on_binary(&mut self, reply: &[u8]) -> ReplyEvent {
        if self.config.debug {
            debug!(reply = %reply.escape_ascii(), "received");
        }
        let Some(head) = self.queue.head() else {
            warn!(reply = %reply.escape_ascii(), "reply received while no command was pending");
            return ReplyEvent {
                outcome: Outcome::Unsolicited,
                reply: None,
            };
        };

        if !head.is_in_flight() {
            warn!(reply = %reply.escape_ascii(), "reply received before the head was transmitted");
            return ReplyEvent {
                outcome: Outcome::Unsolicited,
                reply: None,
            };
        }
        if head.status() == TxStatus::Sync {
            return self.finish_sync();
        }

        if let Some(marker) = contains_error_marker(reply) {
            self.link.clear_buffer();
            return match self.queue.pop_head() {
                Some(tx) => {
                    let code = tx.payload().code().unwrap_or("?").to_string();
                    warn!(command = %code, marker, "command produced an error");
                    ReplyEvent {
                        outcome: Outcome::DeviceError,
                        reply: Reply::text(tx.source(), format!("error {code} {marker}")),
                    }
                }
                None => unreachable!("the head was checked above"),
            };
        }

        if reply.len() > CODE_LEN && !verify_checksum(reply) {
            return self.checksum_failed();
        }

        let Some(tx) = self.queue.pop_head() else {
            unreachable!("the head was checked above");
        };
        let (outcome, body) = match self.device.decode_reply(&tx, reply, &self.status) {
            Some(text) => (Outcome::Decoded, ReplyBody::Text(text)),
            None => (Outcome::Passthrough, ReplyBody::Binary(reply.to_vec())),
        };
        let reply = match (tx.status(), tx.source()) {
            (TxStatus::SentStatus, _) | (_, Source::Internal) => None,
            (_, Source::Client(name)) => Some(Reply {
                to: name.clone(),
                body,
            }),
        };
        ReplyEvent { outcome, reply }
    }

    /// The reply to the head did not pass the checksum test.
    ///
    /// The receive buffer is flushed, the head is dropped, and a sync is queued.
    fn checksum_failed(&mut self) -> ReplyEvent {
        self.link.clear_buffer();
        let Some(failed) = self.queue.pop_head() else {
            unreachable!("only called with a pending head");
        };
        warn!(payload = %failed.payload(), "checksum failed, resynchronizing");
        let reply = Reply::text(failed.source(), "checksum failed");
        self.queue.push(Transaction::sync(failed.source().clone()));
        ReplyEvent {
            outcome: Outcome::ChecksumFailed,
            reply,
        }
    }

    /// A reply arrived while a transmitted sync is at the head.
    ///
    /// If the transaction behind the sync was in flight, it is presumed lost and dropped too.
    fn finish_sync(&mut self) -> ReplyEvent {
        let Some(sync) = self.queue.pop_head() else {
            unreachable!("only called with a pending sync");
        };
        if self.queue.head().is_some_and(Transaction::is_in_flight) {
            if let Some(lost) = self.queue.pop_head() {
                warn!(payload = %lost.payload(), "command lost, dropped after sync");
            }
        }
        info!("sync completed");
        ReplyEvent {
            outcome: Outcome::Synced,
            reply: Reply::text(sync.source(), "sync"),
        }
    }

    /// The framework signaled that no reply arrived in time.
    ///
    /// Partially received bytes are flushed and the head is dropped and returned.
    pub fn on_timeout(&mut self) -> Option<Transaction> {
        self.link.clear_buffer();
        let dropped = self.queue.pop_head();
        if let Some(tx) = &dropped {
            warn!(payload = %tx.payload(), "command timeout, removed from queue");
        }
        dropped
    }

    /// The link to the hardware was established.
    pub fn on_connect(&mut self) {
        self.queue.clear();
        self.status.set_connected(true);
        info!("hardware connected");
    }

    /// The link to the hardware was lost: the queue is cleared and all fields become unknown.
    pub fn on_disconnect(&mut self) {
        self.queue.clear();
        self.status.reset();
        info!("hardware disconnected");
    }

    /// The queue of pending transactions.
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// The status registry of the device.
    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    /// The device side link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable access to the device side link.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// The device specific protocol.
    pub fn device(&self) -> &D {
        &self.device
    }
}
