//! Arbitration of one Prologix controller between several GPIB addresses.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    ops::Bound,
    time::{Duration, Instant},
};

use labdaemon::{
    CommandQueue, DaemonError, Link, Payload, Source, StatusRegistry, Transaction,
};
use tracing::{debug, info, warn};

/// Name of the status field that holds the address the controller is switched to.
pub const CURRENT_ADDR: &str = "current_addr";

/// Primitive that makes the controller read from the addressed instrument until EOI.
pub const READ_EOI: &str = "++read eoi";

/// Primitive that queries the address of the controller.
pub const ADDR_QUERY: &str = "++addr";

/// Primitive that queries the service request line.
pub const SRQ: &str = "++srq";

/// Configuration of a [`GpibBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Time to wait for the reply to a read primitive before it is issued again.
    pub busy_timeout: Duration,
    /// Idle time after which the controller is queried to check that the link is alive.
    pub keepalive_interval: Duration,
    /// Log the busy flag and the queues on every tick.
    pub debug: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            busy_timeout: Duration::from_secs(3),
            keepalive_interval: Duration::from_secs(1),
            debug: false,
        }
    }
}

/// A line from the controller that has to be delivered to all sessions with the given address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusReply {
    /// GPIB address of the instrument that replied.
    pub addr: u8,
    /// The reply, without line terminator.
    pub text: String,
}

/// Does the controller answer this primitive, such that nothing else may be sent meanwhile?
fn is_busy_primitive(cmd: &str) -> bool {
    cmd.starts_with("++read") || cmd == ADDR_QUERY || cmd == SRQ
}

/// The shared GPIB bus behind one Prologix controller.
///
/// Every GPIB address has its own queue of commands. On every tick, at most one command is sent
/// to the controller. Addresses are serviced in round-robin order, starting after the address
/// that was serviced last, such that no instrument can starve the others. Before a command is
/// sent, the controller is switched to its address if required.
///
/// The controller is half-duplex: after a primitive that produces a reply (see
/// [`GpibBus::on_message`]), the bus is busy until the reply arrives. If it does not arrive
/// within the busy timeout, the read primitive is issued again.
#[derive(Debug)]
pub struct GpibBus<L: Link> {
    link: L,
    queues: BTreeMap<u8, CommandQueue>,
    active: BTreeSet<u8>,
    next_addr: Option<u8>,
    current_addr: Option<u8>,
    busy: bool,
    busy_since: Option<Instant>,
    last_activity: Option<Instant>,
    internal: VecDeque<String>,
    held: VecDeque<String>,
    status: StatusRegistry,
    config: BusConfig,
}

impl<L: Link> GpibBus<L> {
    /// Create a new bus that is not yet connected.
    ///
    /// # Arguments
    /// * `link` - The link to the controller, e.g., a [`labdaemon::TcpLink`].
    /// * `config` - The bus configuration.
    pub fn new(link: L, config: BusConfig) -> Self {
        let status = StatusRegistry::new(&[CURRENT_ADDR]);
        status.set(CURRENT_ADDR, "-1");
        GpibBus {
            link,
            queues: BTreeMap::new(),
            active: BTreeSet::new(),
            next_addr: None,
            current_addr: None,
            busy: false,
            busy_since: None,
            last_activity: None,
            internal: VecDeque::new(),
            held: VecDeque::new(),
            status,
            config,
        }
    }

    /// The link to the controller was established.
    ///
    /// The address of the controller is unknown at this point. Automatic read after write is
    /// switched off, reads are requested explicitly with [`READ_EOI`].
    pub fn on_connect(&mut self, now: Instant) -> Result<(), DaemonError> {
        self.status.set_connected(true);
        self.set_current_addr(None);
        self.busy = false;
        self.last_activity = Some(now);
        info!("controller connected");
        self.link.sendcmd("++auto 0")
    }

    /// The link to the controller was lost: all queued commands are dropped.
    pub fn on_disconnect(&mut self) {
        self.status.set_connected(false);
        self.set_current_addr(None);
        self.queues.clear();
        self.internal.clear();
        self.held.clear();
        self.next_addr = None;
        self.busy = false;
        info!("controller disconnected");
    }

    /// Queue a command for the instrument at `addr`.
    ///
    /// If `keep` is set, the reply of the instrument is requested by queueing [`READ_EOI`] after
    /// the command, unless the command is [`SRQ`], which the controller answers itself.
    pub fn submit(&mut self, addr: u8, cmd: &str, keep: bool) -> Result<(), DaemonError> {
        if !self.status.is_connected() {
            return Err(DaemonError::NotConnected);
        }
        let queue = self.queues.entry(addr).or_default();
        queue.push(addr_tx(addr, cmd));
        if keep && cmd != SRQ {
            queue.push(addr_tx(addr, READ_EOI));
        }
        if self.config.debug {
            debug!(addr, cmd, keep, "queue");
        }
        Ok(())
    }

    /// Send a line to the controller, bypassing the address queues.
    ///
    /// The line is written right away if the bus is idle. While the bus waits for a reply, the
    /// line is held back and written on the first tick after the reply arrived.
    pub fn send_direct(&mut self, cmd: &str) -> Result<(), DaemonError> {
        if !self.status.is_connected() {
            return Err(DaemonError::NotConnected);
        }
        if self.busy {
            if self.config.debug {
                debug!(cmd, "bus busy, holding direct line");
            }
            self.held.push_back(cmd.to_string());
            return Ok(());
        }
        self.link.sendcmd(cmd)
    }

    /// Periodic tick: send at most one queued command, or check that the controller is alive.
    ///
    /// # Arguments
    /// * `now` - The current time.
    /// * `live_addrs` - Addresses of all currently connected client sessions.
    pub fn on_tick(
        &mut self,
        now: Instant,
        live_addrs: impl IntoIterator<Item = u8>,
    ) -> Result<(), DaemonError> {
        if !self.status.is_connected() {
            return Ok(());
        }
        if self.config.debug {
            debug!(busy = self.busy, "tick");
            for (addr, queue) in &self.queues {
                for tx in queue.iter() {
                    debug!(addr, cmd = %tx.payload(), "queued");
                }
            }
        }

        if self.busy {
            let since = self.busy_since.unwrap_or(now);
            if now.duration_since(since) >= self.config.busy_timeout {
                warn!(addr = ?self.current_addr, "no reply from controller, reading again");
                self.link.sendcmd(READ_EOI)?;
                self.busy_since = Some(now);
            }
            return Ok(());
        }

        if let Some(cmd) = self.held.pop_front() {
            if is_busy_primitive(&cmd) {
                self.set_busy(now);
            }
            self.link.sendcmd(&cmd)?;
            self.last_activity = Some(now);
            return Ok(());
        }

        self.refresh_addresses(live_addrs);

        if let Some(addr) = self.next_pending_addr() {
            self.next_addr = Some(addr);
            if self.current_addr != Some(addr) {
                self.link.sendcmd(&format!("++addr {addr}"))?;
                self.set_current_addr(Some(addr));
            }
            let cmd = self
                .queues
                .get_mut(&addr)
                .and_then(CommandQueue::pop_head)
                .map(|tx| tx.payload().to_string());
            if let Some(cmd) = cmd {
                if is_busy_primitive(&cmd) {
                    self.set_busy(now);
                }
                self.link.sendcmd(&cmd)?;
                self.last_activity = Some(now);
            }
            self.drop_stale_queues();
            return Ok(());
        }

        let idle = self
            .last_activity
            .is_none_or(|t| now.duration_since(t) > self.config.keepalive_interval);
        if idle {
            if self.config.debug {
                debug!("nothing to do, querying controller address to keep the link alive");
            }
            self.link.sendcmd(ADDR_QUERY)?;
            self.internal.push_back(ADDR_QUERY.to_string());
            self.set_busy(now);
        }
        Ok(())
    }

    /// Handle a line received from the controller.
    ///
    /// Replies to primitives the bus issued itself are absorbed. Every other line is attributed
    /// to the instrument the controller is currently switched to.
    pub fn on_message(&mut self, line: &str, now: Instant) -> Option<BusReply> {
        let line = line.trim_end_matches(['\r', '\n']);
        if self.config.debug {
            debug!(line, "received");
        }
        self.busy = false;
        self.last_activity = Some(now);

        if self.internal.front().is_some_and(|cmd| cmd == ADDR_QUERY) {
            self.internal.pop_front();
            return None;
        }
        match self.current_addr {
            Some(addr) => Some(BusReply {
                addr,
                text: line.to_string(),
            }),
            None => {
                warn!(line, "reply received while no address was selected");
                None
            }
        }
    }

    /// Is the bus waiting for a reply from the controller?
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// The address the controller is switched to, if known.
    pub fn current_addr(&self) -> Option<u8> {
        self.current_addr
    }

    /// Number of direct lines held back until the bus is idle.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    /// Number of commands queued for the given address.
    pub fn pending(&self, addr: u8) -> usize {
        self.queues.get(&addr).map_or(0, CommandQueue::len)
    }

    /// Addresses that currently have a queue, including stale ones that are still draining.
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.queues.keys().copied()
    }

    /// The status registry of the bus.
    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    /// The link to the controller.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable access to the link to the controller.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn set_busy(&mut self, now: Instant) {
        self.busy = true;
        self.busy_since = Some(now);
        self.last_activity = Some(now);
    }

    fn set_current_addr(&mut self, addr: Option<u8>) {
        self.current_addr = addr;
        let value = addr.map_or_else(|| "-1".to_string(), |a| a.to_string());
        self.status.set(CURRENT_ADDR, value);
    }

    /// Take over the addresses of the live sessions. New addresses get an empty queue.
    fn refresh_addresses(&mut self, live_addrs: impl IntoIterator<Item = u8>) {
        self.active = live_addrs.into_iter().collect();
        for &addr in &self.active {
            self.queues.entry(addr).or_default();
        }
        self.drop_stale_queues();
    }

    /// Remove queues of addresses without a live session once they are drained.
    fn drop_stale_queues(&mut self) {
        let active = &self.active;
        self.queues
            .retain(|addr, queue| active.contains(addr) || !queue.is_empty());
    }

    /// The first address after the last serviced one that has a queued command, wrapping around.
    fn next_pending_addr(&self) -> Option<u8> {
        let pending = |(addr, queue): (&u8, &CommandQueue)| (!queue.is_empty()).then_some(*addr);
        match self.next_addr {
            Some(last) => self
                .queues
                .range((Bound::Excluded(last), Bound::Unbounded))
                .chain(self.queues.range(..=last))
                .find_map(pending),
            None => self.queues.iter().find_map(pending),
        }
    }
}

fn addr_tx(addr: u8, cmd: &str) -> Transaction {
    Transaction::new(
        Payload::Text(cmd.to_string()),
        0,
        Source::Client(addr.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_primitives() {
        assert!(is_busy_primitive("++read eoi"));
        assert!(is_busy_primitive("++read 10"));
        assert!(is_busy_primitive("++addr"));
        assert!(is_busy_primitive("++srq"));
        assert!(!is_busy_primitive("++addr 5"));
        assert!(!is_busy_primitive("*IDN?"));
    }
}
