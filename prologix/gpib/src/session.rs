//! Text commands of one client connection to the GPIB daemon.

use labdaemon::{Command, DaemonError, Link, sanitize_command_line};
use tracing::{info, warn};

use crate::bus::{BusReply, GpibBus};

/// Highest primary address an instrument can have on the bus.
pub const MAX_ADDR: u8 = 30;

/// The interpreter for text commands of one client connection.
///
/// A session that selected an instrument address with `set_addr` forwards all lines it does not
/// know itself to that instrument. Lines are not split at `;`, since instruments use it to chain
/// their own commands.
#[derive(Debug, Clone)]
pub struct GpibSession {
    name: String,
    addr: Option<u8>,
}

impl GpibSession {
    /// Create a new session without an address.
    pub fn new(name: &str) -> Self {
        GpibSession {
            name: name.to_string(),
            addr: None,
        }
    }

    /// Name of the client.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instrument address of this session, if one was selected.
    pub fn addr(&self) -> Option<u8> {
        self.addr
    }

    /// Should the given reply from the bus be delivered to this session?
    pub fn accepts(&self, reply: &BusReply) -> bool {
        self.addr == Some(reply.addr)
    }

    /// Process a line received from the client.
    ///
    /// The returned messages are immediate replies to this client. Replies of instruments arrive
    /// later through [`GpibBus::on_message`].
    pub fn process_message<L: Link>(&mut self, line: &str, bus: &mut GpibBus<L>) -> Vec<String> {
        let line = sanitize_command_line(line).trim();
        if line.is_empty() {
            return Vec::new();
        }
        match self.process_line(line, bus) {
            Ok(reply) => reply.into_iter().collect(),
            Err(err) => {
                warn!(client = %self.name, line, %err, "command rejected");
                vec![err.to_string()]
            }
        }
    }

    fn process_line<L: Link>(
        &mut self,
        line: &str,
        bus: &mut GpibBus<L>,
    ) -> Result<Option<String>, DaemonError> {
        let cmd = match Command::parse(line) {
            Ok(cmd) => cmd,
            Err(_) if self.addr.is_some() => {
                self.send_command(line, bus)?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let name = cmd.name().map(str::to_lowercase);

        match name.as_deref() {
            Some("get_status") => Ok(Some(bus.status().status_line())),
            Some("set_addr") => {
                self.addr = match cmd.args().first() {
                    Some(arg) => Some(parse_addr(arg)?),
                    None => None,
                };
                info!(client = %self.name, addr = ?self.addr, "address set");
                Ok(None)
            }
            Some("send") => {
                self.send_command(&cmd.body(), bus)?;
                Ok(None)
            }
            _ if self.addr.is_some() => {
                self.send_command(line, bus)?;
                Ok(None)
            }
            _ => Err(DaemonError::NotImplemented(line.to_string())),
        }
    }

    /// Forward text to the instrument of this session, or to the controller itself.
    ///
    /// For an addressed session, `?$cmd` queues `cmd` and requests the reply of the instrument.
    fn send_command<L: Link>(&self, text: &str, bus: &mut GpibBus<L>) -> Result<(), DaemonError> {
        let Some(addr) = self.addr else {
            return bus.send_direct(text);
        };
        let parts: Vec<&str> = text.split('$').collect();
        match parts.as_slice() {
            [cmd] => bus.submit(addr, cmd, false),
            [prefix, cmd] => bus.submit(addr, cmd, *prefix == "?"),
            _ => Err(DaemonError::CommandSyntax(format!(
                "unable to parse command, expected \"cmd\" or \"?$cmd\" instead of: {text}"
            ))),
        }
    }
}

fn parse_addr(arg: &str) -> Result<u8, DaemonError> {
    match arg.parse::<u8>() {
        Ok(addr) if (1..=MAX_ADDR).contains(&addr) => Ok(addr),
        _ => Err(DaemonError::InvalidArgument(format!(
            "invalid GPIB address '{arg}', expected 1 to {MAX_ADDR}"
        ))),
    }
}
