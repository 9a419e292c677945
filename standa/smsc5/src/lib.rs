//! A daemon protocol for the Standa 8SMC5-USB stepper motor controller.
//!
//! The controller speaks a binary protocol over a USB serial port: every command starts with a
//! four character command code, followed by little-endian parameters, reserved bytes, and a
//! Modbus CRC-16. Only one command can be processed at a time. This crate provides:
//!
//! - [`Smsc5Device`]: Status polling and reply decoding for a [`labdaemon::Channel`].
//! - [`Smsc5Session`]: The interpreter for text commands of one client connection.
//! - [`Smsc5SerialLink`]: The serial port configuration of the controller.
//!
//! # Client commands
//!
//! Several commands can be sent on one line, separated by `;`. Commands are not case sensitive.
//!
//! - `get_status`: Reply with all known fields, e.g., `status hw_connected=1 position=500 ...`.
//! - `timeout`: Drop the command that currently awaits its reply.
//! - `sync`: Resynchronize the controller.
//! - `get_device_info`, `get_move_pars`, `get_position`, `set_zero`.
//! - `set_move_pars speed uspeed accel decel anti_play_speed uanti_play_speed`
//! - `move pos upos` and `move_in_direction dpos udpos`.
//! - `nb<xxxx`: Send the command code `xxxx` and expect `nb` bytes back.
//! - `xxxx n:value n:value ... [n:r]`: Send the command code `xxxx` with the given values, each
//!   `n` bytes wide, followed by `n` reserved bytes.
//!
//! Parameters of high-level commands are either all given in order, or all labelled, e.g.,
//! `move upos:0 pos:1000`.
//!
//! # Example
//!
//! ```no_run
//! use labdaemon::ChannelConfig;
//! use standa_smsc5::{Smsc5Device, Smsc5SerialLink, Smsc5Session};
//!
//! let link = Smsc5SerialLink::simple("/dev/ttyACM0").unwrap();
//! let mut channel = Smsc5Device::channel(link, ChannelConfig::default());
//! channel.on_connect();
//!
//! let session = Smsc5Session::new("client1");
//! let _replies = session.process_message("move 1000 0; get_status", &mut channel);
//! channel.on_tick().unwrap();
//! ```

#![deny(warnings, missing_docs)]

use labdaemon::{
    Channel, ChannelConfig, Command, DaemonError, DeviceProtocol, Link, Payload, Source,
    StatusRegistry, Transaction,
    frame::{FrameDecoder, encode},
    sanitize_command_line, split_subcommands,
};
use tracing::{info, warn};

pub use interface::Smsc5SerialLink;
pub use registry::{COMMANDS, CommandDef, ECHO_REPLY_LEN, Param};

mod interface;
mod registry;

/// Fields of the status registry of the 8SMC5-USB, in the order they are reported.
pub const STATUS_FIELDS: [&str; 9] = [
    "position",
    "uposition",
    "encposition",
    "speed",
    "uspeed",
    "accel",
    "decel",
    "anti_play_speed",
    "uanti_play_speed",
];

/// Status polls that are queued whenever the controller is idle: `(command code, reply length)`.
const STATUS_POLLS: [(&str, usize); 2] = [("gpos", 26), ("gmov", 30)];

/// Status polling and reply decoding of the 8SMC5-USB.
#[derive(Debug, Clone, Copy, Default)]
pub struct Smsc5Device;

impl Smsc5Device {
    /// Create a new status registry with all fields of the 8SMC5-USB.
    pub fn status_registry() -> StatusRegistry {
        StatusRegistry::new(&STATUS_FIELDS)
    }

    /// Create a new channel to the 8SMC5-USB with a fresh status registry.
    ///
    /// # Arguments
    /// * `link` - The link to the controller, e.g., from [`Smsc5SerialLink::simple`].
    /// * `config` - The channel configuration.
    pub fn channel<L: Link>(link: L, config: ChannelConfig) -> Channel<L, Self> {
        Channel::new(link, Smsc5Device, Self::status_registry(), config)
    }
}

impl DeviceProtocol for Smsc5Device {
    fn status_polls(&self) -> Vec<Transaction> {
        STATUS_POLLS
            .iter()
            .map(|&(code, nb)| Transaction::status_poll(Payload::Text(code.to_string()), nb))
            .collect()
    }

    fn decode_reply(
        &self,
        tx: &Transaction,
        reply: &[u8],
        status: &StatusRegistry,
    ) -> Option<String> {
        let code = tx.payload().code()?;
        let mut dec = FrameDecoder::new(reply);
        if !dec.expect_code(code) {
            return None;
        }

        match code {
            "gsti" => {
                let fields = dec.decode(&registry::GSTI_REPLY)?;
                Some(format!("{} {}", fields[0].1, fields[1].1))
            }
            "gmov" | "gpos" => {
                let spec = if code == "gmov" {
                    registry::GMOV_REPLY.as_slice()
                } else {
                    registry::GPOS_REPLY.as_slice()
                };
                let fields = dec.decode(spec)?;
                status.update(fields.iter().map(|(name, value)| (*name, value.clone())));
                let text = fields
                    .iter()
                    .map(|(name, value)| format!("{name}:{value}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(text)
            }
            _ => None,
        }
    }
}

/// The interpreter for text commands of one client connection.
#[derive(Debug, Clone)]
pub struct Smsc5Session {
    name: String,
}

impl Smsc5Session {
    /// Create a new session for the client with the given name.
    ///
    /// Replies of the controller to commands of this session are addressed to this name.
    pub fn new(name: &str) -> Self {
        Smsc5Session {
            name: name.to_string(),
        }
    }

    /// Name of the client.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> Source {
        Source::Client(self.name.clone())
    }

    /// Process a line received from the client.
    ///
    /// Commands for the controller are queued on the channel, their replies are delivered later
    /// through [`Channel::on_binary`]. The returned messages are immediate replies to this client,
    /// e.g., the status line or notices about commands that could not be processed.
    pub fn process_message<L: Link>(
        &self,
        line: &str,
        channel: &mut Channel<L, Smsc5Device>,
    ) -> Vec<String> {
        let mut replies = Vec::new();
        for sub in split_subcommands(sanitize_command_line(line)) {
            let sub = sub.to_lowercase();
            match self.process_subcommand(&sub, channel) {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => {}
                Err(err) => {
                    warn!(client = %self.name, command = %sub, %err, "command rejected");
                    replies.push(err.to_string());
                }
            }
        }
        replies
    }

    fn process_subcommand<L: Link>(
        &self,
        sub: &str,
        channel: &mut Channel<L, Smsc5Device>,
    ) -> Result<Option<String>, DaemonError> {
        match sub {
            "get_status" => return Ok(Some(channel.status().status_line())),
            "timeout" => {
                channel.on_timeout();
                return Ok(None);
            }
            _ => {}
        }
        if !channel.status().is_connected() {
            return Ok(None);
        }
        if sub == "sync" {
            channel.submit(Transaction::sync(self.source()))?;
            return Ok(None);
        }

        if sub.contains('<') {
            let tx = self.raw_query(sub)?;
            info!(client = %self.name, command = %sub, "raw query");
            channel.submit(tx)?;
            return Ok(None);
        }

        let cmd = Command::parse(sub)?;
        let tokens = cmd.tokens();
        let Some(name) = tokens.first() else {
            return Ok(None);
        };

        let tx = if let Some(def) = registry::lookup(name) {
            self.high_level(def, &tokens[1..])?
        } else if is_generic_setter(tokens) {
            self.generic_setter(name, &tokens[1..])?
        } else {
            return Err(DaemonError::NotImplemented(sub.to_string()));
        };
        info!(client = %self.name, command = %sub, "command queued");
        channel.submit(tx)?;
        Ok(None)
    }

    /// `nb<xxxx`: Send a command code and expect `nb` bytes back.
    fn raw_query(&self, sub: &str) -> Result<Transaction, DaemonError> {
        let syntax = || {
            DaemonError::CommandSyntax(format!(
                "unable to parse command, format should be \"nb<xxxx\" instead of: {sub}"
            ))
        };
        let (nb, code) = sub.split_once('<').ok_or_else(syntax)?;
        if code.len() != 4 || code.contains('<') {
            return Err(syntax());
        }
        let nb: usize = nb.trim().parse().map_err(|_| syntax())?;
        Ok(Transaction::new(
            Payload::Text(code.to_string()),
            nb,
            self.source(),
        ))
    }

    /// A command from the registry, with positional or labelled parameters.
    fn high_level(&self, def: &CommandDef, params: &[String]) -> Result<Transaction, DaemonError> {
        if !def.has_params() {
            if !params.is_empty() {
                return Err(DaemonError::CommandSyntax(format!(
                    "unable to parse command, {} takes no parameters",
                    def.name
                )));
            }
            return Ok(Transaction::new(
                Payload::Text(def.code.to_string()),
                def.reply_len,
                self.source(),
            ));
        }

        let values = parse_params(def, params)?;
        let fields: Vec<(usize, i64)> = def
            .params
            .iter()
            .map(|p| p.width)
            .zip(values)
            .collect();
        let frame = encode(def.code, &fields, def.reserved)?;
        Ok(Transaction::new(
            Payload::Binary(frame),
            def.reply_len,
            self.source(),
        ))
    }

    /// `xxxx n:value ... [n:r]`: Build a frame from explicitly sized values.
    fn generic_setter(&self, code: &str, params: &[String]) -> Result<Transaction, DaemonError> {
        let syntax = || {
            DaemonError::CommandSyntax(format!(
                "unable to parse command, format should be \"xxxx nbytes:value ... [nbytes:r]\" instead of: {code} {}",
                params.join(" ")
            ))
        };

        let mut fields = Vec::with_capacity(params.len());
        let mut reserved = 0;
        for (i, token) in params.iter().enumerate() {
            let (width, value) = token.split_once(':').ok_or_else(syntax)?;
            let width: usize = width.parse().map_err(|_| syntax())?;
            if value == "r" {
                if i + 1 != params.len() || i == 0 {
                    return Err(syntax());
                }
                reserved = width;
            } else {
                let value: i64 = value.parse().map_err(|_| syntax())?;
                fields.push((width, value));
            }
        }

        let frame = encode(code, &fields, reserved)?;
        Ok(Transaction::new(
            Payload::Binary(frame),
            ECHO_REPLY_LEN,
            self.source(),
        ))
    }
}

/// Is this a generic setter of the form `xxxx n:value ...`?
fn is_generic_setter(tokens: &[String]) -> bool {
    tokens.len() > 1
        && tokens[1..].iter().all(|token| {
            token
                .split_once(':')
                .is_some_and(|(n, _)| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
}

/// Parse the parameters of a high-level command into values in frame order.
///
/// Parameters are either all positional, or all labelled as `name:value` or `name=value`.
fn parse_params(def: &CommandDef, params: &[String]) -> Result<Vec<i64>, DaemonError> {
    let syntax = || {
        let labelled: Vec<String> = def.params.iter().map(|p| format!("{}:<value>", p.name)).collect();
        DaemonError::CommandSyntax(format!(
            "unable to parse command, format should be \"{}\" or \"{} {}\"",
            def.usage(),
            def.name,
            labelled.join(" ")
        ))
    };

    if params.len() != def.params.len() {
        return Err(syntax());
    }

    let is_labelled = |s: &String| s.contains([':', '=']);
    let raw: Vec<&str> = if params.iter().all(is_labelled) {
        let mut labelled = Vec::with_capacity(params.len());
        for p in def.params {
            let value = params
                .iter()
                .filter_map(|s| s.split_once([':', '=']))
                .find(|(key, _)| *key == p.name)
                .map(|(_, value)| value)
                .ok_or_else(syntax)?;
            labelled.push(value);
        }
        labelled
    } else if params.iter().any(is_labelled) {
        return Err(syntax());
    } else {
        params.iter().map(String::as_str).collect()
    };

    raw.into_iter()
        .map(|value| {
            value.parse::<i64>().map_err(|_| {
                DaemonError::InvalidArgument(format!("invalid value '{value}' for {}", def.name))
            })
        })
        .collect()
}
