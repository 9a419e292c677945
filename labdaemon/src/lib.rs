//! LabDaemon: The command/reply pipeline behind our instrument daemons
//!
//! Our instrument daemons sit between text command clients on the lab network and hardware that
//! is only reachable through a narrow, half-duplex channel: a serial line or a GPIB controller
//! that is shared by several devices. This library provides the pieces every daemon needs to talk
//! to such a channel:
//!
//! - [`Command`]: Parse a text command line into name, positional and keyword arguments, and
//!   compose it back to text.
//! - [`frame`]: Encode and decode fixed-layout binary frames with a Modbus CRC-16 trailer.
//! - [`CommandQueue`] and [`Channel`]: An ordered queue of device transactions with at most one
//!   transaction in flight, idle status polling, and checksum/timeout/sync recovery.
//! - [`StatusRegistry`]: The last known device state, shared between the client side and the
//!   hardware side of a daemon.
//! - [`Link`]: The device side of the daemon. Implementations are provided for TCP/IP, serial
//!   ports (feature `serial`), and a [`LoopbackLink`] for testing.
//!
//! The surrounding daemon framework owns sockets, line framing, and timers. It calls into the
//! types provided here whenever a client line arrives, a device reply arrives, or the refresh
//! timer fires, and it delivers the returned [`Reply`] values to the clients.
//!
//! # License
//!
//! Licensed under either of
//!
//! - Apache License, Version 2.0 ([LICENSE-APACHE](http://www.apache.org/licenses/LICENSE-2.0))
//! - MIT license ([LICENSE-MIT](http://opensource.org/licenses/MIT))
//!
//! at your option.

#![warn(missing_docs)]

mod channel;
mod command;
pub mod frame;
mod loopback;
mod queue;
#[cfg(feature = "serial")]
mod serial;
mod status;
mod tcp_ip;

pub use channel::{Channel, ChannelConfig, DeviceProtocol, Outcome, Reply, ReplyBody, ReplyEvent};
pub use command::{Command, sanitize_command_line, split_subcommands};
pub use loopback::LoopbackLink;
pub use queue::{CommandQueue, Payload, SYNC_LEN, Source, Transaction, TxStatus};
#[cfg(feature = "serial")]
pub use serial::SerialLink;
pub use status::{StatusRegistry, UNKNOWN};
pub use tcp_ip::TcpLink;

use thiserror::Error;

/// The error enum for all daemons.
///
/// Every fallible operation of the daemon pipeline returns this error, such that errors can be
/// propagated with the `?` operator. Conditions that the pipeline recovers from by itself, i.e.,
/// checksum failures, timeouts, and disconnects, are not errors but are reported as an
/// [`Outcome`] of the reply handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DaemonError {
    /// A client command could not be parsed. The message names the expected format and is
    /// intended to be sent back to the client as is.
    #[error("{0}")]
    CommandSyntax(String),
    /// The command is not known to this daemon.
    #[error("command {0} not implemented")]
    NotImplemented(String),
    /// The frame name must be exactly four ASCII characters.
    #[error("Invalid command code '{0}', expected exactly four ASCII characters")]
    InvalidCommandCode(String),
    /// A given integer value does not fit into the field it should be encoded in.
    #[error("Integer value {value} is out of range. Allowed range is [{min}, {max}]")]
    IntValueOutOfRange {
        /// The value that is out of range.
        value: i64,
        /// The minimum value that is allowed.
        min: i64,
        /// The maximum value that is allowed.
        max: i64,
    },
    /// Fields can only be between 1 and 8 bytes wide.
    #[error("Field width of {width} bytes is not supported, allowed are 1 to 8 bytes")]
    FieldWidth {
        /// The requested width in bytes.
        width: usize,
    },
    /// Error when an invalid argument is passed to a function.
    #[error("{0}")]
    InvalidArgument(String),
    /// The checksum of a frame received from the device does not match its content.
    #[error("Checksum of the received frame is invalid")]
    ChecksumInvalid,
    /// The hardware is not connected, so no transaction can be queued.
    #[error("Hardware is not connected")]
    NotConnected,
    /// Error when reading from/writing to a link. See [`std::io::Error`] for more details.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serial")]
    /// Serial port errors can occur when opening a serial link. See the [`serialport::Error`]
    /// documentation for more information.
    #[error(transparent)]
    Serialport(#[from] serialport::Error),
}

/// The `Link` trait is the device side of a daemon.
///
/// Reading from the device is done by the surrounding framework, which hands complete replies to
/// the daemon. The daemon in turn only needs to write to the link and to tell the framework how
/// many bytes the next binary reply has, or to drop whatever was partially received.
pub trait Link {
    /// Write raw bytes to the device and flush them.
    fn write_raw(&mut self, data: &[u8]) -> Result<(), DaemonError>;

    /// Send a text command to the device.
    ///
    /// The terminator is appended to the command before it is written with `write_raw`.
    ///
    /// # Arguments
    /// * `cmd` - A string slice that will be sent to the device.
    fn sendcmd(&mut self, cmd: &str) -> Result<(), DaemonError> {
        let data = format!("{}{}", cmd, self.get_terminator());
        self.write_raw(data.as_bytes())
    }

    /// Get the terminator of text commands, by default `"\n"`.
    fn get_terminator(&self) -> &str {
        "\n"
    }

    /// Set the terminator of text commands.
    ///
    /// # Arguments:
    /// - `_terminator` - A string slice that will be used as the terminator for commands
    fn set_terminator(&mut self, _terminator: &str) {}

    /// Set the number of bytes the next binary reply is expected to have.
    fn set_binary_length(&mut self, _nbytes: usize) {}

    /// Discard all bytes that were received but not yet handed to the daemon.
    fn clear_buffer(&mut self) {}
}
