//! This module provides a link to a device controlled via a serial port.
//!
//! It includes a blocking implementation of the [`Link`] trait using the `serialport` crate.

use serialport::{ClearBuffer, SerialPort, SerialPortBuilder};
use tracing::warn;

use crate::{DaemonError, Link};

/// A blocking serial port link using the `serialport` crate.
#[derive(Debug)]
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    terminator: String,
    binary_length: usize,
}

impl SerialLink {
    /// Try to open a new `SerialLink`.
    ///
    /// The terminator is by default set to `"\n"`, but can be changed using the `set_terminator`
    /// function.
    ///
    /// # Arguments
    /// * `spb` - A `SerialPortBuilder` to configure the serial port. See
    ///   [`serialport::SerialPortBuilder`] and the [`serialport::new`] function for more details.
    pub fn try_new(spb: SerialPortBuilder) -> Result<Self, DaemonError> {
        Ok(SerialLink {
            port: spb.open()?,
            terminator: "\n".to_string(),
            binary_length: 0,
        })
    }

    /// Read a binary reply of the length set with [`Link::set_binary_length`].
    ///
    /// Returns an I/O error of kind `TimedOut` if the reply does not arrive within the timeout of
    /// the serial port.
    pub fn read_reply(&mut self) -> Result<Vec<u8>, DaemonError> {
        let mut buf = vec![0u8; self.binary_length];
        self.port.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Link for SerialLink {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), DaemonError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn get_terminator(&self) -> &str {
        &self.terminator
    }

    fn set_terminator(&mut self, terminator: &str) {
        self.terminator = terminator.to_string();
    }

    fn set_binary_length(&mut self, nbytes: usize) {
        self.binary_length = nbytes;
    }

    fn clear_buffer(&mut self) {
        if let Err(err) = self.port.clear(ClearBuffer::Input) {
            warn!(%err, "could not clear serial input buffer");
        }
    }
}
