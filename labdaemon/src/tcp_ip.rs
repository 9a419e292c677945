//! This module provides a link to a device or controller that is reachable via TCP/IP.
//!
//! It includes a blocking implementation of the [`Link`] trait using the
//! [`std::net::TcpStream`] struct, e.g., for a Prologix GPIB-ETHERNET controller.

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::{DaemonError, Link};

/// A blocking TCP/IP link using the [`std::net::TcpStream`] struct.
#[derive(Debug)]
pub struct TcpLink {
    reader: BufReader<TcpStream>,
    terminator: String,
    binary_length: usize,
}

impl TcpLink {
    /// Try to connect a new `TcpLink`.
    ///
    /// The terminator is by default set to `"\n"`, but can be changed using the `set_terminator`
    /// function. Read and write timeouts are set to three seconds, such that a silent device never
    /// blocks forever.
    ///
    /// # Arguments
    /// * `sock_addr` - Socket address.
    pub fn try_new<A: ToSocketAddrs>(sock_addr: A) -> Result<Self, DaemonError> {
        let stream = TcpStream::connect(sock_addr)?;
        let timeout = Duration::from_secs(3);
        stream.set_write_timeout(Some(timeout))?;
        stream.set_read_timeout(Some(timeout))?;
        Ok(TcpLink {
            reader: BufReader::new(stream),
            terminator: "\n".to_string(),
            binary_length: 0,
        })
    }

    /// Read one line from the device, with the terminator stripped.
    pub fn read_line(&mut self) -> Result<String, DaemonError> {
        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read a binary reply of the length set with [`Link::set_binary_length`].
    pub fn read_reply(&mut self) -> Result<Vec<u8>, DaemonError> {
        let mut buf = vec![0u8; self.binary_length];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl Link for TcpLink {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), DaemonError> {
        let stream = self.reader.get_mut();
        stream.write_all(data)?;
        stream.flush()?;
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
        let pending = self.reader.buffer().len();
        self.reader.consume(pending);
    }
}
