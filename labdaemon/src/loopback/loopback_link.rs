//! Loopback link for daemons that write frames or text commands to a device.
//!
//! Replies are not read through the link but handed to the daemon by the framework, so the
//! loopback only has to check what is written and keep track of what the daemon tells the link.

use crate::{DaemonError, Link, loopback::IncrIndex};

/// A link that allows you to simply write tests for your daemon protocol.
///
/// The main purpose of this link is to check everything a daemon writes to the device. To do so,
/// you provide a list of byte vectors that are expected to go from the host to the device, in
/// order. Whenever something is written that is not expected, the [`LoopbackLink`] panics. When
/// the [`LoopbackLink`] is dropped, a `finalize` function is called that checks that all writes
/// you provided have been used. If not, the program panics as well.
///
/// Furthermore, the link records the last binary reply length the daemon announced and how often
/// the daemon asked to discard the receive buffer.
///
/// # Example
///
/// ```
/// use labdaemon::{Link, LoopbackLink};
///
/// let mut link = LoopbackLink::new(vec![b"++auto 0\n".to_vec()]);
/// link.sendcmd("++auto 0").unwrap();
/// link.set_binary_length(26);
/// assert_eq!(link.binary_length(), Some(26));
/// ```
#[derive(Debug)]
pub struct LoopbackLink {
    from_host: Vec<Vec<u8>>,
    from_host_index: IncrIndex,
    terminator: String,
    binary_length: Option<usize>,
    clear_count: usize,
}

impl LoopbackLink {
    /// Create a new loopback link with the given writes that are expected from the host.
    ///
    /// # Arguments:
    /// * `from_host` - Vector of vectors for the bytes that are expected from host to device.
    pub fn new(from_host: Vec<Vec<u8>>) -> Self {
        LoopbackLink {
            from_host,
            from_host_index: IncrIndex::default(),
            terminator: "\n".to_string(),
            binary_length: None,
            clear_count: 0,
        }
    }

    /// Append another write that is expected from the host after all the ones given so far.
    pub fn expect(&mut self, data: &[u8]) {
        self.from_host.push(data.to_vec());
    }

    /// Append another text command, including the current terminator, to the expected writes.
    pub fn expect_cmd(&mut self, cmd: &str) {
        let data = format!("{cmd}{}", self.terminator);
        self.from_host.push(data.into_bytes());
    }

    /// The last binary reply length that was announced to the link, if any.
    pub fn binary_length(&self) -> Option<usize> {
        self.binary_length
    }

    /// How often the receive buffer was asked to be cleared.
    pub fn clear_count(&self) -> usize {
        self.clear_count
    }

    /// This command panics if not all writes in the [`LoopbackLink`] have been used.
    ///
    /// It is automatically called when the [`LoopbackLink`] is dropped, but you can also call it
    /// manually to ensure that all writes have been used.
    pub fn finalize(&mut self) {
        let from_host_leftover = self.from_host.get(self.from_host_index.index);
        if let Some(fil) = from_host_leftover {
            panic!("Leftover expected writes found from host to device: {fil:?}");
        }
    }

    /// Get the next expected bytes from host to device, or panic.
    fn get_next_from_host(&mut self) -> &Vec<u8> {
        self.from_host
            .get(self.from_host_index.next())
            .expect("No more bytes were expected from host to device.")
    }
}

impl Link for LoopbackLink {
    fn write_raw(&mut self, data: &[u8]) -> Result<(), DaemonError> {
        let exp = self.get_next_from_host().as_slice();
        assert_eq!(
            exp,
            data,
            "Expected write '{0:?}', got '{1:?}'",
            String::from_utf8_lossy(exp),
            String::from_utf8_lossy(data)
        );
        Ok(())
    }

    fn get_terminator(&self) -> &str {
        self.terminator.as_str()
    }

    fn set_terminator(&mut self, terminator: &str) {
        self.terminator = terminator.to_string();
    }

    fn set_binary_length(&mut self, nbytes: usize) {
        self.binary_length = Some(nbytes);
    }

    fn clear_buffer(&mut self) {
        self.clear_count += 1;
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.finalize();
        }
    }
}
