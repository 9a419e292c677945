//! Provide a serial link for the 8SMC5-USB.

use std::time::Duration;

use labdaemon::{DaemonError, SerialLink};

/// A SerialLink for the 8SMC5-USB.
///
/// Builds a LabDaemon SerialLink with the correct parity, stop bits, and data bits for
/// communication with the 8SMC5-USB.
#[derive(Debug)]
pub struct Smsc5SerialLink {}

impl Smsc5SerialLink {
    /// Try to open a serial link with the configuration of the 8SMC5-USB.
    ///
    /// The controller communicates with 115200 baud, eight data bits, no parity, and two stop
    /// bits. The timeout is set to 400 ms.
    ///
    /// Arguments:
    /// * `port` - The name of the serial port, e.g., `"/dev/ttyACM0"` or `"COM3"`.
    pub fn simple(port: &str) -> Result<SerialLink, DaemonError> {
        let timeout = Duration::from_millis(400);
        let port = serialport::new(port, 115_200)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::Two);
        SerialLink::try_new(port)
    }
}
