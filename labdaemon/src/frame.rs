//! Encode and decode the fixed-layout binary frames of serial devices.
//!
//! A frame consists of a four character ASCII command code, a number of little-endian
//! two's-complement integer fields, an optional number of reserved filler bytes, and a two byte
//! little-endian Modbus CRC-16 checksum. The checksum covers everything after the command code,
//! i.e., the fields and the reserved bytes.
//!
//! ```text
//! | code (4) | field | field | ... | reserved | crc (2) |
//!            |<----------- checksummed ------>|
//! ```

use crc::{CRC_16_MODBUS, Crc};

use crate::DaemonError;

/// Length of the command code at the start of every frame.
pub const CODE_LEN: usize = 4;

/// Length of the checksum trailer.
pub const CRC_LEN: usize = 2;

/// Filler byte used for reserved bytes.
pub const RESERVED_FILLER: u8 = 0xCC;

/// Markers a device puts into its reply when it could not execute a command.
pub const ERROR_MARKERS: [&[u8]; 3] = [b"errc", b"errd", b"errv"];

const MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Calculate the Modbus CRC-16 of the given bytes.
///
/// Reflected polynomial `0xA001`, initial value `0xFFFF`, no final XOR. The result is transmitted
/// little-endian.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    MODBUS.checksum(data)
}

/// Check the checksum trailer of a frame.
///
/// The Modbus CRC over the checksummed part of a frame including its little-endian trailer is
/// zero if the frame is intact. Frames that are too short to carry a checksum are not valid.
pub fn verify_checksum(frame: &[u8]) -> bool {
    frame.len() >= CODE_LEN + CRC_LEN && crc16_modbus(&frame[CODE_LEN..]) == 0
}

/// Return the first device error marker that occurs anywhere in the given bytes.
pub fn contains_error_marker(data: &[u8]) -> Option<&'static str> {
    ERROR_MARKERS
        .into_iter()
        .find(|marker| data.windows(marker.len()).any(|w| w == *marker))
        .map(|marker| std::str::from_utf8(marker).unwrap_or("err"))
}

/// Validate a command code and return it as bytes.
fn code_bytes(code: &str) -> Result<&[u8], DaemonError> {
    if code.len() != CODE_LEN || !code.is_ascii() {
        return Err(DaemonError::InvalidCommandCode(code.to_string()));
    }
    Ok(code.as_bytes())
}

/// Pack a value little-endian and two's-complement into exactly `width` bytes.
fn pack_field(width: usize, value: i64) -> Result<Vec<u8>, DaemonError> {
    if !(1..=8).contains(&width) {
        return Err(DaemonError::FieldWidth { width });
    }
    let bits = 8 * width as u32;
    let (min, max) = if bits == 64 {
        (i64::MIN, i64::MAX)
    } else {
        (-(1_i64 << (bits - 1)), (1_i64 << (bits - 1)) - 1)
    };
    if value < min || value > max {
        return Err(DaemonError::IntValueOutOfRange { value, min, max });
    }
    Ok(value.to_le_bytes()[..width].to_vec())
}

/// Encode a frame.
///
/// # Arguments
/// * `code` - Four character ASCII command code.
/// * `fields` - Fields as `(width_bytes, value)` pairs, in order.
/// * `reserved` - Number of reserved filler bytes appended after the fields.
///
/// Returns an [`DaemonError::IntValueOutOfRange`] error if a value does not fit into its field.
///
/// # Example
///
/// ```
/// use labdaemon::frame::encode;
///
/// let frame = encode("move", &[(4, 1000), (2, 0)], 0).unwrap();
/// assert_eq!(
///     frame,
///     [b'm', b'o', b'v', b'e', 0xE8, 0x03, 0x00, 0x00, 0x00, 0x00, 0x53, 0x33]
/// );
/// ```
pub fn encode(code: &str, fields: &[(usize, i64)], reserved: usize) -> Result<Vec<u8>, DaemonError> {
    let mut frame = code_bytes(code)?.to_vec();
    for &(width, value) in fields {
        frame.extend(pack_field(width, value)?);
    }
    frame.extend(std::iter::repeat_n(RESERVED_FILLER, reserved));
    let crc = crc16_modbus(&frame[CODE_LEN..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// How the bytes of a field in a reply are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Little-endian two's-complement integer, rendered as decimal string.
    Signed,
    /// Little-endian unsigned integer, rendered as decimal string.
    Unsigned,
    /// ASCII text with trailing NUL bytes stripped.
    Text,
}

/// Layout of one field of a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Width of the field in bytes.
    pub width: usize,
    /// Name of the field.
    pub name: &'static str,
    /// How to interpret the field.
    pub kind: FieldKind,
}

impl FieldSpec {
    /// Create a new field layout.
    pub const fn new(width: usize, name: &'static str, kind: FieldKind) -> Self {
        FieldSpec { width, name, kind }
    }
}

/// Sequential decoder for a reply frame.
///
/// The decoder keeps a cursor into the reply and consumes the fields one after another in the
/// order they are requested.
#[derive(Debug)]
pub struct FrameDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameDecoder<'a> {
    /// Create a new decoder with the cursor at the start of the given reply.
    pub fn new(data: &'a [u8]) -> Self {
        FrameDecoder { data, pos: 0 }
    }

    /// Consume the command code at the cursor if it equals `code`.
    ///
    /// Returns `false` and leaves the cursor untouched if the code does not match.
    pub fn expect_code(&mut self, code: &str) -> bool {
        match self.data.get(self.pos..self.pos + CODE_LEN) {
            Some(bytes) if bytes == code.as_bytes() => {
                self.pos += CODE_LEN;
                true
            }
            _ => false,
        }
    }

    /// Bytes that are not yet consumed.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Take the next `width` bytes, or `None` if the reply is too short.
    fn take(&mut self, width: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + width)?;
        self.pos += width;
        Some(bytes)
    }

    /// Decode the next field according to its layout.
    pub fn field(&mut self, spec: &FieldSpec) -> Option<String> {
        if spec.kind != FieldKind::Text && !(1..=8).contains(&spec.width) {
            return None;
        }
        let bytes = self.take(spec.width)?;
        let value = match spec.kind {
            FieldKind::Unsigned => {
                let mut buf = [0u8; 8];
                buf[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buf).to_string()
            }
            FieldKind::Signed => {
                let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
                let mut buf = if negative { [0xFF; 8] } else { [0u8; 8] };
                buf[..bytes.len()].copy_from_slice(bytes);
                i64::from_le_bytes(buf).to_string()
            }
            FieldKind::Text => {
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
        };
        Some(value)
    }

    /// Decode all given fields in order.
    ///
    /// Returns `None` if the reply is too short for the given fields, in which case the caller
    /// should fall back to passing the raw reply on.
    pub fn decode(&mut self, specs: &[FieldSpec]) -> Option<Vec<(&'static str, String)>> {
        specs
            .iter()
            .map(|spec| self.field(spec).map(|value| (spec.name, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_field_ranges() {
        assert_eq!(pack_field(1, -128).unwrap(), vec![0x80]);
        assert_eq!(pack_field(1, 127).unwrap(), vec![0x7F]);
        assert!(pack_field(1, 128).is_err());
        assert_eq!(pack_field(2, -1).unwrap(), vec![0xFF, 0xFF]);
        assert_eq!(pack_field(8, i64::MIN).unwrap(), i64::MIN.to_le_bytes().to_vec());
    }

    #[test]
    fn test_pack_field_width() {
        assert!(matches!(
            pack_field(0, 1),
            Err(DaemonError::FieldWidth { width: 0 })
        ));
        assert!(matches!(
            pack_field(9, 1),
            Err(DaemonError::FieldWidth { width: 9 })
        ));
    }

    #[test]
    fn test_code_bytes() {
        assert!(code_bytes("gpos").is_ok());
        assert!(code_bytes("gpo").is_err());
        assert!(code_bytes("gposs").is_err());
        assert!(code_bytes("gpoä").is_err());
    }
}
