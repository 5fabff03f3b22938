//! Data types used in the protocol.

use core::fmt::Write as _;
use std::io::{self, Read, Write};

use snafu::Snafu;

/// Error reading an uint7+ value from a byte stream
#[derive(Debug, Snafu)]
pub enum ReadError {
    /// Stream ended before uint7+ byte #{byte}
    Truncated { byte: u8 },
    /// Failed to read uint7+ byte #{byte}
    Io { byte: u8, source: io::Error },
}

/// uint7+: An unsigned integer type which can be up to 29 bits long.
///
/// In its encoded form,
/// the high bit of each of the first three bytes indicates
/// whether another byte follows it.
/// The fourth byte, if present, is taken in full.
/// As such, the type can contain 7, 14, 21, or 29 bits of data.
///
/// Unlike most other integers in the OPB format,
/// this one is encoded in Little Endian.
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Uint7Plus(u32);

impl core::fmt::Display for Uint7Plus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Integer too large for uint7+ (29 bits maximum)
#[derive(Debug, Default, Copy, Clone, Eq, Hash, PartialEq, Snafu)]
pub struct InvalidUint7PlusError;

impl From<u16> for Uint7Plus {
    fn from(value: u16) -> Self {
        Self(value as u32)
    }
}

impl From<u8> for Uint7Plus {
    fn from(value: u8) -> Self {
        Self(value as u32)
    }
}

impl TryFrom<u32> for Uint7Plus {
    type Error = InvalidUint7PlusError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > Self::MAX.0 {
            Err(InvalidUint7PlusError)
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<usize> for Uint7Plus {
    type Error = InvalidUint7PlusError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map_err(|_| InvalidUint7PlusError)
            .and_then(Self::try_from)
    }
}

impl Uint7Plus {
    pub const MAX: Self = Self(0x1FFF_FFFF);
    pub const ZERO: Self = Self(0);

    pub fn to_u32(self) -> u32 {
        self.0
    }

    /// Read a uint7+ from a byte stream,
    /// consuming between 1 and 4 bytes.
    pub fn read_from(mut from: impl Read) -> Result<Self, ReadError> {
        let mut value = 0;
        for byte in 0..4u8 {
            let mut buf = [0u8];
            from.read_exact(&mut buf).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    ReadError::Truncated { byte }
                } else {
                    ReadError::Io { byte, source: e }
                }
            })?;
            let b = buf[0] as u32;

            if byte == 3 {
                // the last byte has no continuation flag
                value |= b << 21;
                break;
            }

            value |= (b & 0x7F) << (7 * byte);
            if b & 0x80 == 0 {
                break;
            }
        }
        Ok(Self(value))
    }

    /// Write the integer to a mutable slice,
    /// returning the number of bytes written.
    ///
    /// If the slice is too short to contain the integer,
    /// the result may be trimmed.
    pub fn write_to_slice(self, to: &mut [u8]) -> u8 {
        let len = self.byte_length();
        let mut value = self.0;
        let mut k = 0;
        for byte in to.iter_mut().take(len as usize) {
            k += 1;
            if k == 4 {
                *byte = value as u8;
                break;
            }
            *byte = (value & 0x7F) as u8;
            value >>= 7;
            if k < len {
                *byte |= 0x80;
            }
        }
        k
    }

    pub fn write_to(self, mut to: impl Write) -> io::Result<u8> {
        let mut buf = [0u8; 4];
        let k = self.write_to_slice(&mut buf);
        to.write_all(&buf[..k as usize])?;
        Ok(k)
    }

    /// Get the number of bytes needed to encode this integer.
    pub fn byte_length(self) -> u8 {
        if self.0 < (1 << 7) {
            1
        } else if self.0 < (1 << 14) {
            2
        } else if self.0 < (1 << 21) {
            3
        } else {
            4
        }
    }
}

/// Fill `buf` as far as the stream allows,
/// returning how many bytes were read.
/// Fewer bytes than requested means the stream has ended.
pub(crate) fn read_up_to(mut from: impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match from.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Data block capacity (16 bytes) exceeded
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Snafu)]
pub struct DataBlockFullError;

/// A small inline payload attached to an OPB-specific command.
///
/// Payloads never exceed [`DataBlock::CAPACITY`] bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataBlock {
    len: u8,
    bytes: [u8; DataBlock::CAPACITY],
}

impl DataBlock {
    pub const CAPACITY: usize = 16;

    pub fn push(&mut self, value: u8) -> Result<(), DataBlockFullError> {
        let slot = self
            .bytes
            .get_mut(self.len as usize)
            .ok_or(DataBlockFullError)?;
        *slot = value;
        self.len += 1;
        Ok(())
    }

    /// Append the encoded form of a uint7+
    pub fn push_uint7(&mut self, value: Uint7Plus) -> Result<(), DataBlockFullError> {
        let mut buf = [0u8; 4];
        let k = value.write_to_slice(&mut buf);
        buf[..k as usize].iter().try_for_each(|&b| self.push(b))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Display an array of bytes as ASCII text
pub(crate) struct Ascii<T>(pub T);

impl<T> core::fmt::Debug for Ascii<T>
where
    T: AsRef<[u8]>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_char('"')?;
        core::fmt::Display::fmt(self, f)?;
        f.write_char('"')?;
        Ok(())
    }
}

impl<T> core::fmt::Display for Ascii<T>
where
    T: AsRef<[u8]>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &byte in self.0.as_ref() {
            if byte.is_ascii_graphic() {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02X}", byte)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DataBlock, ReadError, Uint7Plus};

    fn read(bytes: &[u8]) -> (Result<Uint7Plus, ReadError>, usize) {
        let mut cursor = std::io::Cursor::new(bytes);
        let out = Uint7Plus::read_from(&mut cursor);
        (out, cursor.position() as usize)
    }

    #[test]
    fn can_read_uint7plus() {
        let (v, pos) = read(&[0]);
        assert_eq!(v.unwrap(), Uint7Plus(0));
        assert_eq!(pos, 1);

        let (v, pos) = read(&[0x7F, 0x80, 0x81, 0x82, 0x83]);
        assert_eq!(v.unwrap(), Uint7Plus(0x7F));
        assert_eq!(pos, 1);

        let (v, pos) = read(&[0xa5, 0x5a, 0x33, 0x44, 0x55]);
        assert_eq!(v.unwrap(), Uint7Plus(0x2d25));
        assert_eq!(pos, 2);

        let (v, pos) = read(&[0x80, 0x80, 0x7F, 0x55, 0x55]);
        assert_eq!(v.unwrap(), Uint7Plus(0x1f_c000));
        assert_eq!(pos, 3);

        let (v, pos) = read(&[0x80, 0x80, 0x80, 0x01]);
        assert_eq!(v.unwrap(), Uint7Plus(0x20_0000));
        assert_eq!(pos, 4);

        // never reads past the fourth byte
        let (v, pos) = read(&[0xFF, 0xFF, 0xFF, 0xFF, 0x05]);
        assert_eq!(v.unwrap(), Uint7Plus(0x1FFF_FFFF));
        assert_eq!(pos, 4);
    }

    #[test]
    fn truncated_uint7plus_names_the_missing_byte() {
        assert!(matches!(read(&[]).0, Err(ReadError::Truncated { byte: 0 })));
        assert!(matches!(read(&[0xFF]).0, Err(ReadError::Truncated { byte: 1 })));
        assert!(matches!(
            read(&[0x80, 0x80, 0x81]).0,
            Err(ReadError::Truncated { byte: 3 })
        ));
    }

    #[test]
    fn can_write_uint7plus() {
        let buf = &mut [0x55; 5];
        assert_eq!(Uint7Plus(0).write_to_slice(buf), 1);
        assert_eq!(buf, &[0x00, 0x55, 0x55, 0x55, 0x55]);

        let buf = &mut [0x55; 5];
        assert_eq!(Uint7Plus(0x7F).write_to_slice(buf), 1);
        assert_eq!(buf, &[0x7f, 0x55, 0x55, 0x55, 0x55]);

        let buf = &mut [0x55; 5];
        assert_eq!(Uint7Plus(0x1f_c000).write_to_slice(buf), 3);
        assert_eq!(buf, &[0x80, 0x80, 0x7F, 0x55, 0x55]);

        let buf = &mut [0x55; 5];
        assert_eq!(Uint7Plus(0x20_0000).write_to_slice(buf), 4);
        assert_eq!(buf, &[0x80, 0x80, 0x80, 0x01, 0x55]);

        let buf = &mut [0x55; 5];
        assert_eq!(Uint7Plus(0x1FFF_FFFF).write_to_slice(buf), 4);
        assert_eq!(buf, &[0xFF, 0xFF, 0xFF, 0xFF, 0x55]);
    }

    #[test]
    fn byte_length_boundaries() {
        for (value, len) in [
            (127, 1),
            (128, 2),
            (16383, 2),
            (16384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
        ] {
            let v = Uint7Plus::try_from(value as u32).unwrap();
            assert_eq!(v.byte_length(), len, "byte length of {value}");
            let mut out = Vec::new();
            assert_eq!(v.write_to(&mut out).unwrap(), len);
            assert_eq!(read(&out).0.unwrap(), v);
        }
    }

    #[test]
    fn rejects_values_over_29_bits() {
        assert!(Uint7Plus::try_from(0x2000_0000u32).is_err());
        assert_eq!(Uint7Plus::try_from(0x1FFF_FFFFu32), Ok(Uint7Plus::MAX));
    }

    #[test]
    fn data_block_is_capped() {
        let mut block = DataBlock::default();
        for i in 0..DataBlock::CAPACITY {
            block.push(i as u8).unwrap();
        }
        assert!(block.push(0xFF).is_err());
        assert_eq!(block.len(), DataBlock::CAPACITY);
        assert_eq!(block.as_bytes()[15], 15);

        let mut block = DataBlock::default();
        block.push_uint7(Uint7Plus(0x80)).unwrap();
        assert_eq!(block.as_bytes(), &[0x80, 0x01]);
    }
}
