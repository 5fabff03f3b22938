//! Implementation of the OPB container format:
//! file identifier, header, instrument table records
//! and the commands stored in each chunk.
//!
//! ```text
//! offset 0  : "OPBin1\0"
//! offset 7  : format (0 = default, 1 = raw)
//! offset 8  : u32 BE size in bytes        \
//! offset 12 : u32 BE instrument count      | default format only
//! offset 16 : u32 BE chunk count           |
//! offset 20 : instruments, 9 bytes each   /
//! then      : chunks
//! ```

use std::io::{self, Read, Write};

use snafu::{ResultExt, Snafu};

use crate::data_types::{Ascii, DataBlock, DataBlockFullError, InvalidUint7PlusError, Uint7Plus};
use crate::registers::{NUM_CHANNELS, OPB_NOTE_ON, OPB_PLAY_INSTRUMENT, OPB_SET_INSTRUMENT};

/// An error encoding or decoding OPB data
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Failed to open the file
    OpenFile { source: io::Error },
    /// Failed to create the file
    CreateFile { source: io::Error },
    /// Failed to read {context}
    ReadStream {
        context: &'static str,
        source: io::Error,
    },
    /// Failed to write OPB data
    WriteStream { source: io::Error },
    /// Invalid OPB file: header check failed (found {found})
    InvalidMagic { found: String },
    /// Unsupported OPB version {version}
    UnsupportedVersion { version: u8 },
    /// Invalid OPB file: header terminator is {value:#04x} instead of 0
    InvalidTerminator { value: u8 },
    /// Unknown OPB format {format}
    UnknownFormat { format: u8 },
    /// Truncated stream: unexpected end of data while reading {context}
    TruncatedStream { context: &'static str },
    /// Instrument {index} out of range ({count} instruments)
    InstrumentOutOfRange { index: u32, count: u32 },
    /// Channel {channel} out of range
    ChannelOutOfRange { channel: u8 },
    /// Two note writes in one range at {time_ms} ms on channel {channel} (commands {start}-{end})
    DuplicateNoteInRange {
        time_ms: i64,
        channel: u8,
        start: usize,
        end: usize,
    },
    /// Timing mismatch at {time_ms} ms on channel {channel} (commands {start}-{end})
    TimingMismatch {
        time_ms: i64,
        channel: u8,
        start: usize,
        end: usize,
    },
    /// Internal error: payload of command {address:#05x} does not match its register
    PayloadMismatch { address: u16 },
    /// Elapsed time of {elapsed_ms} ms does not fit in a raw OPB entry
    ElapsedTooLarge { elapsed_ms: u64 },
    /// Value of {context} too large to encode
    ValueTooLarge {
        context: &'static str,
        source: InvalidUint7PlusError,
    },
    /// Value of {context} does not fit in the OPB header
    HeaderFieldTooLarge {
        context: &'static str,
        source: core::num::TryFromIntError,
    },
    /// Internal error: OPB command payload too large
    DataBlockOverflow { source: DataBlockFullError },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// "OPBin1\0"
pub const MAGIC: [u8; 7] = *b"OPBin1\0";

/// Size of the default format header, up to the instrument table
pub const HEADER_SIZE: u32 = 20;

/// Size of each record in the instrument table
pub const INSTRUMENT_SIZE: u32 = 9;

/// Size of each record in the raw format
pub const RAW_ENTRY_SIZE: usize = 5;

/// Channel byte: the channel index
pub const CHANNEL_INDEX: u8 = 0b0001_1111;
/// Channel byte: modulator level follows
pub const CHANNEL_MOD_LEVEL: u8 = 0b0010_0000;
/// Channel byte: carrier level follows
pub const CHANNEL_CAR_LEVEL: u8 = 0b0100_0000;
/// Channel byte: write feedback/connection
pub const CHANNEL_FEED_CONN: u8 = 0b1000_0000;

/// Instrument mask: modulator characteristic
pub const MASK_MOD_CHARACTERISTIC: u8 = 0b0000_0001;
/// Instrument mask: modulator attack/decay
pub const MASK_MOD_ATTACK_DECAY: u8 = 0b0000_0010;
/// Instrument mask: modulator sustain/release
pub const MASK_MOD_SUSTAIN_RELEASE: u8 = 0b0000_0100;
/// Instrument mask: modulator wave select
pub const MASK_MOD_WAVE_SELECT: u8 = 0b0000_1000;
/// Instrument mask: carrier characteristic
pub const MASK_CAR_CHARACTERISTIC: u8 = 0b0001_0000;
/// Instrument mask: carrier attack/decay
pub const MASK_CAR_ATTACK_DECAY: u8 = 0b0010_0000;
/// Instrument mask: carrier sustain/release
pub const MASK_CAR_SUSTAIN_RELEASE: u8 = 0b0100_0000;
/// Instrument mask: carrier wave select
pub const MASK_CAR_WAVE_SELECT: u8 = 0b1000_0000;

/// Note byte of a note on command: modulator level follows
pub const NOTE_MOD_LEVEL: u8 = 0b0100_0000;
/// Note byte of a note on command: carrier level follows
pub const NOTE_CAR_LEVEL: u8 = 0b1000_0000;
/// Note byte of a note on command: the actual note register bits
pub const NOTE_DATA: u8 = 0b0011_1111;

/// Read exactly `N` bytes,
/// naming `context` if the stream ends prematurely.
pub(crate) fn read_array<const N: usize>(
    mut reader: impl Read,
    context: &'static str,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            TruncatedStreamSnafu { context }.fail()
        }
        Err(source) => Err(Error::ReadStream { context, source }),
    }
}

pub(crate) fn read_u8(reader: impl Read, context: &'static str) -> Result<u8> {
    let [byte] = read_array::<1>(reader, context)?;
    Ok(byte)
}

pub(crate) fn read_uint7(reader: impl Read, context: &'static str) -> Result<Uint7Plus> {
    use crate::data_types::ReadError;
    Uint7Plus::read_from(reader).map_err(|e| match e {
        ReadError::Truncated { .. } => Error::TruncatedStream { context },
        ReadError::Io { source, .. } => Error::ReadStream { context, source },
    })
}

pub(crate) fn write_all(mut writer: impl Write, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).context(WriteStreamSnafu)
}

/// The body layout of an OPB file
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Format {
    /// Chunked commands with an instrument table
    #[default]
    Default,
    /// Flat list of timestamped register writes
    Raw,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Default => "Default",
            Format::Raw => "Raw",
        }
    }
}

impl core::fmt::Display for Format {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Format> for u8 {
    fn from(format: Format) -> u8 {
        match format {
            Format::Default => 0,
            Format::Raw => 1,
        }
    }
}

impl TryFrom<u8> for Format {
    type Error = Error;

    fn try_from(format: u8) -> Result<Self> {
        match format {
            0 => Ok(Format::Default),
            1 => Ok(Format::Raw),
            format => UnknownFormatSnafu { format }.fail(),
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct FileId {
    /// "OPBin"
    pub code: [u8; 5],
    /// Version (starting at the character '1', not 0x1)
    pub version: u8,
    /// Must be 0x0
    pub zero: u8,
}

impl core::fmt::Debug for FileId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileId")
            .field("code", &Ascii(self.code))
            .field("version", &self.version)
            .field("zero", &self.zero)
            .finish()
    }
}

impl FileId {
    pub const V1: FileId = FileId {
        code: *b"OPBin",
        version: b'1',
        zero: 0,
    };

    /// Read and validate the file identifier.
    pub fn read_from(reader: impl Read) -> Result<Self> {
        let bytes: [u8; 7] = read_array(reader, "file identifier")?;
        let file_id = FileId {
            code: [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]],
            version: bytes[5],
            zero: bytes[6],
        };

        // check file ID portion to ensure it's an OPB file
        if file_id.code != Self::V1.code {
            return InvalidMagicSnafu {
                found: Ascii(&bytes).to_string(),
            }
            .fail();
        }

        // don't try any further if the version is not '1'
        if file_id.version != Self::V1.version {
            return UnsupportedVersionSnafu {
                version: file_id.version,
            }
            .fail();
        }

        if file_id.zero != 0 {
            return InvalidTerminatorSnafu {
                value: file_id.zero,
            }
            .fail();
        }

        Ok(file_id)
    }

    pub fn encoded(&self) -> [u8; 7] {
        let c = self.code;
        [c[0], c[1], c[2], c[3], c[4], self.version, self.zero]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Format (0 = standard, 1 = raw)
    pub format: Format,
    /// Size in bytes (0 in the raw format)
    pub size: u32,
    /// InstrumentCount (0 in the raw format)
    pub instrument_count: u32,
    /// ChunkCount (0 in the raw format)
    pub chunk_count: u32,
}

impl Header {
    /// Read the format selector and,
    /// for the default format, the three header counters.
    pub fn read_from(mut reader: impl Read) -> Result<Self> {
        let format = Format::try_from(read_u8(&mut reader, "format")?)?;
        if format == Format::Raw {
            return Ok(Header {
                format,
                size: 0,
                instrument_count: 0,
                chunk_count: 0,
            });
        }

        let bytes: [u8; 12] = read_array(reader, "header")?;
        Ok(Header {
            format,
            size: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            instrument_count: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            chunk_count: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }

    /// The three big endian header counters
    pub fn encoded_counters(&self) -> [u8; 12] {
        let mut out = [0; 12];
        out[0..4].copy_from_slice(&self.size.to_be_bytes());
        out[4..8].copy_from_slice(&self.instrument_count.to_be_bytes());
        out[8..12].copy_from_slice(&self.chunk_count.to_be_bytes());
        out
    }

    /// Offset of the first chunk relative to the start of the file
    pub fn chunk_data_offset(&self) -> u64 {
        match self.format {
            Format::Default => {
                HEADER_SIZE as u64 + INSTRUMENT_SIZE as u64 * self.instrument_count as u64
            }
            Format::Raw => MAGIC.len() as u64 + 1,
        }
    }
}

/// A fully defined instrument, as stored in the instrument table
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Instrument {
    /// Feedback/connection (base reg C0)
    pub feedback: u8,
    /// Modulator
    pub modulator: Operator,
    /// Carrier
    pub carrier: Operator,
}

impl Instrument {
    pub fn read_from(reader: impl Read) -> Result<Self> {
        let bytes: [u8; INSTRUMENT_SIZE as usize] = read_array(reader, "instrument")?;
        Ok(Instrument {
            feedback: bytes[0],
            modulator: Operator {
                characteristic: bytes[1],
                attack_decay: bytes[2],
                sustain_release: bytes[3],
                wave_select: bytes[4],
            },
            carrier: Operator {
                characteristic: bytes[5],
                attack_decay: bytes[6],
                sustain_release: bytes[7],
                wave_select: bytes[8],
            },
        })
    }

    pub fn encoded(&self) -> [u8; INSTRUMENT_SIZE as usize] {
        [
            self.feedback,
            self.modulator.characteristic,
            self.modulator.attack_decay,
            self.modulator.sustain_release,
            self.modulator.wave_select,
            self.carrier.characteristic,
            self.carrier.attack_decay,
            self.carrier.sustain_release,
            self.carrier.wave_select,
        ]
    }
}

/// Operator parameters of an instrument.
/// Register bases are given for the modulator;
/// the carrier's registers are 3 offsets above.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Operator {
    /// Characteristic (base reg 20) (Mult, KSR, EG, VIB and AM flags)
    pub characteristic: u8,
    /// Attack/decay level (base reg 60)
    pub attack_decay: u8,
    /// Sustain/release level (base reg 80)
    pub sustain_release: u8,
    /// Wave select (base reg E0)
    pub wave_select: u8,
}

/// The header of a chunk
/// (without the Lo and Hi OPL commands)
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHeader {
    /// Time elapsed since last chunk (in milliseconds)
    pub time_elapsed: Uint7Plus,
    /// OPL_CommandCountLo
    pub opl_command_count_lo: Uint7Plus,
    /// OPL_CommandCountHi
    pub opl_command_count_hi: Uint7Plus,
}

impl ChunkHeader {
    pub fn read_from(mut reader: impl Read) -> Result<Self> {
        Ok(ChunkHeader {
            time_elapsed: read_uint7(&mut reader, "uint7+ chunk elapsed time")?,
            opl_command_count_lo: read_uint7(&mut reader, "uint7+ chunk low command count")?,
            opl_command_count_hi: read_uint7(&mut reader, "uint7+ chunk high command count")?,
        })
    }

    pub fn write_to(&self, mut writer: impl Write) -> Result<()> {
        for value in [
            self.time_elapsed,
            self.opl_command_count_lo,
            self.opl_command_count_hi,
        ] {
            value.write_to(&mut writer).context(WriteStreamSnafu)?;
        }
        Ok(())
    }

    pub fn command_count(&self) -> u64 {
        self.opl_command_count_lo.to_u32() as u64 + self.opl_command_count_hi.to_u32() as u64
    }
}

/// A partial OPL command representation
/// which uses 8 bits to represent an OPL register.
///
/// Whether the 8 bits in `register`
/// refer to the channels in`0x0xx` or to the channels in `0x1xx`
/// is defined by the presence in the _Lo_ or _Hi_ command list.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Register
    pub register: u8,
    /// The data to write to the register
    pub data: u8,
}

/// Debug implementation overridden to
/// always write in hexadecimal and in a single line
impl core::fmt::Debug for RegisterWrite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "RegisterWrite {{ register: {:02X}, data: 0x{:02X} }}",
            self.register, self.data
        )
    }
}

/// Arguments shared by the set instrument and play instrument commands.
///
/// For each bit set in `mask`,
/// the instrument's corresponding property is written
/// to the appropriate register of the channel and operator
/// (modulator = operator 1, carrier = operator 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentChange {
    /// Instrument index
    pub instrument: Uint7Plus,
    /// Channel (0 to 17)
    pub channel: u8,
    /// Whether to write the instrument's feedback/connection
    pub feed_conn: bool,
    /// Which operator properties of the instrument to write
    /// (see the `MASK_*` constants)
    pub mask: u8,
    /// Modulator levels data (OPL register 0x40), if written
    pub mod_level: Option<u8>,
    /// Carrier levels data (OPL register 0x43), if written
    pub car_level: Option<u8>,
}

impl InstrumentChange {
    fn channel_byte(&self) -> u8 {
        let mut byte = self.channel & CHANNEL_INDEX;
        if self.mod_level.is_some() {
            byte |= CHANNEL_MOD_LEVEL;
        }
        if self.car_level.is_some() {
            byte |= CHANNEL_CAR_LEVEL;
        }
        if self.feed_conn {
            byte |= CHANNEL_FEED_CONN;
        }
        byte
    }
}

/// An extended set of the OPL command
/// which takes advantage of unused registers in the range `0xD0..=0xDF`
/// to specify additional commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpbCommand {
    /// A standard OPL command
    Opl(RegisterWrite),
    /// Set instrument (0xD0)
    SetInstrument(InstrumentChange),
    /// Play Instrument (0xD1):
    /// set instrument, then write frequency and note
    PlayInstrument {
        change: InstrumentChange,
        /// Frequency data to be written to OPL register 0xA0
        freq: u8,
        /// Note on/off data to be written to OPL register 0xB0
        note: u8,
    },
    /// Note on (0xD7 to 0xDF)
    ///
    /// This command combines the data for frequency (OPL register 0xA0)
    /// and note on (OPL register 0xB0).
    /// The top two bits of the note data,
    /// which are unused by the OPL chip,
    /// encode the presence of optional arguments
    /// for modulator volume and carrier volume.
    NoteOn {
        /// Channel (0 to 17)
        channel: u8,
        /// Frequency data to be written to OPL register 0xA0
        freq: u8,
        /// Note on/off data to be written to OPL register 0xB0
        /// (top two bits clear)
        note: u8,
        /// Modulator levels data (OPL register 0x40), if written
        mod_level: Option<u8>,
        /// Carrier levels data (OPL register 0x43), if written
        car_level: Option<u8>,
    },
}

impl From<RegisterWrite> for OpbCommand {
    fn from(command: RegisterWrite) -> Self {
        OpbCommand::Opl(command)
    }
}

impl OpbCommand {
    /// Read one command of a chunk.
    /// `high_bank` tells whether it belongs to the _Hi_ command list.
    pub fn read_from(mut reader: impl Read, high_bank: bool) -> Result<Self> {
        let register = read_u8(&mut reader, "command register")?;

        match register {
            OPB_SET_INSTRUMENT | OPB_PLAY_INSTRUMENT => {
                let instrument = read_uint7(&mut reader, "uint7+ instrument index")?;
                let [channel_byte, mask] = read_array(&mut reader, "instrument channel and mask")?;

                let channel = channel_byte & CHANNEL_INDEX;
                if channel as usize >= NUM_CHANNELS {
                    return ChannelOutOfRangeSnafu { channel }.fail();
                }

                let play = if register == OPB_PLAY_INSTRUMENT {
                    let [freq, note] = read_array(&mut reader, "instrument frequency and note")?;
                    Some((freq, note))
                } else {
                    None
                };

                // levels follow only if flagged in the channel byte
                let mod_level = if channel_byte & CHANNEL_MOD_LEVEL != 0 {
                    Some(read_u8(&mut reader, "instrument modulator level")?)
                } else {
                    None
                };
                let car_level = if channel_byte & CHANNEL_CAR_LEVEL != 0 {
                    Some(read_u8(&mut reader, "instrument carrier level")?)
                } else {
                    None
                };

                let change = InstrumentChange {
                    instrument,
                    channel,
                    feed_conn: channel_byte & CHANNEL_FEED_CONN != 0,
                    mask,
                    mod_level,
                    car_level,
                };

                Ok(match play {
                    Some((freq, note)) => OpbCommand::PlayInstrument { change, freq, note },
                    None => OpbCommand::SetInstrument(change),
                })
            }
            OPB_NOTE_ON..=0xDF => {
                let channel = register - OPB_NOTE_ON + if high_bank { 9 } else { 0 };
                let [freq, note] = read_array(&mut reader, "note on frequency and note")?;

                // levels follow only if flagged in the note byte
                let mod_level = if note & NOTE_MOD_LEVEL != 0 {
                    Some(read_u8(&mut reader, "note on modulator level")?)
                } else {
                    None
                };
                let car_level = if note & NOTE_CAR_LEVEL != 0 {
                    Some(read_u8(&mut reader, "note on carrier level")?)
                } else {
                    None
                };

                Ok(OpbCommand::NoteOn {
                    channel,
                    freq,
                    note: note & NOTE_DATA,
                    mod_level,
                    car_level,
                })
            }
            _ => {
                let data = read_u8(&mut reader, "command data")?;
                Ok(OpbCommand::Opl(RegisterWrite { register, data }))
            }
        }
    }

    /// The OPB register for this command (without the bank bit)
    pub fn register(&self) -> u8 {
        match self {
            OpbCommand::Opl(command) => command.register,
            OpbCommand::SetInstrument(_) => OPB_SET_INSTRUMENT,
            OpbCommand::PlayInstrument { .. } => OPB_PLAY_INSTRUMENT,
            OpbCommand::NoteOn { channel, .. } => OPB_NOTE_ON + channel % 9,
        }
    }

    /// Whether this command must be written to the _Hi_ command list
    /// when its bank is not otherwise known
    pub fn is_high_bank(&self) -> bool {
        match self {
            OpbCommand::Opl(_) => false,
            OpbCommand::SetInstrument(change) | OpbCommand::PlayInstrument { change, .. } => {
                change.channel >= 9
            }
            OpbCommand::NoteOn { channel, .. } => *channel >= 9,
        }
    }

    /// The bytes following the register byte
    pub fn payload(&self) -> Result<DataBlock> {
        let mut block = DataBlock::default();
        self.push_payload(&mut block).context(DataBlockOverflowSnafu)?;
        Ok(block)
    }

    fn push_payload(&self, block: &mut DataBlock) -> Result<(), DataBlockFullError> {
        match self {
            OpbCommand::Opl(command) => block.push(command.data),
            OpbCommand::SetInstrument(change) => {
                block.push_uint7(change.instrument)?;
                block.push(change.channel_byte())?;
                block.push(change.mask)?;
                push_levels(block, change.mod_level, change.car_level)
            }
            OpbCommand::PlayInstrument { change, freq, note } => {
                block.push_uint7(change.instrument)?;
                block.push(change.channel_byte())?;
                block.push(change.mask)?;
                block.push(*freq)?;
                block.push(*note)?;
                push_levels(block, change.mod_level, change.car_level)
            }
            OpbCommand::NoteOn {
                freq,
                note,
                mod_level,
                car_level,
                ..
            } => {
                // encode modulator and carrier levels data in the note data's upper 2 (unused) bits
                let mut note = note & NOTE_DATA;
                if mod_level.is_some() {
                    note |= NOTE_MOD_LEVEL;
                }
                if car_level.is_some() {
                    note |= NOTE_CAR_LEVEL;
                }
                block.push(*freq)?;
                block.push(note)?;
                push_levels(block, *mod_level, *car_level)
            }
        }
    }

    pub fn write_to(&self, mut writer: impl Write) -> Result<()> {
        let payload = self.payload()?;
        write_all(&mut writer, &[self.register()])?;
        write_all(&mut writer, payload.as_bytes())
    }

    /// Number of bytes taken by this command, register byte included
    pub fn byte_len(&self) -> usize {
        let levels = |a: &Option<u8>, b: &Option<u8>| a.is_some() as usize + b.is_some() as usize;
        match self {
            OpbCommand::Opl(_) => 2,
            OpbCommand::SetInstrument(change) => {
                3 + change.instrument.byte_length() as usize
                    + levels(&change.mod_level, &change.car_level)
            }
            OpbCommand::PlayInstrument { change, .. } => {
                5 + change.instrument.byte_length() as usize
                    + levels(&change.mod_level, &change.car_level)
            }
            OpbCommand::NoteOn {
                mod_level,
                car_level,
                ..
            } => 3 + levels(mod_level, car_level),
        }
    }
}

fn push_levels(
    block: &mut DataBlock,
    mod_level: Option<u8>,
    car_level: Option<u8>,
) -> Result<(), DataBlockFullError> {
    for level in [mod_level, car_level].into_iter().flatten() {
        block.push(level)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(bytes: &[u8], high_bank: bool) -> Result<OpbCommand> {
        let mut cursor = Cursor::new(bytes);
        let command = OpbCommand::read_from(&mut cursor, high_bank)?;
        assert_eq!(cursor.position() as usize, bytes.len(), "trailing bytes");
        Ok(command)
    }

    #[test]
    fn file_id_checks() {
        assert_eq!(
            FileId::read_from(&MAGIC[..]).unwrap(),
            FileId::V1
        );
        assert!(matches!(
            FileId::read_from(&b"XPBin1\0"[..]),
            Err(Error::InvalidMagic { .. })
        ));
        assert!(matches!(
            FileId::read_from(&b"OPBin2\0"[..]),
            Err(Error::UnsupportedVersion { version: b'2' })
        ));
        assert!(matches!(
            FileId::read_from(&b"OPBin1\x01"[..]),
            Err(Error::InvalidTerminator { value: 1 })
        ));
        assert!(matches!(
            FileId::read_from(&b"OPB"[..]),
            Err(Error::TruncatedStream { .. })
        ));
    }

    #[test]
    fn header_formats() {
        let header = Header::read_from(&[1u8][..]).unwrap();
        assert_eq!(header.format, Format::Raw);
        assert_eq!(header.chunk_data_offset(), 8);

        let bytes = [0u8, 0, 0, 0, 0x2A, 0, 0, 0, 2, 0, 0, 1, 0];
        let header = Header::read_from(&bytes[..]).unwrap();
        assert_eq!(header.size, 0x2A);
        assert_eq!(header.instrument_count, 2);
        assert_eq!(header.chunk_count, 0x100);
        assert_eq!(header.chunk_data_offset(), 38);
        assert_eq!(header.encoded_counters(), bytes[1..]);

        assert!(matches!(
            Header::read_from(&[7u8][..]),
            Err(Error::UnknownFormat { format: 7 })
        ));
    }

    #[test]
    fn instrument_layout() {
        let bytes = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let instrument = Instrument::read_from(&bytes[..]).unwrap();
        assert_eq!(instrument.feedback, 1);
        assert_eq!(instrument.modulator.wave_select, 5);
        assert_eq!(instrument.carrier.characteristic, 6);
        assert_eq!(instrument.encoded(), bytes);
    }

    #[test]
    fn parse_plain_write() {
        let command = read_all(&[0x20, 0x01], false).unwrap();
        assert_eq!(
            command,
            OpbCommand::Opl(RegisterWrite {
                register: 0x20,
                data: 0x01
            })
        );
        assert_eq!(command.byte_len(), 2);
    }

    #[test]
    fn parse_set_instrument_with_levels() {
        // instrument 0, channel 10, both levels + feedconn, mod characteristic
        let bytes = [0xD0, 0x00, 0b1110_1010, 0x01, 0x3F, 0x00];
        let command = read_all(&bytes, true).unwrap();
        let OpbCommand::SetInstrument(change) = &command else {
            panic!("unexpected command {command:?}");
        };
        assert_eq!(change.channel, 10);
        assert!(change.feed_conn);
        assert_eq!(change.mask, MASK_MOD_CHARACTERISTIC);
        assert_eq!(change.mod_level, Some(0x3F));
        assert_eq!(change.car_level, Some(0x00));
        assert!(command.is_high_bank());
        assert_eq!(command.byte_len(), bytes.len());

        let mut out = Vec::new();
        command.write_to(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn parse_play_instrument() {
        let bytes = [0xD1, 0x81, 0x01, 0x02, 0xFF, 0x44, 0x31];
        let command = read_all(&bytes, false).unwrap();
        let OpbCommand::PlayInstrument { change, freq, note } = &command else {
            panic!("unexpected command {command:?}");
        };
        assert_eq!(change.instrument.to_u32(), 0x81);
        assert_eq!(change.channel, 2);
        assert_eq!(change.mask, 0xFF);
        assert_eq!((*freq, *note), (0x44, 0x31));
        assert_eq!(command.byte_len(), bytes.len());
    }

    #[test]
    fn parse_note_on_uses_bank() {
        let bytes = [0xD9, 0x44, 0x31 | NOTE_CAR_LEVEL, 0x10];
        let command = read_all(&bytes, true).unwrap();
        assert_eq!(
            command,
            OpbCommand::NoteOn {
                channel: 11,
                freq: 0x44,
                note: 0x31,
                mod_level: None,
                car_level: Some(0x10),
            }
        );
        assert_eq!(command.register(), 0xD9);

        let mut out = Vec::new();
        command.write_to(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn rejects_bad_channel() {
        assert!(matches!(
            read_all(&[0xD0, 0x00, 18, 0x00], false),
            Err(Error::ChannelOutOfRange { channel: 18 })
        ));
    }

    #[test]
    fn truncated_commands() {
        assert!(matches!(
            OpbCommand::read_from(&[0xD7, 0x44][..], false),
            Err(Error::TruncatedStream { .. })
        ));
        assert!(matches!(
            OpbCommand::read_from(&[0xD0, 0x80][..], false),
            Err(Error::TruncatedStream {
                context: "uint7+ instrument index"
            })
        ));
        assert!(matches!(
            OpbCommand::read_from(&[0x20][..], false),
            Err(Error::TruncatedStream { .. })
        ));
    }
}
