//! Baseline implementation for reading OPL music from VGM files
//!
//! Only the commands relevant to OPL chips are retained,
//! every other known command is skipped.

use core::fmt;
use std::path::Path;

use snafu::{ensure, OptionExt as _, ResultExt, Snafu};

use crate::data_types::Ascii;
use crate::opl::OplCommand;

/// Sample rate of all VGM wait commands
pub const SAMPLE_RATE: u32 = 44_100;

/// An error reading a VGM file
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read the file
    ReadFile { source: std::io::Error },
    /// Not a valid VGM file
    InvalidVgm,
    /// Failed to parse VGM data
    ParseVgm { source: ParseError },
    /// Failed to parse VGM command #{index} at offset {offset:#x}
    ParseCommandVgm {
        index: u32,
        offset: usize,
        source: ParseError,
    },
    /// Unsupported VGM version {version:04x}
    UnsupportedVersion { version: u32 },
    /// Not an OPL music file (no OPL chip clock)
    NoOplChip,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Error parsing a VGM file or VGM file component
#[derive(Debug, PartialEq, Snafu)]
pub enum ParseError {
    /// Insufficient bytes to parse {context}
    InsufficientBytes { context: &'static str },
    /// Insufficient bytes to parse command {code:02x} ({operand_size} operand bytes)
    InsufficientBytesCommand { code: u8, operand_size: usize },
    /// Unknown command {code:#04x}
    UnknownCommand { code: u8 },
}

/// A VGM file object,
/// with support limited to OPL chips and OPL commands.
#[derive(Debug)]
pub struct Vgm {
    /// a partial header
    pub header: OplPartialHeader,
    /// the OPL commands and waits, in order
    pub commands: Vec<VgmCommand>,
}

impl Vgm {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path).context(ReadFileSnafu)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(input: &[u8]) -> Result<Self> {
        let header = OplPartialHeader::parse(input).context(ParseVgmSnafu)?;

        // check identifier
        ensure!(header.base_header.ident == *b"Vgm ", InvalidVgmSnafu);

        // check version, YMF262 support was added in 1.51
        ensure!(
            header.base_header.version >= 0x0000_0151,
            UnsupportedVersionSnafu {
                version: header.base_header.version,
            }
        );

        ensure!(header.opl_clock() != 0, NoOplChipSnafu);

        // read until the end of data command or EOF
        let end = match header.base_header.eof_offset {
            0 => input.len(),
            offset => input.len().min(offset as usize + 4),
        };
        let start = header.data_offset as usize;
        let mut rest = input
            .get(start..end)
            .context(InsufficientBytesSnafu {
                context: "VGM data",
            })
            .context(ParseVgmSnafu)?;

        let mut commands = Vec::new();
        let mut i: u32 = 0;

        while !rest.is_empty() {
            let offset = end - rest.len();
            let (command, new_rest) = Command::parse(rest).context(ParseCommandVgmSnafu {
                index: i,
                offset,
            })?;
            if command.code == 0x66 {
                break;
            }
            commands.extend(command.to_vgm_command());
            rest = new_rest;
            i += 1;
        }

        Ok(Self { header, commands })
    }

    /// Convert the VGM commands into timed OPL register writes.
    ///
    /// Writes to the second YMF262 port go to the high bank.
    pub fn opl_commands(&self) -> Vec<OplCommand> {
        let mut samples: u64 = 0;
        let mut out = Vec::new();
        for command in &self.commands {
            let time = samples as f64 / SAMPLE_RATE as f64;
            match *command {
                VgmCommand::Wait { samples: n } => samples += u64::from(n),
                VgmCommand::Wait735 => samples += 735,
                VgmCommand::Wait882 => samples += 882,
                VgmCommand::SmallWait { n } => samples += u64::from(n) + 1,
                VgmCommand::Opl2 { address, data, .. } => {
                    out.push(OplCommand::new(address as u16, data, time))
                }
                VgmCommand::Opl3 {
                    port,
                    address,
                    data,
                } => out.push(OplCommand::new(
                    (port as u16) << 8 | address as u16,
                    data,
                    time,
                )),
            }
        }
        out
    }

    /// Total of all wait values in the command stream
    pub fn total_samples(&self) -> u64 {
        self.commands.iter().map(VgmCommand::samples).sum()
    }
}

/// Base header of all VGM files
#[derive(Clone, PartialEq)]
pub struct BaseHeader {
    /// "Vgm " ident
    ///
    /// file identification (0x56 0x67 0x6d 0x20)
    pub ident: [u8; 4],
    /// Eof offset
    ///
    /// Relative offset to end of file (i.e. file length - 4).
    pub eof_offset: u32,
    /// Version number
    ///
    /// Version number in BCD-Code.
    /// e.g. Version 1.71 is stored as 0x00000171.
    pub version: u32,
}

impl core::fmt::Debug for BaseHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BaseHeader")
            .field("ident", &Ascii(&self.ident))
            .field("eof_offset", &self.eof_offset)
            .field("version", &self.version)
            .finish()
    }
}

fn u32_at(input: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        input[offset],
        input[offset + 1],
        input[offset + 2],
        input[offset + 3],
    ])
}

impl BaseHeader {
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        ensure!(
            input.len() >= 12,
            InsufficientBytesSnafu {
                context: "Base header"
            }
        );
        Ok(Self {
            ident: [input[0], input[1], input[2], input[3]],
            eof_offset: u32_at(input, 4),
            version: u32_at(input, 8),
        })
    }
}

/// A partial view of the VGM header
/// specifically for keeping data relevant to OPL music.
#[derive(Debug, Clone, PartialEq)]
pub struct OplPartialHeader {
    pub base_header: BaseHeader,

    /// Total of all wait values in the file.
    ///
    /// Address: `0x18`
    pub total_samples: u32,

    /// Absolute offset of the VGM data.
    ///
    /// Address: `0x34` (stored relative to that address),
    /// `0x40` if not stored.
    pub data_offset: u32,

    /// Input clock rate in Hz for the YM3812 chip (OPL2).
    ///
    /// Address: `0x50`
    pub ym3812_clock: u32,

    /// Input clock rate in Hz for the YM3526 chip (OPL).
    ///
    /// Address: `0x54`
    pub ym3526_clock: u32,

    /// Input clock rate in Hz for the Y8950 chip (MSX-AUDIO).
    ///
    /// Address: `0x58`
    pub y8950_clock: u32,

    /// Input clock rate in Hz for the YMF262 chip (OPL3).
    ///
    /// Address: `0x5C`
    pub ymf262_clock: u32,
}

impl OplPartialHeader {
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        let base_header = BaseHeader::parse(input)?;

        ensure!(
            input.len() >= 0x60,
            InsufficientBytesSnafu {
                context: "VGM header"
            }
        );

        let data_offset = match u32_at(input, 0x34) {
            0 => 0x40,
            offset => offset.saturating_add(0x34),
        };

        Ok(Self {
            base_header,
            total_samples: u32_at(input, 0x18),
            data_offset,
            ym3812_clock: u32_at(input, 0x50),
            ym3526_clock: u32_at(input, 0x54),
            y8950_clock: u32_at(input, 0x58),
            ymf262_clock: u32_at(input, 0x5c),
        })
    }

    /// The highest clock of all OPL chips,
    /// 0 if none is in use
    pub fn opl_clock(&self) -> u32 {
        self.ym3812_clock
            .max(self.ym3526_clock)
            .max(self.y8950_clock)
            .max(self.ymf262_clock)
    }
}

/// A command in a VGM file
/// which is supported in the context of reading OPL music.
#[derive(Clone, PartialEq)]
pub enum VgmCommand {
    /// Command of code `0x5A` (YM3812), `0x5B` (YM3526) or `0x5C` (Y8950)
    Opl2 {
        /// The command code
        code: u8,
        /// The register to write to
        address: u8,
        /// The data to write to the register
        data: u8,
    },
    /// Command of code `0x5E` or `0x5F` (OPL3),
    Opl3 {
        /// Port number (0 or 1)
        port: u8,
        /// The register to write to
        address: u8,
        /// The data to write to the register
        data: u8,
    },
    /// Command of code `0x61` (Wait n samples)
    Wait {
        /// The number of samples to wait
        samples: u16,
    },
    /// Command of code `0x62`,
    /// to wait 735 samples.
    Wait735,
    /// Command of code `0x63`,
    /// to wait 882 samples.
    Wait882,
    /// Command of code `0x7n` (Wait n+1 samples)
    SmallWait {
        /// The number of samples to wait minus 1
        /// (n must range from 0 to 15)
        n: u8,
    },
}

impl VgmCommand {
    /// The number of samples waited by this command
    pub fn samples(&self) -> u64 {
        match *self {
            VgmCommand::Wait { samples } => u64::from(samples),
            VgmCommand::Wait735 => 735,
            VgmCommand::Wait882 => 882,
            VgmCommand::SmallWait { n } => u64::from(n) + 1,
            VgmCommand::Opl2 { .. } | VgmCommand::Opl3 { .. } => 0,
        }
    }
}

impl fmt::Debug for VgmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VgmCommand::Opl2 {
                code,
                address,
                data,
            } => write!(
                f,
                "OPL2 {{ code: {:#04x}, address: {:#04x}, data: {:#04x} }}",
                code, address, data
            ),
            VgmCommand::Opl3 {
                port,
                address,
                data,
            } => write!(
                f,
                "OPL3 {{ port: {:#04x}, address: {:#04x}, data: {:#04x} }}",
                port, address, data
            ),
            VgmCommand::Wait { samples } => write!(f, "Wait {} samples", samples),
            VgmCommand::Wait735 => write!(f, "Wait 735 samples"),
            VgmCommand::Wait882 => write!(f, "Wait 882 samples"),
            VgmCommand::SmallWait { n: samples } => write!(f, "Wait {} samples", samples + 1),
        }
    }
}

/// An arbitrary command in a VGM file,
/// uninterpreted
#[derive(Clone, PartialEq)]
pub struct Command<'a> {
    /// the code
    pub code: u8,
    /// the operand bytes in order
    pub operands: &'a [u8],
}

impl<'a> Command<'a> {
    pub fn parse(input: &'a [u8]) -> Result<(Self, &'a [u8]), ParseError> {
        let (&code, rest) = input.split_first().context(InsufficientBytesSnafu {
            context: "Command code",
        })?;

        let operand_size = if code == 0x67 {
            // data block: 0x66, type, 32-bit size, then the data
            ensure!(
                rest.len() >= 6,
                InsufficientBytesCommandSnafu {
                    code,
                    operand_size: 6usize
                }
            );
            6 + u32_at(rest, 2) as usize
        } else {
            Command::operand_size_of(code).context(UnknownCommandSnafu { code })?
        };

        ensure!(
            rest.len() >= operand_size,
            InsufficientBytesCommandSnafu { code, operand_size }
        );

        let (operands, rest) = rest.split_at(operand_size);
        Ok((Self { code, operands }, rest))
    }

    /// the number of bytes expected after the command code
    /// (as per version 1.51)
    fn operand_size_of(code: u8) -> Option<usize> {
        Some(match code {
            // 0 byte operands
            0x62 | 0x63 | 0x66 | 0x70..=0x7f | 0x80..=0x8f => 0,
            // 1 byte operands
            0x30..=0x3F | 0x4f | 0x50 | 0x94 => 1,
            // 1 byte operands in v1.51, 2 bytes v1.60 onwards
            0x41..=0x4E => 1,
            // 2 byte operands
            0x40 | 0x51..=0x5f | 0x61 | 0xa0..=0xbf => 2,
            // 3 byte operands
            0xc0..=0xdf => 3,
            // 4 byte operands
            0xe0..=0xff | 0x90 | 0x91 | 0x95 => 4,
            // DAC stream control
            0x92 => 5,
            0x93 => 10,
            // PCM RAM write
            0x68 => 11,
            // not supported
            _ => return None,
        })
    }

    /// Interpret the command in the context of OPL music,
    /// `None` for commands irrelevant to OPL chips
    pub fn to_vgm_command(&self) -> Option<VgmCommand> {
        let operand = |i: usize| self.operands.get(i).copied().unwrap_or(0);
        match self.code {
            // Wait
            0x61 => Some(VgmCommand::Wait {
                samples: u16::from_le_bytes([operand(0), operand(1)]),
            }),
            0x62 => Some(VgmCommand::Wait735),
            0x63 => Some(VgmCommand::Wait882),
            0x70..=0x7f => Some(VgmCommand::SmallWait {
                n: self.code - 0x70,
            }),
            // YM3812, YM3526 and Y8950 commands
            0x5A..=0x5C => Some(VgmCommand::Opl2 {
                code: self.code,
                address: operand(0),
                data: operand(1),
            }),
            // YMF262 commands, port 0 or 1
            0x5e | 0x5f => Some(VgmCommand::Opl3 {
                port: self.code - 0x5e,
                address: operand(0),
                data: operand(1),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command {{ code: {:#04x}, operands: {:02x?} }}",
            self.code, self.operands
        )
    }
}
