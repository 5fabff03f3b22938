//! Encoding and decoding of OPL register-write streams
//! in the OPL binary (OPB) v1 format.
//!
//! A quick overview of the modules:
//!
//! - `encoder`: converts timed OPL register writes into [OPB][opb] data
//! - `decoder`: reads OPB data back into timed OPL register writes
//! - `instrument`: instrument matching used by the encoder
//! - `opb`: the OPB file structures and error type
//! - `opl`: the timed OPL command
//! - `registers`: helper OPL register definitions
//! - `diagnostics`: optional log sinks
//! - `vgm`: [Video Game Music][vgm] file reading (OPL music only)
//!
//! ```no_run
//! use opbcodec::{Encoder, Format, OplCommand};
//!
//! let commands = [
//!     OplCommand::new(0x20, 0x01, 0.0),
//!     OplCommand::new(0xB0, 0x31, 0.5),
//! ];
//! let bytes = Encoder::new(Format::Default).encode_to_vec(&commands)?;
//! let decoded = opbcodec::decode_to_vec(&bytes)?;
//! assert_eq!(decoded, commands);
//! # Ok::<(), opbcodec::CodecError>(())
//! ```
//!
//! [opb]: https://github.com/Enichan/OPBinaryLib
//! [vgm]: https://vgmrips.net/wiki/VGM_Specification

pub(crate) mod data_types;
pub mod diagnostics;
pub mod decoder;
pub mod encoder;
pub mod instrument;
pub mod opb;
pub mod opl;
pub mod registers;
pub mod vgm;

pub use crate::data_types::Uint7Plus;
pub use crate::decoder::{decode_file, decode_to_vec, decode_with, OpbReader, BATCH_SIZE};
pub use crate::diagnostics::{LogFacade, LogSink};
pub use crate::encoder::Encoder;
pub use crate::opb::{Error as CodecError, Format};
pub use crate::opl::OplCommand;
pub use crate::vgm::{Error as VgmError, Vgm};
