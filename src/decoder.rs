//! OPB decoder.
//!
//! [`OpbReader`] pulls OPL commands out of OPB data on demand,
//! expanding instrument and note commands into the register writes they stand for.
//! [`decode_with`] delivers the same commands in batches to a callback.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use snafu::{OptionExt, ResultExt};

use crate::data_types::read_up_to;
use crate::diagnostics::{debug, error, trace, LogSink, Logger};
use crate::opb::{
    ChunkHeader, FileId, Format, Header, Instrument, InstrumentChange,
    InstrumentOutOfRangeSnafu, OpbCommand, OpenFileSnafu, ReadStreamSnafu, Result,
    TruncatedStreamSnafu, MASK_CAR_ATTACK_DECAY, MASK_CAR_CHARACTERISTIC,
    MASK_CAR_SUSTAIN_RELEASE, MASK_CAR_WAVE_SELECT, MASK_MOD_ATTACK_DECAY,
    MASK_MOD_CHARACTERISTIC, MASK_MOD_SUSTAIN_RELEASE, MASK_MOD_WAVE_SELECT, RAW_ENTRY_SIZE,
};
use crate::opl::OplCommand;
use crate::registers::{
    channel_offset, is_valid_opl_register, operator_offset, OperatorRole, ATTACK_DECAY,
    BANK_BIT, CHARACTERISTIC, FEEDBACK_CONNECTION, FREQUENCY, LEVELS, NOTE, SUSTAIN_RELEASE,
    WAVE_SELECT,
};

/// Number of commands delivered at once by [`decode_with`]
pub const BATCH_SIZE: usize = 256;

/// A reader which keeps track of how many bytes were consumed
#[derive(Debug)]
struct Tracked<R> {
    inner: R,
    position: u64,
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Progress through the body of the file
#[derive(Debug, Default, Copy, Clone)]
struct Progress {
    /// Playback time, in milliseconds
    clock_ms: u64,
    chunks_left: u32,
    lo_left: u32,
    hi_left: u32,
}

/// A pull-based reader of OPB data.
///
/// The header and the instrument table are read on construction;
/// commands are then read lazily,
/// either one by one through the [`Iterator`] implementation
/// or in batches with [`read_batch`](OpbReader::read_batch).
#[derive(Debug)]
pub struct OpbReader<'a, R> {
    reader: Tracked<R>,
    header: Header,
    instruments: Vec<Instrument>,
    logger: Logger<'a>,
    /// Number of bytes before the first chunk or raw entry
    body_offset: u64,
    progress: Progress,
    pending: VecDeque<OplCommand>,
    done: bool,
}

impl<'a, R> OpbReader<'a, R>
where
    R: Read,
{
    /// Read the header and instrument table of OPB data.
    pub fn new(reader: R) -> Result<Self> {
        Self::with_logger_impl(reader, Logger::default())
    }

    /// Read the header and instrument table of OPB data,
    /// sending diagnostic messages to the given sink.
    pub fn with_logger(reader: R, sink: impl LogSink + 'a) -> Result<Self> {
        Self::with_logger_impl(reader, Logger::new(sink))
    }

    fn with_logger_impl(reader: R, logger: Logger<'a>) -> Result<Self> {
        let mut reader = Tracked {
            inner: reader,
            position: 0,
        };
        match Self::read_head(&mut reader) {
            Ok((header, instruments)) => {
                debug!(
                    logger,
                    "OPB format {} ({}), {} bytes, {} instruments, {} chunks",
                    u8::from(header.format),
                    header.format,
                    header.size,
                    header.instrument_count,
                    header.chunk_count
                );
                let progress = Progress {
                    chunks_left: header.chunk_count,
                    ..Default::default()
                };
                Ok(OpbReader {
                    body_offset: header.chunk_data_offset(),
                    reader,
                    header,
                    instruments,
                    logger,
                    progress,
                    pending: VecDeque::new(),
                    done: false,
                })
            }
            Err(e) => {
                error!(logger, "{}", e);
                Err(e)
            }
        }
    }

    fn read_head(mut reader: impl Read) -> Result<(Header, Vec<Instrument>)> {
        FileId::read_from(&mut reader)?;
        let header = Header::read_from(&mut reader)?;
        let instruments = (0..header.instrument_count)
            .map(|_| Instrument::read_from(&mut reader))
            .collect::<Result<Vec<_>>>()?;
        Ok((header, instruments))
    }

    /// The file header.
    /// All counters are zero in the raw format.
    pub fn header_info(&self) -> &Header {
        &self.header
    }

    pub fn format(&self) -> Format {
        self.header.format
    }

    /// The instrument table
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Read up to `max` commands into `out`,
    /// returning how many were added.
    /// Zero means that there are no more commands.
    pub fn read_batch(&mut self, out: &mut Vec<OplCommand>, max: usize) -> Result<usize> {
        let mut count = 0;
        while count < max {
            match self.next_command()? {
                Some(command) => {
                    out.push(command);
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Read all remaining commands
    pub fn read_to_end(&mut self) -> Result<Vec<OplCommand>> {
        let mut out = Vec::new();
        while self.read_batch(&mut out, BATCH_SIZE)? > 0 {}
        Ok(out)
    }

    fn next_command(&mut self) -> Result<Option<OplCommand>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(command) = self.pending.pop_front() {
                return Ok(Some(command));
            }
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return Ok(None);
                }
                Err(e) => {
                    error!(self.logger, "{}", e);
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }

    /// Decode the next entry into the pending queue,
    /// returning `false` at the end of the data.
    fn fill(&mut self) -> Result<bool> {
        match self.header.format {
            Format::Raw => self.fill_raw(),
            Format::Default => self.fill_default(),
        }
    }

    fn fill_raw(&mut self) -> Result<bool> {
        let mut record = [0u8; RAW_ENTRY_SIZE];
        let n = read_up_to(&mut self.reader, &mut record).context(ReadStreamSnafu {
            context: "raw entry",
        })?;
        if n == 0 {
            return Ok(false);
        }
        if n < RAW_ENTRY_SIZE {
            return TruncatedStreamSnafu {
                context: "raw entry",
            }
            .fail();
        }

        let elapsed = u16::from_be_bytes([record[0], record[1]]);
        let address = u16::from_be_bytes([record[2], record[3]]);
        self.progress.clock_ms += u64::from(elapsed);
        self.push(address, record[4]);
        Ok(true)
    }

    fn fill_default(&mut self) -> Result<bool> {
        let high_bank = if self.progress.lo_left > 0 {
            self.progress.lo_left -= 1;
            false
        } else if self.progress.hi_left > 0 {
            self.progress.hi_left -= 1;
            true
        } else if self.progress.chunks_left > 0 {
            let chunk = ChunkHeader::read_from(&mut self.reader)?;
            self.progress.chunks_left -= 1;
            self.progress.clock_ms += u64::from(chunk.time_elapsed.to_u32());
            self.progress.lo_left = chunk.opl_command_count_lo.to_u32();
            self.progress.hi_left = chunk.opl_command_count_hi.to_u32();
            trace!(
                self.logger,
                "Chunk at {} ms with {} commands",
                self.progress.clock_ms,
                chunk.command_count()
            );
            return Ok(true);
        } else {
            return Ok(false);
        };

        let command = OpbCommand::read_from(&mut self.reader, high_bank)?;
        self.expand(command, high_bank)?;
        Ok(true)
    }

    fn push(&mut self, address: u16, data: u8) {
        if self.logger.enabled() && !is_valid_opl_register(address as u8) {
            trace!(
                self.logger,
                "Register 0x{:03X} is not part of the OPL register map",
                address
            );
        }
        let time = self.progress.clock_ms as f64 / 1000.0;
        self.pending.push_back(OplCommand::new(address, data, time));
    }

    /// Turn an OPB command into the register writes it stands for
    fn expand(&mut self, command: OpbCommand, high_bank: bool) -> Result<()> {
        match command {
            OpbCommand::Opl(write) => {
                let bank = if high_bank { BANK_BIT } else { 0 };
                self.push(write.register as u16 | bank, write.data);
            }
            OpbCommand::SetInstrument(change) => {
                self.expand_instrument(&change)?;
            }
            OpbCommand::PlayInstrument { change, freq, note } => {
                self.expand_instrument(&change)?;
                let offset = channel_offset(change.channel);
                self.push(FREQUENCY as u16 + offset, freq);
                self.push(NOTE as u16 + offset, note);
            }
            OpbCommand::NoteOn {
                channel,
                freq,
                note,
                mod_level,
                car_level,
            } => {
                let offset = channel_offset(channel);
                self.push(FREQUENCY as u16 + offset, freq);
                self.push(NOTE as u16 + offset, note);
                if let Some(level) = mod_level {
                    let op = operator_offset(channel, OperatorRole::Modulator);
                    self.push(LEVELS as u16 + op, level);
                }
                if let Some(level) = car_level {
                    let op = operator_offset(channel, OperatorRole::Carrier);
                    self.push(LEVELS as u16 + op, level);
                }
            }
        }
        Ok(())
    }

    fn expand_instrument(&mut self, change: &InstrumentChange) -> Result<()> {
        let index = change.instrument.to_u32();
        let instrument = self
            .instruments
            .get(index as usize)
            .cloned()
            .context(InstrumentOutOfRangeSnafu {
                index,
                count: self.header.instrument_count,
            })?;

        let channel = change.channel;
        let mask = change.mask;
        let m = operator_offset(channel, OperatorRole::Modulator);
        let c = operator_offset(channel, OperatorRole::Carrier);

        if change.feed_conn {
            self.push(
                FEEDBACK_CONNECTION as u16 + channel_offset(channel),
                instrument.feedback,
            );
        }

        let writes = [
            (MASK_MOD_CHARACTERISTIC, CHARACTERISTIC, m, Some(instrument.modulator.characteristic)),
            (0, LEVELS, m, change.mod_level),
            (MASK_MOD_ATTACK_DECAY, ATTACK_DECAY, m, Some(instrument.modulator.attack_decay)),
            (MASK_MOD_SUSTAIN_RELEASE, SUSTAIN_RELEASE, m, Some(instrument.modulator.sustain_release)),
            (MASK_MOD_WAVE_SELECT, WAVE_SELECT, m, Some(instrument.modulator.wave_select)),
            (MASK_CAR_CHARACTERISTIC, CHARACTERISTIC, c, Some(instrument.carrier.characteristic)),
            (0, LEVELS, c, change.car_level),
            (MASK_CAR_ATTACK_DECAY, ATTACK_DECAY, c, Some(instrument.carrier.attack_decay)),
            (MASK_CAR_SUSTAIN_RELEASE, SUSTAIN_RELEASE, c, Some(instrument.carrier.sustain_release)),
            (MASK_CAR_WAVE_SELECT, WAVE_SELECT, c, Some(instrument.carrier.wave_select)),
        ];
        for (bit, base, op, value) in writes {
            // levels come from the command itself, not from the mask
            let selected = bit == 0 || mask & bit != 0;
            if let (true, Some(data)) = (selected, value) {
                self.push(base as u16 + op, data);
            }
        }
        Ok(())
    }
}

impl<R> OpbReader<'_, R>
where
    R: Read + Seek,
{
    /// Go back to the first command
    pub fn reset(&mut self) -> Result<()> {
        let back = self.reader.position - self.body_offset;
        self.reader
            .inner
            .seek(SeekFrom::Current(-(back as i64)))
            .context(ReadStreamSnafu {
                context: "chunk data",
            })?;
        self.reader.position = self.body_offset;
        self.progress = Progress {
            chunks_left: self.header.chunk_count,
            ..Default::default()
        };
        self.pending.clear();
        self.done = false;
        Ok(())
    }
}

impl<R> Iterator for OpbReader<'_, R>
where
    R: Read,
{
    type Item = Result<OplCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_command().transpose()
    }
}

impl<R> core::iter::FusedIterator for OpbReader<'_, R> where R: Read {}

/// Decode OPB data,
/// passing the commands to `receiver` in batches of up to [`BATCH_SIZE`].
///
/// The receiver is called at least once if any command was decoded.
/// Only the last batch may be smaller than [`BATCH_SIZE`].
pub fn decode_with<R, F>(reader: R, mut receiver: F) -> Result<()>
where
    R: Read,
    F: FnMut(&[OplCommand]),
{
    let mut reader = OpbReader::new(reader)?;
    let mut batch = Vec::with_capacity(BATCH_SIZE);
    while reader.read_batch(&mut batch, BATCH_SIZE)? > 0 {
        receiver(&batch);
        batch.clear();
    }
    Ok(())
}

/// Decode an OPB file,
/// passing the commands to `receiver` in batches (see [`decode_with`]).
pub fn decode_file<F>(path: impl AsRef<Path>, receiver: F) -> Result<()>
where
    F: FnMut(&[OplCommand]),
{
    let file = File::open(path).context(OpenFileSnafu)?;
    decode_with(BufReader::new(file), receiver)
}

/// Decode OPB data held in memory
pub fn decode_to_vec(bytes: &[u8]) -> Result<Vec<OplCommand>> {
    OpbReader::new(bytes)?.read_to_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opb::Error;
    use std::io::Cursor;

    fn opb(format: u8, instruments: &[[u8; 9]], chunks: u32, body: &[u8]) -> Vec<u8> {
        let mut out = b"OPBin1\0".to_vec();
        out.push(format);
        if format == 0 {
            let size = 20 + 9 * instruments.len() + body.len();
            out.extend((size as u32).to_be_bytes());
            out.extend((instruments.len() as u32).to_be_bytes());
            out.extend(chunks.to_be_bytes());
            for instrument in instruments {
                out.extend(instrument);
            }
        }
        out.extend(body);
        out
    }

    fn pairs(commands: &[OplCommand]) -> Vec<(u16, u8)> {
        commands.iter().map(|c| (c.address, c.data)).collect()
    }

    #[test]
    fn bad_magic() {
        let mut bytes = opb(0, &[], 0, &[]);
        bytes[0] = b'X';
        let e = decode_to_vec(&bytes).unwrap_err();
        assert!(matches!(e, Error::InvalidMagic { .. }));
        assert!(e.to_string().contains("header check"));
    }

    #[test]
    fn truncated_in_varint() {
        let bytes = opb(0, &[], 1, &[0x80]);
        let e = decode_to_vec(&bytes).unwrap_err();
        assert!(matches!(
            e,
            Error::TruncatedStream {
                context: "uint7+ chunk elapsed time"
            }
        ));
        assert!(e.to_string().contains("Truncated"));
    }

    #[test]
    fn plain_writes_in_both_banks() {
        let body = [
            0x0A, 0x01, 0x01, 0x20, 0x01, 0x20, 0x02, // 10 ms
            0x05, 0x00, 0x01, 0xB0, 0x31, // 15 ms
        ];
        let commands = decode_to_vec(&opb(0, &[], 2, &body)).unwrap();
        assert_eq!(pairs(&commands), [(0x020, 0x01), (0x120, 0x02), (0x1B0, 0x31)]);
        assert_eq!(commands[0].time, 0.010);
        assert_eq!(commands[1].time, 0.010);
        assert_eq!(commands[2].time, 0.015);
    }

    #[test]
    fn set_instrument_expansion_order() {
        let instrument = [0x0E, 0x01, 0x02, 0x03, 0x04, 0x11, 0x12, 0x13, 0x14];
        // channel 4, all properties, both levels
        let body = [0x00, 0x01, 0x00, 0xD0, 0x00, 0xE4, 0xFF, 0x3F, 0x00];
        let commands = decode_to_vec(&opb(0, &[instrument], 1, &body)).unwrap();
        assert_eq!(
            pairs(&commands),
            [
                (0xC4, 0x0E),
                (0x29, 0x01),
                (0x49, 0x3F),
                (0x69, 0x02),
                (0x89, 0x03),
                (0xE9, 0x04),
                (0x2C, 0x11),
                (0x4C, 0x00),
                (0x6C, 0x12),
                (0x8C, 0x13),
                (0xEC, 0x14),
            ]
        );
    }

    #[test]
    fn play_instrument_on_high_channel() {
        let instrument = [0, 0x21, 0, 0, 0, 0, 0, 0, 0x01];
        // channel 9, modulator characteristic and carrier wave select
        let body = [0x00, 0x00, 0x01, 0xD1, 0x00, 0x09, 0x81, 0x44, 0x31];
        let commands = decode_to_vec(&opb(0, &[instrument], 1, &body)).unwrap();
        assert_eq!(
            pairs(&commands),
            [(0x120, 0x21), (0x1E3, 0x01), (0x1A0, 0x44), (0x1B0, 0x31)]
        );
    }

    #[test]
    fn note_on_expansion() {
        let body = [0x00, 0x01, 0x00, 0xD8, 0x44, 0x31 | 0x40, 0x2A];
        let commands = decode_to_vec(&opb(0, &[], 1, &body)).unwrap();
        assert_eq!(pairs(&commands), [(0xA1, 0x44), (0xB1, 0x31), (0x41, 0x2A)]);
    }

    #[test]
    fn unknown_reserved_registers_are_plain_writes() {
        let body = [0x00, 0x01, 0x00, 0xD3, 0x7F];
        let commands = decode_to_vec(&opb(0, &[], 1, &body)).unwrap();
        assert_eq!(pairs(&commands), [(0xD3, 0x7F)]);
    }

    #[test]
    fn instrument_out_of_range() {
        let body = [0x00, 0x01, 0x00, 0xD0, 0x02, 0x00, 0x01];
        let e = decode_to_vec(&opb(0, &[[0; 9]], 1, &body)).unwrap_err();
        assert!(matches!(
            e,
            Error::InstrumentOutOfRange { index: 2, count: 1 }
        ));
    }

    #[test]
    fn raw_records() {
        let body = [0x00, 0x00, 0x00, 0x20, 0x01, 0x01, 0xF4, 0x01, 0xB0, 0x31];
        let commands = decode_to_vec(&opb(1, &[], 0, &body)).unwrap();
        assert_eq!(pairs(&commands), [(0x020, 0x01), (0x1B0, 0x31)]);
        assert_eq!(commands[1].time, 0.5);

        let e = decode_to_vec(&opb(1, &[], 0, &body[..7])).unwrap_err();
        assert!(matches!(e, Error::TruncatedStream { .. }));
    }

    #[test]
    fn batches_are_capped() {
        let mut body = vec![0x00];
        // 300 low commands: uint7+ 300 = [0xAC, 0x02]
        body.extend([0xAC, 0x02, 0x00]);
        for i in 0..300u32 {
            body.extend([0x20, i as u8]);
        }
        let bytes = opb(0, &[], 1, &body);

        let mut sizes = Vec::new();
        decode_with(&bytes[..], |batch| sizes.push(batch.len())).unwrap();
        assert_eq!(sizes, [BATCH_SIZE, 300 - BATCH_SIZE]);

        let mut calls = 0;
        decode_with(&opb(0, &[], 0, &[])[..], |_| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn iterator_is_fused_after_error() {
        let body = [0x00, 0x02, 0x00, 0x20, 0x01, 0x20];
        let data = opb(0, &[], 1, &body);
        let mut reader = OpbReader::new(&data[..]).unwrap();
        assert!(matches!(reader.next(), Some(Ok(_))));
        assert!(matches!(reader.next(), Some(Err(Error::TruncatedStream { .. }))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn reset_starts_over() {
        let instrument = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let body = [0x0A, 0x01, 0x00, 0x20, 0x01, 0x0A, 0x01, 0x00, 0x40, 0x3F];
        let mut reader = OpbReader::new(Cursor::new(opb(0, &[instrument], 2, &body))).unwrap();
        assert_eq!(reader.header_info().chunk_count, 2);
        assert_eq!(reader.instruments()[0].carrier.wave_select, 9);

        let first = reader.read_to_end().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].time, 0.02);
        assert!(reader.next().is_none());

        reader.reset().unwrap();
        let second = reader.read_to_end().unwrap();
        assert_eq!(first, second);
    }
}
