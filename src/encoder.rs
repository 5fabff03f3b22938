//! OPB encoder.
//!
//! The encoder works in a few passes over the input command stream:
//!
//! 1. commands in the OPB-reserved register range are dropped,
//!    the others receive their order index;
//! 2. commands are separated into one track per channel,
//!    plus one track for everything else;
//! 3. each channel track is split into ranges of consecutive writes
//!    at the same point in time, ending at a note write,
//!    which are compressed into instrument and note commands when worthwhile;
//! 4. the tracks are merged back in their original order;
//! 5. commands at the same point in time are written as one chunk.
//!
//! The header is written last,
//! which is why the output must be seekable.

use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::Path;

use snafu::{ensure, OptionExt, ResultExt};

use crate::data_types::Uint7Plus;
use crate::diagnostics::{debug, error, info, trace, warning, LogSink, Logger};
use crate::instrument::{InstrumentTable, PartialInstrument, PartialOperator};
use crate::opb::{
    write_all, ChunkHeader, CreateFileSnafu, DuplicateNoteInRangeSnafu, ElapsedTooLargeSnafu,
    FileId, Format, Header, HeaderFieldTooLargeSnafu, InstrumentChange, OpbCommand,
    PayloadMismatchSnafu, RegisterWrite, Result,
    TimingMismatchSnafu, ValueTooLargeSnafu, WriteStreamSnafu, NOTE_DATA,
};
use crate::opl::OplCommand;
use crate::registers::{
    channel_of, classify, is_channel_note, is_opb_command, ChannelRegister, OperatorRole,
    BANK_BIT, NUM_CHANNELS,
};

/// One track per channel, plus one for commands not bound to a channel
const NUM_TRACKS: usize = NUM_CHANNELS + 1;

/// A register write on its way through the encoder
#[derive(Debug, Copy, Clone)]
struct Command {
    address: u16,
    data: u8,
    time: f64,
    /// position in the normalized input stream
    order: usize,
    /// payload of an OPB command, as an index into the data block table
    data_ref: Option<usize>,
}

fn time_to_ms(time: f64) -> u64 {
    (time * 1000.0).round() as u64
}

/// The channel register writes found in one range
#[derive(Debug, Default)]
struct RangeWrites {
    modulator: OperatorWrites,
    carrier: OperatorWrites,
    feedback: Option<Command>,
    freq: Option<Command>,
    note: Option<Command>,
}

#[derive(Debug, Default)]
struct OperatorWrites {
    characteristic: Option<Command>,
    levels: Option<Command>,
    attack_decay: Option<Command>,
    sustain_release: Option<Command>,
    wave_select: Option<Command>,
}

impl OperatorWrites {
    fn partial(&self) -> PartialOperator {
        PartialOperator {
            characteristic: self.characteristic.map(|c| c.data),
            attack_decay: self.attack_decay.map(|c| c.data),
            sustain_release: self.sustain_release.map(|c| c.data),
            wave_select: self.wave_select.map(|c| c.data),
        }
    }

    fn level(&self) -> Option<u8> {
        self.levels.map(|c| c.data)
    }

    fn drain_into(&mut self, out: &mut Vec<Command>) {
        out.extend(
            [
                self.characteristic.take(),
                self.levels.take(),
                self.attack_decay.take(),
                self.sustain_release.take(),
                self.wave_select.take(),
            ]
            .into_iter()
            .flatten(),
        );
    }
}

impl RangeWrites {
    fn operator(&mut self, role: OperatorRole) -> &mut OperatorWrites {
        match role {
            OperatorRole::Modulator => &mut self.modulator,
            OperatorRole::Carrier => &mut self.carrier,
        }
    }

    fn slot(&mut self, register: ChannelRegister) -> &mut Option<Command> {
        match register {
            ChannelRegister::Characteristic(role) => &mut self.operator(role).characteristic,
            ChannelRegister::Levels(role) => &mut self.operator(role).levels,
            ChannelRegister::AttackDecay(role) => &mut self.operator(role).attack_decay,
            ChannelRegister::SustainRelease(role) => &mut self.operator(role).sustain_release,
            ChannelRegister::WaveSelect(role) => &mut self.operator(role).wave_select,
            ChannelRegister::Frequency => &mut self.freq,
            ChannelRegister::Note => &mut self.note,
            ChannelRegister::FeedbackConnection => &mut self.feedback,
        }
    }

    fn partial_instrument(&self) -> PartialInstrument {
        PartialInstrument {
            feedback: self.feedback.map(|c| c.data),
            modulator: self.modulator.partial(),
            carrier: self.carrier.partial(),
        }
    }

    /// Position of the last write covered by an instrument command
    fn instrument_order(&self) -> usize {
        let operators = [&self.modulator, &self.carrier].into_iter().flat_map(|op| {
            [
                op.characteristic,
                op.levels,
                op.attack_decay,
                op.sustain_release,
                op.wave_select,
            ]
        });
        operators
            .chain([self.feedback])
            .flatten()
            .map(|command| command.order)
            .max()
            .unwrap_or(0)
    }

    fn level_count(&self) -> usize {
        self.modulator.levels.is_some() as usize + self.carrier.levels.is_some() as usize
    }

    /// Forget the writes now covered by an instrument command
    fn clear_instrument(&mut self) {
        self.feedback = None;
        self.modulator = OperatorWrites::default();
        self.carrier = OperatorWrites::default();
    }

    /// Move the remaining writes to `out`, in register family order
    fn drain_into(mut self, out: &mut Vec<Command>) {
        self.modulator.drain_into(out);
        self.carrier.drain_into(out);
        out.extend([self.feedback, self.freq, self.note].into_iter().flatten());
    }
}

/// An encoder of OPL command streams into OPB data.
///
/// The encoder holds no state between calls;
/// each call builds its own instrument table.
#[derive(Debug, Default)]
pub struct Encoder<'a> {
    format: Format,
    logger: Logger<'a>,
}

impl<'a> Encoder<'a> {
    pub fn new(format: Format) -> Self {
        Encoder {
            format,
            logger: Logger::default(),
        }
    }

    /// Attach a sink for diagnostic messages
    pub fn with_logger(mut self, sink: impl LogSink + 'a) -> Self {
        self.logger = Logger::new(sink);
        self
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Encode the commands into the given writer,
    /// starting at its current position.
    ///
    /// On success, the writer is left at the end of the OPB data.
    pub fn encode<W>(&self, commands: &[OplCommand], mut writer: W) -> Result<()>
    where
        W: Write + Seek,
    {
        self.encode_impl(commands, &mut writer).map_err(|e| {
            error!(self.logger, "{}", e);
            e
        })
    }

    /// Encode the commands into a new byte vector
    pub fn encode_to_vec(&self, commands: &[OplCommand]) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.encode(commands, &mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Encode the commands into a new file,
    /// replacing it if it already exists
    pub fn encode_to_file(&self, commands: &[OplCommand], path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())
            .context(CreateFileSnafu)
            .map_err(|e| {
                error!(self.logger, "{}: {}", e, path.as_ref().display());
                e
            })?;
        let mut writer = BufWriter::new(file);
        self.encode(commands, &mut writer)?;
        writer.flush().context(WriteStreamSnafu)
    }

    fn encode_impl<W>(&self, input: &[OplCommand], writer: &mut W) -> Result<()>
    where
        W: Write + Seek,
    {
        let start = writer.stream_position().context(WriteStreamSnafu)?;

        write_all(&mut *writer, &FileId::V1.encoded())?;
        info!(
            self.logger,
            "OPB format {} ({})",
            u8::from(self.format),
            self.format
        );
        write_all(&mut *writer, &[u8::from(self.format)])?;

        let commands = self.normalize(input);

        if self.format == Format::Raw {
            debug!(self.logger, "Writing raw OPL data stream");
            return write_raw(&commands, writer);
        }

        // header counters are written once the body is known
        write_all(&mut *writer, &[0; 12])?;

        let mut context = EncodeContext::default();

        debug!(self.logger, "Separating OPL data stream into channels");
        let tracks = separate_tracks(commands);

        let mut output = Vec::new();
        for (channel, track) in tracks.iter().enumerate() {
            if channel < NUM_CHANNELS {
                debug!(self.logger, "Processing channel {}", channel);
                context.process_track(channel as u8, track, &mut output)?;
            } else {
                // not bound to a channel, nothing to combine
                output.extend_from_slice(track);
            }
        }

        debug!(self.logger, "Combining processed data into linear stream");
        output.sort_by_key(|command| command.order);

        if !context.instruments.is_empty() {
            debug!(self.logger, "Writing instrument table");
        }
        for instrument in context.instruments.records() {
            write_all(&mut *writer, &instrument.encoded())?;
        }

        debug!(self.logger, "Writing chunks");
        let chunk_count = context.write_chunks(&output, &mut *writer, &self.logger)?;

        debug!(self.logger, "Writing header");
        let end = writer.stream_position().context(WriteStreamSnafu)?;
        let header = Header {
            format: self.format,
            size: header_field(end - start, "file size")?,
            instrument_count: header_field(context.instruments.len() as u64, "instrument count")?,
            chunk_count,
        };
        writer
            .seek(SeekFrom::Start(start + 8))
            .context(WriteStreamSnafu)?;
        write_all(&mut *writer, &header.encoded_counters())?;
        writer.seek(SeekFrom::Start(end)).context(WriteStreamSnafu)?;

        Ok(())
    }

    /// Drop commands which would be mistaken for OPB commands
    /// and number the others.
    fn normalize(&self, input: &[OplCommand]) -> Vec<Command> {
        let mut commands = Vec::with_capacity(input.len());
        for command in input {
            if is_opb_command(command.address) {
                warning!(
                    self.logger,
                    "Illegal register 0x{:03X} with value 0x{:02X} in command stream, ignored",
                    command.address,
                    command.data
                );
                continue;
            }
            commands.push(Command {
                address: command.address,
                data: command.data,
                time: command.time,
                order: commands.len(),
                data_ref: None,
            });
        }
        commands
    }
}

/// A header counter, which must fit in 32 bits
fn header_field(value: u64, context: &'static str) -> Result<u32> {
    u32::try_from(value).context(HeaderFieldTooLargeSnafu { context })
}

fn separate_tracks(commands: Vec<Command>) -> Vec<Vec<Command>> {
    let mut tracks = vec![Vec::new(); NUM_TRACKS];
    for command in commands {
        let track = channel_of(command.address).map_or(NUM_TRACKS - 1, usize::from);
        tracks[track].push(command);
    }
    tracks
}

fn write_raw(commands: &[Command], mut writer: impl Write) -> Result<()> {
    let mut clock = 0;
    for command in commands {
        let time = time_to_ms(command.time);
        let elapsed_ms = time.saturating_sub(clock);
        let elapsed = u16::try_from(elapsed_ms)
            .ok()
            .context(ElapsedTooLargeSnafu { elapsed_ms })?;
        clock += elapsed_ms;

        let [e0, e1] = elapsed.to_be_bytes();
        let [a0, a1] = command.address.to_be_bytes();
        write_all(&mut writer, &[e0, e1, a0, a1, command.data])?;
    }
    Ok(())
}

/// State accumulated while encoding in the default format
#[derive(Debug, Default)]
struct EncodeContext {
    instruments: InstrumentTable,
    opb_commands: Vec<OpbCommand>,
}

impl EncodeContext {
    fn process_track(&mut self, channel: u8, commands: &[Command], out: &mut Vec<Command>) -> Result<()> {
        let mut start = 0;
        while start < commands.len() {
            let time = commands[start].time;

            // ranges are uninterrupted sequences at the same time,
            // closed by a note write
            let mut end = start;
            let mut last_order = commands[start].order;
            while let Some(command) = commands.get(end) {
                if end > start && (command.time > time || command.order != last_order + 1) {
                    break;
                }
                last_order = command.order;
                end += 1;
                if is_channel_note(command.address, channel) {
                    break;
                }
            }

            self.process_range(channel, time, &commands[start..end], start, out)?;
            start = end;
        }
        Ok(())
    }

    fn process_range(
        &mut self,
        channel: u8,
        time: f64,
        range: &[Command],
        start: usize,
        out: &mut Vec<Command>,
    ) -> Result<()> {
        let end = start + range.len();
        let time_ms = (time * 1000.0) as i64;

        ensure!(
            range.iter().all(|command| command.time == time),
            TimingMismatchSnafu {
                time_ms,
                channel,
                start,
                end
            }
        );

        let mut writes = RangeWrites::default();
        for command in range {
            let Some(register) = classify(command.address) else {
                out.push(*command);
                continue;
            };
            ensure!(
                register != ChannelRegister::Note || writes.note.is_none(),
                DuplicateNoteInRangeSnafu {
                    time_ms,
                    channel,
                    start,
                    end
                }
            );
            // an overwritten register keeps its earlier write as is
            if let Some(earlier) = writes.slot(register).replace(*command) {
                out.push(earlier);
            }
        }

        let instrument = writes.partial_instrument();
        if !instrument.is_empty() {
            let index = self.instruments.get_instrument(&instrument);
            let index = Uint7Plus::try_from(index).context(ValueTooLargeSnafu {
                context: "instrument index",
            })?;

            let change = InstrumentChange {
                instrument: index,
                channel,
                feed_conn: instrument.feedback.is_some(),
                mask: instrument.operator_mask(),
                mod_level: writes.modulator.level(),
                car_level: writes.carrier.level(),
            };
            let mut changes = instrument.known_count() + writes.level_count();
            let mut order = writes.instrument_order();
            let command = match (writes.freq, writes.note) {
                (Some(freq), Some(note)) => {
                    changes += 2;
                    order = order.max(freq.order).max(note.order);
                    OpbCommand::PlayInstrument {
                        change,
                        freq: freq.data,
                        note: note.data,
                    }
                }
                _ => OpbCommand::SetInstrument(change),
            };

            if command.byte_len() < changes * 2 {
                if matches!(command, OpbCommand::PlayInstrument { .. }) {
                    writes.freq = None;
                    writes.note = None;
                }
                // placed after every write it replaces,
                // so that earlier writes of the same registers stay earlier
                out.push(self.opb_command(command, time, order));
                writes.clear_instrument();
            }
        }

        if let (Some(freq), Some(note)) = (writes.freq, writes.note) {
            // the note on command has no room for the unused top bits
            if note.data & !NOTE_DATA == 0 {
                let command = OpbCommand::NoteOn {
                    channel,
                    freq: freq.data,
                    note: note.data,
                    mod_level: writes.modulator.levels.take().map(|c| c.data),
                    car_level: writes.carrier.levels.take().map(|c| c.data),
                };
                out.push(self.opb_command(command, time, note.order));
                writes.freq = None;
                writes.note = None;
            }
        }

        writes.drain_into(out);
        Ok(())
    }

    /// Keep an OPB command for the chunk writer,
    /// returning the placeholder to place in the stream.
    fn opb_command(&mut self, command: OpbCommand, time: f64, order: usize) -> Command {
        let bank = if command.is_high_bank() { BANK_BIT } else { 0 };
        let address = command.register() as u16 | bank;
        self.opb_commands.push(command);
        Command {
            address,
            data: 0,
            time,
            order,
            data_ref: Some(self.opb_commands.len() - 1),
        }
    }

    /// Write the commands as chunks, returning the number of chunks
    fn write_chunks(&self, commands: &[Command], mut writer: impl Write, logger: &Logger<'_>) -> Result<u32> {
        let mut chunk_count = 0u32;
        let mut clock = 0;
        let mut start = 0;
        while start < commands.len() {
            let chunk_time = commands[start].time;
            let end = commands[start..]
                .iter()
                .position(|command| command.time > chunk_time)
                .map_or(commands.len(), |offset| start + offset);

            // measured from the rounded absolute time rather than the previous chunk's time,
            // so rounding errors do not add up over the stream
            let elapsed = time_to_ms(chunk_time).saturating_sub(clock);
            clock += elapsed;
            trace!(logger, "Chunk at {} ms with {} commands", clock, end - start);

            self.write_chunk(elapsed, &commands[start..end], &mut writer)?;
            chunk_count += 1;
            start = end;
        }
        Ok(chunk_count)
    }

    fn write_chunk(&self, elapsed: u64, commands: &[Command], mut writer: impl Write) -> Result<()> {
        let hi_count = commands
            .iter()
            .filter(|command| command.address & BANK_BIT != 0)
            .count();
        let lo_count = commands.len() - hi_count;

        let header = ChunkHeader {
            time_elapsed: u32::try_from(elapsed)
                .ok()
                .and_then(|elapsed| Uint7Plus::try_from(elapsed).ok())
                .context(ElapsedTooLargeSnafu {
                    elapsed_ms: elapsed,
                })?,
            opl_command_count_lo: Uint7Plus::try_from(lo_count).context(ValueTooLargeSnafu {
                context: "chunk low command count",
            })?,
            opl_command_count_hi: Uint7Plus::try_from(hi_count).context(ValueTooLargeSnafu {
                context: "chunk high command count",
            })?,
        };
        header.write_to(&mut writer)?;

        // low bank first, then high bank
        for high in [false, true] {
            for command in commands
                .iter()
                .filter(|command| (command.address & BANK_BIT != 0) == high)
            {
                match (is_opb_command(command.address), command.data_ref) {
                    (false, None) => OpbCommand::from(RegisterWrite {
                        register: command.address as u8,
                        data: command.data,
                    })
                    .write_to(&mut writer)?,
                    (true, Some(index)) => {
                        let opb = self
                            .opb_commands
                            .get(index)
                            .filter(|opb| opb.register() == command.address as u8)
                            .context(PayloadMismatchSnafu {
                                address: command.address,
                            })?;
                        opb.write_to(&mut writer)?;
                    }
                    _ => {
                        return PayloadMismatchSnafu {
                            address: command.address,
                        }
                        .fail()
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opb::Error;
    use std::cell::RefCell;

    fn cmd(address: u16, data: u8, time: f64) -> OplCommand {
        OplCommand::new(address, data, time)
    }

    /// Bytes after the header and instrument table
    fn body(bytes: &[u8]) -> &[u8] {
        let instruments = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        &bytes[20 + 9 * instruments as usize..]
    }

    #[test]
    fn plain_writes_stay_plain() {
        let commands = [cmd(0x20, 0x01, 0.0), cmd(0x23, 0x02, 0.0), cmd(0xB0, 0x31, 0.0)];
        let bytes = Encoder::new(Format::Default).encode_to_vec(&commands).unwrap();

        assert_eq!(&bytes[..8], b"OPBin1\0\0");
        // size, 1 instrument (created, not referenced), 1 chunk
        assert_eq!(&bytes[8..12], (bytes.len() as u32).to_be_bytes());
        assert_eq!(&bytes[12..16], [0, 0, 0, 1]);
        assert_eq!(&bytes[16..20], [0, 0, 0, 1]);
        assert_eq!(&bytes[20..29], [0, 0x01, 0, 0, 0, 0x02, 0, 0, 0]);
        assert_eq!(
            body(&bytes),
            [0, 3, 0, 0x20, 0x01, 0x23, 0x02, 0xB0, 0x31]
        );
    }

    #[test]
    fn instrument_change_is_compressed() {
        // 4 operator properties and feedback on channel 1
        let commands = [
            cmd(0x21, 0x01, 0.5),
            cmd(0x61, 0xF2, 0.5),
            cmd(0x81, 0x53, 0.5),
            cmd(0xE1, 0x00, 0.5),
            cmd(0xC1, 0x0E, 0.5),
        ];
        let bytes = Encoder::new(Format::Default).encode_to_vec(&commands).unwrap();
        assert_eq!(&bytes[12..16], [0, 0, 0, 1]);
        assert_eq!(&bytes[20..29], [0x0E, 0x01, 0xF2, 0x53, 0x00, 0, 0, 0, 0]);
        assert_eq!(
            body(&bytes),
            [
                // 500 ms, one low command
                0xF4, 0x03, 0x01, 0x00,
                // set instrument 0 on channel 1 with feedback, modulator mask
                0xD0, 0x00, 0x81, 0x0F,
            ]
        );
    }

    #[test]
    fn frequency_and_note_become_note_on() {
        let commands = [
            cmd(0x1A2, 0x44, 0.0),
            cmd(0x145, 0x10, 0.0),
            cmd(0x1B2, 0x31, 0.0),
        ];
        let bytes = Encoder::new(Format::Default).encode_to_vec(&commands).unwrap();
        assert_eq!(&bytes[12..16], [0, 0, 0, 0]);
        // channel 11: high bank, note on 0xD9 with the carrier level
        assert_eq!(
            body(&bytes),
            [0, 0, 1, 0xD9, 0x44, 0x31 | 0x80, 0x10]
        );
    }

    #[test]
    fn overwritten_register_keeps_the_last_value() {
        // channel 1 carrier: level, characteristic twice, sustain/release
        let commands = [
            cmd(0x44, 0x03, 0.0),
            cmd(0x24, 0x84, 0.0),
            cmd(0x84, 0x03, 0.0),
            cmd(0x24, 0x01, 0.0),
        ];
        let bytes = Encoder::new(Format::Default).encode_to_vec(&commands).unwrap();
        // the stale write goes first, then the instrument command
        assert_eq!(
            body(&bytes),
            [0, 2, 0, 0x24, 0x84, 0xD0, 0x00, 0x41, 0x50, 0x03]
        );

        let decoded = crate::decoder::decode_to_vec(&bytes).unwrap();
        let last_24 = decoded.iter().rev().find(|c| c.address == 0x24).map(|c| c.data);
        assert_eq!(last_24, Some(0x01));
        assert_eq!(
            decoded.iter().map(|c| (c.address, c.data)).collect::<Vec<_>>(),
            [(0x24, 0x84), (0x24, 0x01), (0x44, 0x03), (0x84, 0x03)]
        );
    }

    #[test]
    fn header_counters_must_fit_in_32_bits() {
        assert_eq!(header_field(20, "file size").unwrap(), 20);
        assert!(matches!(
            header_field(u64::from(u32::MAX) + 1, "file size"),
            Err(Error::HeaderFieldTooLarge { context: "file size", .. })
        ));
    }

    #[test]
    fn note_with_top_bits_is_not_folded() {
        let commands = [cmd(0xA0, 0x44, 0.0), cmd(0xB0, 0xF1, 0.0)];
        let bytes = Encoder::new(Format::Default).encode_to_vec(&commands).unwrap();
        assert_eq!(body(&bytes), [0, 2, 0, 0xA0, 0x44, 0xB0, 0xF1]);
    }

    #[test]
    fn same_time_is_one_chunk() {
        let commands = [cmd(0x01, 0x20, 0.25), cmd(0x105, 0x01, 0.25), cmd(0xBD, 0x00, 0.5)];
        let bytes = Encoder::new(Format::Default).encode_to_vec(&commands).unwrap();
        assert_eq!(&bytes[16..20], [0, 0, 0, 2]);
        assert_eq!(
            body(&bytes),
            [
                0xFA, 0x01, 0x01, 0x01, 0x01, 0x20, 0x05, 0x01,
                0xFA, 0x01, 0x01, 0x00, 0xBD, 0x00,
            ]
        );
    }

    #[test]
    fn illegal_registers_are_dropped_with_a_warning() {
        let messages = RefCell::new(Vec::new());
        let encoder = Encoder::new(Format::Default)
            .with_logger(|level: log::Level, msg: &str| {
                messages.borrow_mut().push((level, msg.to_string()))
            });
        let bytes = encoder
            .encode_to_vec(&[cmd(0x1D3, 0x01, 0.0), cmd(0x01, 0x20, 0.0)])
            .unwrap();
        assert_eq!(body(&bytes), [0, 1, 0, 0x01, 0x20]);
        drop(encoder);

        let messages = messages.into_inner();
        assert!(messages
            .iter()
            .any(|(level, msg)| *level == log::Level::Warn && msg.contains("0x1D3")));
    }

    #[test]
    fn two_notes_in_one_range_fail() {
        // the second note cannot start a new range
        // since a note write always closes one,
        // so build the range by hand
        let mut context = EncodeContext::default();
        let range = [
            Command { address: 0xB0, data: 0x20, time: 0.0, order: 0, data_ref: None },
            Command { address: 0xB0, data: 0x31, time: 0.0, order: 1, data_ref: None },
        ];
        let mut out = Vec::new();
        assert!(matches!(
            context.process_range(0, 0.0, &range, 0, &mut out),
            Err(Error::DuplicateNoteInRange { channel: 0, start: 0, end: 2, .. })
        ));
    }

    #[test]
    fn timing_mismatch_fails() {
        let mut context = EncodeContext::default();
        let range = [
            Command { address: 0x20, data: 0x01, time: 0.0, order: 0, data_ref: None },
            Command { address: 0x40, data: 0x01, time: 0.1, order: 1, data_ref: None },
        ];
        let mut out = Vec::new();
        assert!(matches!(
            context.process_range(0, 0.0, &range, 0, &mut out),
            Err(Error::TimingMismatch { channel: 0, .. })
        ));
    }

    #[test]
    fn earlier_time_out_of_order_is_a_timing_mismatch() {
        let commands = [cmd(0x20, 0x01, 1.0), cmd(0x40, 0x3F, 0.5)];
        let result = Encoder::new(Format::Default).encode_to_vec(&commands);
        assert!(matches!(result, Err(Error::TimingMismatch { time_ms: 1000, .. })));
    }

    #[test]
    fn raw_format_records() {
        let commands = [cmd(0x20, 0x01, 0.0), cmd(0x1B0, 0x31, 0.0015), cmd(0xD0, 0, 0.5)];
        let bytes = Encoder::new(Format::Raw).encode_to_vec(&commands).unwrap();
        assert_eq!(
            bytes,
            [
                b'O', b'P', b'B', b'i', b'n', b'1', 0, 1,
                0x00, 0x00, 0x00, 0x20, 0x01,
                0x00, 0x02, 0x01, 0xB0, 0x31,
            ]
        );
    }

    #[test]
    fn raw_format_rejects_long_pauses() {
        let commands = [cmd(0x20, 0x01, 0.0), cmd(0x20, 0x02, 70.0)];
        assert!(matches!(
            Encoder::new(Format::Raw).encode_to_vec(&commands),
            Err(Error::ElapsedTooLarge { elapsed_ms: 70_000 })
        ));
    }

    #[test]
    fn header_is_relative_to_the_start_position() {
        let mut cursor = Cursor::new(b"junk".to_vec());
        cursor.seek(SeekFrom::End(0)).unwrap();
        Encoder::default()
            .encode(&[cmd(0x01, 0x20, 0.0)], &mut cursor)
            .unwrap();
        assert_eq!(cursor.position(), cursor.get_ref().len() as u64);

        let bytes = cursor.into_inner();
        assert_eq!(&bytes[..4], b"junk");
        let opb = &bytes[4..];
        assert_eq!(&opb[8..12], (opb.len() as u32).to_be_bytes());
    }

    #[test]
    fn encoding_is_deterministic() {
        let commands: Vec<_> = (0..40)
            .map(|i| cmd(0x20 + (i % 6) as u16, i as u8, (i / 5) as f64 * 0.01))
            .collect();
        let encoder = Encoder::default();
        assert_eq!(
            encoder.encode_to_vec(&commands).unwrap(),
            encoder.encode_to_vec(&commands).unwrap()
        );
    }
}
