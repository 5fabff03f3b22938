//! Helper module for OPL register addresses
//! and the channel/operator topology of the OPL3 register file.
//!
//! Register addresses are 9 bits wide:
//! bit 8 selects the bank (`0x0xx` or `0x1xx`),
//! the lower 8 bits select the register within the bank.

use core::ops::RangeInclusive;

/// Number of playable channels (9 per bank)
pub const NUM_CHANNELS: usize = 18;

/// Number of operators (2 per channel)
pub const NUM_OPERATORS: usize = 36;

/// Bank selection bit of a register address
pub const BANK_BIT: u16 = 0x100;

/// Test LSI / Enable waveform control
pub const TEST_LSI: u8 = 0x01;

/// Timer 1 data
pub const TIMER1_DATA: u8 = 0x02;

/// Timer 2 data
pub const TIMER2_DATA: u8 = 0x03;

/// Timer control flags
pub const TIMER_CONTROL: u8 = 0x04;

/// OPL3 mode enable (high bank) / 4-op connection select
pub const OPL3_MODE: u8 = 0x05;

/// Speech synthesis mode / Keyboard split note select
pub const SPEECH_SYNTHESIS: u8 = 0x08;

/// Amp Mod / Vibrato / EG type / Key Scaling / Multiple
pub const CHARACTERISTIC: u8 = 0x20;
pub const CHARACTERISTIC_RANGE: RangeInclusive<u8> = 0x20..=0x35;

/// Key scaling level / Operator output level
pub const LEVELS: u8 = 0x40;
pub const LEVELS_RANGE: RangeInclusive<u8> = 0x40..=0x55;

/// Attack Rate / Decay Rate
pub const ATTACK_DECAY: u8 = 0x60;
pub const ATTACK_DECAY_RANGE: RangeInclusive<u8> = 0x60..=0x75;

/// Sustain Level / Release Rate
pub const SUSTAIN_RELEASE: u8 = 0x80;
pub const SUSTAIN_RELEASE_RANGE: RangeInclusive<u8> = 0x80..=0x95;

/// Frequency (low 8 bits)
pub const FREQUENCY: u8 = 0xA0;
pub const FREQUENCY_RANGE: RangeInclusive<u8> = 0xA0..=0xA8;

/// Key On / Octave / Frequency (high 2 bits)
pub const NOTE: u8 = 0xB0;
pub const NOTE_RANGE: RangeInclusive<u8> = 0xB0..=0xB8;

///  AM depth / Vibrato depth / Rhythm control
pub const AM_VIBRATO_RHYTHM: u8 = 0xBD;

/// Feedback strength / Connection type
pub const FEEDBACK_CONNECTION: u8 = 0xC0;
pub const FEEDBACK_CONNECTION_RANGE: RangeInclusive<u8> = 0xC0..=0xC8;

/// Wave Select
pub const WAVE_SELECT: u8 = 0xE0;
pub const WAVE_SELECT_RANGE: RangeInclusive<u8> = 0xE0..=0xF5;

/// OPB-specific: Set instrument
pub const OPB_SET_INSTRUMENT: u8 = 0xD0;

/// OPB-specific: Play instrument
pub const OPB_PLAY_INSTRUMENT: u8 = 0xD1;

/// OPB-specific: first of the 9 combined note commands
pub const OPB_NOTE_ON: u8 = 0xD7;

/// Register range reserved by the OPB format for its own commands
pub const OPB_RESERVED_RANGE: RangeInclusive<u8> = 0xD0..=0xDF;

/// Register offset of every operator,
/// operators 18 to 35 living in the high bank.
pub const OPERATOR_OFFSETS: [u16; NUM_OPERATORS] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x008, 0x009, 0x00A, 0x00B, 0x00C, 0x00D, 0x010,
    0x011, 0x012, 0x013, 0x014, 0x015, 0x100, 0x101, 0x102, 0x103, 0x104, 0x105, 0x108, 0x109,
    0x10A, 0x10B, 0x10C, 0x10D, 0x110, 0x111, 0x112, 0x113, 0x114, 0x115,
];

/// Index into [`OPERATOR_OFFSETS`] of each channel's modulator.
/// The carrier is always 3 register offsets above.
pub const CHANNEL_TO_OPERATOR: [usize; NUM_CHANNELS] = [
    0, 1, 2, 6, 7, 8, 12, 13, 14, 18, 19, 20, 24, 25, 26, 30, 31, 32,
];

/// Register offset of the per-channel registers
/// (frequency, note, feedback/connection) of each channel
pub const CHANNEL_TO_OFFSET: [u16; NUM_CHANNELS] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x006, 0x007, 0x008, 0x100, 0x101, 0x102, 0x103,
    0x104, 0x105, 0x106, 0x107, 0x108,
];

/// One of the two operators of a channel
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OperatorRole {
    /// Operator 1
    Modulator,
    /// Operator 2
    Carrier,
}

/// Classification of a register write
/// with respect to the channel it affects.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ChannelRegister {
    Characteristic(OperatorRole),
    Levels(OperatorRole),
    AttackDecay(OperatorRole),
    SustainRelease(OperatorRole),
    WaveSelect(OperatorRole),
    Frequency,
    Note,
    FeedbackConnection,
}

/// Whether the register is reserved for OPB-specific commands.
/// The bank bit is ignored.
pub fn is_opb_command(register: u16) -> bool {
    OPB_RESERVED_RANGE.contains(&(register as u8))
}

fn is_operator_register(register: u8) -> bool {
    (0x20..=0x95).contains(&register) || WAVE_SELECT_RANGE.contains(&register)
}

/// Map an operator register offset (`0x00..=0x15`, plus bank bit)
/// to its channel.
fn operator_offset_to_channel(offset: u16) -> Option<u8> {
    let base = offset & 0xFF;
    let block = base / 8;
    let sub = base % 8;
    if block >= 3 || sub >= 6 {
        return None;
    }
    let bank = if offset & BANK_BIT != 0 { 9 } else { 0 };
    Some((block * 3 + sub % 3 + bank) as u8)
}

/// The channel (0 to 17) affected by a register write,
/// or `None` for global registers and unused addresses.
pub fn channel_of(register: u16) -> Option<u8> {
    let base = register as u8;
    let bank = register & BANK_BIT;
    if is_operator_register(base) {
        let offset = (base % 0x20) as u16;
        if offset >= 0x16 {
            return None;
        }
        operator_offset_to_channel(offset | bank)
    } else if (0xA0..=0xB8).contains(&base) || FEEDBACK_CONNECTION_RANGE.contains(&base) {
        let channel = base % 0x10;
        if channel >= 9 {
            return None;
        }
        Some(if bank != 0 { channel + 9 } else { channel })
    } else {
        None
    }
}

/// The operator affected by a register write,
/// or `None` if the register is not an operator register.
pub fn operator_role_of(register: u16) -> Option<OperatorRole> {
    let base = register as u8;
    if !is_operator_register(base) {
        return None;
    }
    let offset = base % 0x20;
    if offset >= 0x16 {
        return None;
    }
    match offset % 8 {
        0..=2 => Some(OperatorRole::Modulator),
        3..=5 => Some(OperatorRole::Carrier),
        _ => None,
    }
}

/// Classify a register write affecting a channel.
///
/// Registers which do not belong to a channel
/// (and malformed operator offsets) yield `None`.
pub fn classify(register: u16) -> Option<ChannelRegister> {
    channel_of(register)?;
    let base = register as u8;
    if let Some(role) = operator_role_of(register) {
        return match base {
            r if CHARACTERISTIC_RANGE.contains(&r) => Some(ChannelRegister::Characteristic(role)),
            r if LEVELS_RANGE.contains(&r) => Some(ChannelRegister::Levels(role)),
            r if ATTACK_DECAY_RANGE.contains(&r) => Some(ChannelRegister::AttackDecay(role)),
            r if SUSTAIN_RELEASE_RANGE.contains(&r) => Some(ChannelRegister::SustainRelease(role)),
            r if WAVE_SELECT_RANGE.contains(&r) => Some(ChannelRegister::WaveSelect(role)),
            _ => None,
        };
    }
    match base {
        r if FREQUENCY_RANGE.contains(&r) => Some(ChannelRegister::Frequency),
        r if NOTE_RANGE.contains(&r) => Some(ChannelRegister::Note),
        r if FEEDBACK_CONNECTION_RANGE.contains(&r) => Some(ChannelRegister::FeedbackConnection),
        _ => None,
    }
}

/// Whether the register is the note register of the given channel
pub fn is_channel_note(register: u16, channel: u8) -> bool {
    channel < NUM_CHANNELS as u8 && register == NOTE as u16 + CHANNEL_TO_OFFSET[channel as usize]
}

/// Register offset of the channel's modulator
/// (add 3 for the carrier)
pub fn modulator_offset(channel: u8) -> u16 {
    OPERATOR_OFFSETS[CHANNEL_TO_OPERATOR[channel as usize]]
}

/// Register offset of the given operator of a channel
pub fn operator_offset(channel: u8, role: OperatorRole) -> u16 {
    match role {
        OperatorRole::Modulator => modulator_offset(channel),
        OperatorRole::Carrier => modulator_offset(channel) + 3,
    }
}

/// Register offset of the channel's per-channel registers
pub fn channel_offset(channel: u8) -> u16 {
    CHANNEL_TO_OFFSET[channel as usize]
}

/// Check whether the given OPL register address is valid
/// (bank bit ignored)
pub fn is_valid_opl_register(register: u8) -> bool {
    match register {
        TEST_LSI | TIMER1_DATA | TIMER2_DATA | TIMER_CONTROL | OPL3_MODE | SPEECH_SYNTHESIS
        | AM_VIBRATO_RHYTHM => true,
        r if CHARACTERISTIC_RANGE.contains(&r) => true,
        r if LEVELS_RANGE.contains(&r) => true,
        r if ATTACK_DECAY_RANGE.contains(&r) => true,
        r if SUSTAIN_RELEASE_RANGE.contains(&r) => true,
        r if FREQUENCY_RANGE.contains(&r) => true,
        r if NOTE_RANGE.contains(&r) => true,
        r if FEEDBACK_CONNECTION_RANGE.contains(&r) => true,
        r if WAVE_SELECT_RANGE.contains(&r) => true,
        _ => false,
    }
}
