//! Instrument matching for the encoder.
//!
//! Each range of register writes on a channel describes
//! a partial instrument: only some of its properties are known.
//! Partial instruments are merged into a table
//! whenever their known properties do not conflict,
//! so that the table stays small.

use crate::opb::{
    Instrument, Operator, MASK_CAR_ATTACK_DECAY, MASK_CAR_CHARACTERISTIC,
    MASK_CAR_SUSTAIN_RELEASE, MASK_CAR_WAVE_SELECT, MASK_MOD_ATTACK_DECAY,
    MASK_MOD_CHARACTERISTIC, MASK_MOD_SUSTAIN_RELEASE, MASK_MOD_WAVE_SELECT,
};

/// Two properties conflict only if both are known and differ.
fn compatible(known: Option<u8>, wanted: Option<u8>) -> bool {
    match (known, wanted) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Operator properties, each of which may be unknown
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PartialOperator {
    pub characteristic: Option<u8>,
    pub attack_decay: Option<u8>,
    pub sustain_release: Option<u8>,
    pub wave_select: Option<u8>,
}

impl PartialOperator {
    fn fields(&self) -> [Option<u8>; 4] {
        [
            self.characteristic,
            self.attack_decay,
            self.sustain_release,
            self.wave_select,
        ]
    }

    pub fn can_combine(&self, other: &PartialOperator) -> bool {
        self.fields()
            .into_iter()
            .zip(other.fields())
            .all(|(known, wanted)| compatible(known, wanted))
    }

    /// Take every property known to `other`
    pub fn merge(&mut self, other: &PartialOperator) {
        self.characteristic = other.characteristic.or(self.characteristic);
        self.attack_decay = other.attack_decay.or(self.attack_decay);
        self.sustain_release = other.sustain_release.or(self.sustain_release);
        self.wave_select = other.wave_select.or(self.wave_select);
    }

    pub fn known_count(&self) -> usize {
        self.fields().iter().filter(|f| f.is_some()).count()
    }

    /// The operator record, with unknown properties set to 0
    pub fn to_record(&self) -> Operator {
        Operator {
            characteristic: self.characteristic.unwrap_or(0),
            attack_decay: self.attack_decay.unwrap_or(0),
            sustain_release: self.sustain_release.unwrap_or(0),
            wave_select: self.wave_select.unwrap_or(0),
        }
    }
}

/// An instrument of which only some properties are known
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PartialInstrument {
    pub feedback: Option<u8>,
    pub modulator: PartialOperator,
    pub carrier: PartialOperator,
}

impl PartialInstrument {
    /// Number of known properties
    pub fn known_count(&self) -> usize {
        self.feedback.is_some() as usize + self.modulator.known_count() + self.carrier.known_count()
    }

    pub fn is_empty(&self) -> bool {
        self.known_count() == 0
    }

    pub fn can_combine(&self, other: &PartialInstrument) -> bool {
        compatible(self.feedback, other.feedback)
            && self.modulator.can_combine(&other.modulator)
            && self.carrier.can_combine(&other.carrier)
    }

    /// Take every property known to `other`
    pub fn merge(&mut self, other: &PartialInstrument) {
        self.feedback = other.feedback.or(self.feedback);
        self.modulator.merge(&other.modulator);
        self.carrier.merge(&other.carrier);
    }

    /// The instrument mask selecting the known operator properties
    pub fn operator_mask(&self) -> u8 {
        let bits = [
            (self.modulator.characteristic, MASK_MOD_CHARACTERISTIC),
            (self.modulator.attack_decay, MASK_MOD_ATTACK_DECAY),
            (self.modulator.sustain_release, MASK_MOD_SUSTAIN_RELEASE),
            (self.modulator.wave_select, MASK_MOD_WAVE_SELECT),
            (self.carrier.characteristic, MASK_CAR_CHARACTERISTIC),
            (self.carrier.attack_decay, MASK_CAR_ATTACK_DECAY),
            (self.carrier.sustain_release, MASK_CAR_SUSTAIN_RELEASE),
            (self.carrier.wave_select, MASK_CAR_WAVE_SELECT),
        ];
        bits.iter()
            .filter(|(field, _)| field.is_some())
            .fold(0, |mask, (_, bit)| mask | bit)
    }

    /// The instrument record, with unknown properties set to 0
    pub fn to_record(&self) -> Instrument {
        Instrument {
            feedback: self.feedback.unwrap_or(0),
            modulator: self.modulator.to_record(),
            carrier: self.carrier.to_record(),
        }
    }
}

/// The table of instruments accumulated while encoding
#[derive(Debug, Default, Clone)]
pub struct InstrumentTable {
    instruments: Vec<PartialInstrument>,
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the index of an instrument compatible with `wanted`,
    /// merging `wanted` into it.
    /// The oldest compatible instrument wins;
    /// if there is none, `wanted` is appended to the table.
    pub fn get_instrument(&mut self, wanted: &PartialInstrument) -> usize {
        if let Some((index, instrument)) = self
            .instruments
            .iter_mut()
            .enumerate()
            .find(|(_, instrument)| instrument.can_combine(wanted))
        {
            instrument.merge(wanted);
            return index;
        }

        self.instruments.push(*wanted);
        self.instruments.len() - 1
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// The records to write to the instrument table, in index order
    pub fn records(&self) -> impl Iterator<Item = Instrument> + '_ {
        self.instruments.iter().map(PartialInstrument::to_record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_mod_characteristic(value: u8) -> PartialInstrument {
        PartialInstrument {
            modulator: PartialOperator {
                characteristic: Some(value),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn unknown_properties_never_conflict() {
        let a = with_mod_characteristic(0x21);
        let b = PartialInstrument {
            feedback: Some(0x30),
            ..Default::default()
        };
        assert!(a.can_combine(&b));
        assert!(b.can_combine(&a));
        assert!(a.can_combine(&PartialInstrument::default()));
    }

    #[test]
    fn conflicting_properties() {
        let a = with_mod_characteristic(0x21);
        let b = with_mod_characteristic(0x22);
        assert!(!a.can_combine(&b));

        // carrier wave select is compared like every other property
        let mut c = PartialInstrument::default();
        c.carrier.wave_select = Some(1);
        let mut d = PartialInstrument::default();
        d.carrier.wave_select = Some(2);
        assert!(!c.can_combine(&d));
        d.carrier.wave_select = Some(1);
        assert!(c.can_combine(&d));
    }

    #[test]
    fn merge_takes_known_properties() {
        let mut a = with_mod_characteristic(0x21);
        let mut b = PartialInstrument {
            feedback: Some(0x30),
            ..Default::default()
        };
        b.carrier.attack_decay = Some(0xF0);
        a.merge(&b);
        assert_eq!(a.feedback, Some(0x30));
        assert_eq!(a.modulator.characteristic, Some(0x21));
        assert_eq!(a.carrier.attack_decay, Some(0xF0));
        assert_eq!(a.known_count(), 3);
    }

    #[test]
    fn mask_and_record() {
        let mut a = with_mod_characteristic(0x21);
        a.carrier.wave_select = Some(3);
        assert_eq!(a.operator_mask(), MASK_MOD_CHARACTERISTIC | MASK_CAR_WAVE_SELECT);
        assert_eq!(
            a.to_record().encoded(),
            [0, 0x21, 0, 0, 0, 0, 0, 0, 3]
        );
    }

    #[test]
    fn table_reuses_oldest_compatible_instrument() {
        let mut table = InstrumentTable::new();
        assert!(table.is_empty());
        assert!(PartialInstrument::default().is_empty());
        assert_eq!(table.get_instrument(&with_mod_characteristic(0x21)), 0);
        assert_eq!(table.get_instrument(&with_mod_characteristic(0x22)), 1);
        assert_eq!(table.get_instrument(&with_mod_characteristic(0x22)), 1);

        // compatible with both, the oldest one is picked and extended
        let feedback = PartialInstrument {
            feedback: Some(0x0E),
            ..Default::default()
        };
        assert_eq!(table.get_instrument(&feedback), 0);
        assert_eq!(table.len(), 2);
        let records: Vec<_> = table.records().collect();
        assert_eq!(records[0].feedback, 0x0E);
        assert_eq!(records[1].feedback, 0);

        // conflicts with the merged feedback of instrument 0
        let other = PartialInstrument {
            feedback: Some(0x01),
            modulator: PartialOperator {
                characteristic: Some(0x21),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(table.get_instrument(&other), 2);

        let records: Vec<_> = table.records().collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].feedback, 0x0E);
        assert_eq!(records[1].modulator.characteristic, 0x22);
    }
}
