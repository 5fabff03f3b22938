//! OPL command module
//!

/// A data structure representing a raw OPL3 register write
/// at a point in time.
///
/// This is the input of the OPB encoder
/// and the output of the OPB decoder.
#[derive(Copy, Clone, PartialEq)]
pub struct OplCommand {
    /// the OPL register to write to
    /// (bit 8 selects the high bank)
    pub address: u16,
    /// the data to write to the register
    pub data: u8,
    /// the time of the write, in seconds
    pub time: f64,
}

impl OplCommand {
    pub fn new(address: u16, data: u8, time: f64) -> Self {
        OplCommand {
            address,
            data,
            time,
        }
    }

    /// The time of the write, rounded to whole milliseconds
    pub fn time_ms(&self) -> u64 {
        (self.time * 1000.0).round() as u64
    }
}

/// Debug implementation overridden to
/// always write in hexadecimal and in a single line
impl core::fmt::Debug for OplCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "OplCommand {{ address: {:03X}, data: 0x{:02X}, time: {:.3} }}",
            self.address, self.data, self.time
        )
    }
}
