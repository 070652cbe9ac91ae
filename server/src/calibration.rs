use crate::error::CalibrationError;
use crate::transport::RegisterTransport;

// cf. BME280 datasheet, section 4.2.2 "Trimming parameter readout"
const REG_CALIB_00: u8 = 0x88;
const REG_CALIB_25: u8 = 0xA1;
const REG_CALIB_26: u8 = 0xE1;
pub const REG_CALIB_00_LEN: usize = 24;
pub const REG_CALIB_26_LEN: usize = 7;

/// Factory trimming coefficients of one device.
///
/// Only [`CalibrationData::load`] produces these from a live device, and nothing
/// mutates them afterwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationData {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i16,

    pub dig_p1: u16,
    pub dig_p2: i16,
    pub dig_p3: i16,
    pub dig_p4: i16,
    pub dig_p5: i16,
    pub dig_p6: i16,
    pub dig_p7: i16,
    pub dig_p8: i16,
    pub dig_p9: i16,

    pub dig_h1: u8,
    pub dig_h2: i16,
    pub dig_h3: u8,
    pub dig_h4: i16,
    pub dig_h5: i16,
    pub dig_h6: i8,
}

impl CalibrationData {
    /// Reads all coefficients. Nothing is returned unless every read succeeded.
    pub fn load<T: RegisterTransport + ?Sized>(
        transport: &mut T,
    ) -> Result<Self, CalibrationError> {
        let mut block0 = [0; REG_CALIB_00_LEN];
        transport.read_block(REG_CALIB_00, &mut block0)?;
        let h1 = transport.read_byte(REG_CALIB_25)?;
        let mut block1 = [0; REG_CALIB_26_LEN];
        transport.read_block(REG_CALIB_26, &mut block1)?;

        let calib = Self::from_registers(&block0, h1, &block1);
        debug!("Calibration coefficients: {:?}", calib);
        Ok(calib)
    }

    /// Decodes the raw contents of 0x88..0x9F, 0xA1 and 0xE1..0xE7
    pub fn from_registers(
        block0: &[u8; REG_CALIB_00_LEN],
        h1: u8,
        block1: &[u8; REG_CALIB_26_LEN],
    ) -> Self {
        let unsigned = |i: usize| u16::from_le_bytes([block0[i], block0[i + 1]]);
        let signed = |i: usize| i16::from_le_bytes([block0[i], block0[i + 1]]);

        Self {
            dig_t1: unsigned(0),
            dig_t2: signed(2),
            dig_t3: signed(4),

            dig_p1: unsigned(6),
            dig_p2: signed(8),
            dig_p3: signed(10),
            dig_p4: signed(12),
            dig_p5: signed(14),
            dig_p6: signed(16),
            dig_p7: signed(18),
            dig_p8: signed(20),
            dig_p9: signed(22),

            dig_h1: h1,
            dig_h2: i16::from_le_bytes([block1[0], block1[1]]),
            dig_h3: block1[2],
            // 0xE5 is shared: low nibble belongs to H4, high nibble to H5
            dig_h4: (i16::from(block1[3]) << 4) | i16::from(block1[4] & 0x0F),
            dig_h5: (i16::from(block1[5]) << 4) | i16::from((block1[4] >> 4) & 0x0F),
            dig_h6: block1[6] as i8,
        }
    }
}
