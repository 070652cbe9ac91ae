use crate::error::{BusError, BusOp};
use crate::transport::RegisterTransport;

// Datasheet example trimming values for T and P, typical values for H
pub const CALIB_00: [u8; 24] = [
    0x70, 0x6b, 0x43, 0x67, 0x18, 0xfc,
    0x7d, 0x8e, 0x43, 0xd6, 0xd0, 0x0b, 0x27, 0x0b, 0x8c, 0x00,
    0xf9, 0xff, 0x8c, 0x3c, 0xf8, 0xc6, 0x70, 0x17,
];
pub const CALIB_25: u8 = 75;
pub const CALIB_26: [u8; 7] = [0x6a, 0x01, 0x00, 0x13, 0x29, 0x03, 0x1e];
/// press_msb..hum_lsb for adc_P = 415148, adc_T = 519888, adc_H = 30000
pub const ADC_VALUES: [u8; 8] = [0x65, 0x5a, 0xc0, 0x7e, 0xed, 0x00, 0x75, 0x30];

const ADC_T_BIAS: f32 = 519888.;
// About 3 °C with the calibration above
const ADC_T_AMPLITUDE: f32 = 9500.;

/// A BME280 without hardware. The temperature follows a slow sine wave, one step
/// per temperature read.
pub struct SimulatedBme280 {
    registers: [u8; 256],
    t: f32,
}

impl SimulatedBme280 {
    pub fn new() -> Self {
        let mut registers = [0; 256];
        registers[0x88..0x88 + CALIB_00.len()].copy_from_slice(&CALIB_00);
        registers[0xA1] = CALIB_25;
        registers[0xE1..0xE1 + CALIB_26.len()].copy_from_slice(&CALIB_26);
        registers[0xD0] = 0x60;
        registers[0xF7..0xF7 + ADC_VALUES.len()].copy_from_slice(&ADC_VALUES);

        Self {registers, t: 0.}
    }

    fn step_temperature(&mut self) {
        let adc_t = (self.t.sin() * ADC_T_AMPLITUDE + ADC_T_BIAS) as u32;
        self.registers[0xFA] = (adc_t >> 12) as u8;
        self.registers[0xFB] = (adc_t >> 4) as u8;
        self.registers[0xFC] = ((adc_t & 0x0F) << 4) as u8;
        self.t += 0.3;
    }
}

impl RegisterTransport for SimulatedBme280 {
    fn read_block(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        let start = register as usize;
        let end = start + buffer.len();
        if end > self.registers.len() {
            return Err(BusError::new(register, BusOp::ReadBlock, "read past the last register"));
        }
        if start == 0xFA {
            self.step_temperature();
        }
        buffer.copy_from_slice(&self.registers[start..end]);
        Ok(())
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.registers[register as usize] = value;
        Ok(())
    }
}
