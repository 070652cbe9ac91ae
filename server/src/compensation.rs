//! Integer compensation formulas from the BME280 datasheet, section 4.2.3 and 8.2.
//!
//! The order of operations, truncating shifts and the widths of intermediates
//! match the reference code exactly; do not "simplify" any expression here.

use crate::calibration::CalibrationData;

/// Upper bound of the humidity accumulator, 100 %RH in Q22.10 before the final shift
pub const HUMIDITY_MAX: i64 = 419_430_400;

/// Largest pressure reported. `u32::MAX` marks a missing pressure in packets.
pub const PRESSURE_MAX: u32 = u32::MAX - 1;

/// Fine resolution temperature shared by the three formulas of one measurement.
///
/// Only [`compensate_temperature`] creates this, so pressure and humidity can not be
/// compensated with a value from some other cycle by accident.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FineTemperature(i32);

impl FineTemperature {
    pub fn value(self) -> i32 {
        self.0
    }
}

/// Returns the temperature in 0.01 °C, e.g. 5123 for 51.23 °C
pub fn compensate_temperature(adc_t: i32, calib: &CalibrationData) -> (i32, FineTemperature) {
    let t1 = i32::from(calib.dig_t1);
    let t2 = i32::from(calib.dig_t2);
    let t3 = i32::from(calib.dig_t3);

    // i32 throughout as in the datasheet, extreme coefficients wrap
    let var1 = ((adc_t >> 3).wrapping_sub(t1 << 1).wrapping_mul(t2)) >> 11;
    let delta = (adc_t >> 4).wrapping_sub(t1);
    let var2 = ((delta.wrapping_mul(delta) >> 12).wrapping_mul(t3)) >> 14;
    let t_fine = var1.wrapping_add(var2);

    (t_fine.wrapping_mul(5).wrapping_add(128) >> 8, FineTemperature(t_fine))
}

/// Returns the pressure in Pa as Q24.8, e.g. 24674867 for 96386.2 Pa.
///
/// A calibration that makes the divisor zero yields 0. Results are clamped to
/// `0..=PRESSURE_MAX`.
pub fn compensate_pressure(adc_p: i32, t_fine: FineTemperature, calib: &CalibrationData) -> u32 {
    let p1 = i64::from(calib.dig_p1);
    let p2 = i64::from(calib.dig_p2);
    let p3 = i64::from(calib.dig_p3);
    let p4 = i64::from(calib.dig_p4);
    let p5 = i64::from(calib.dig_p5);
    let p6 = i64::from(calib.dig_p6);
    let p7 = i64::from(calib.dig_p7);
    let p8 = i64::from(calib.dig_p8);
    let p9 = i64::from(calib.dig_p9);

    let mut var1 = i64::from(t_fine.0) - 128000;
    let mut var2 = var1.wrapping_mul(var1).wrapping_mul(p6);
    var2 = var2.wrapping_add(var1.wrapping_mul(p5) << 17);
    var2 = var2.wrapping_add(p4 << 35);
    var1 = (var1.wrapping_mul(var1).wrapping_mul(p3) >> 8).wrapping_add(var1.wrapping_mul(p2) << 12);
    var1 = ((1i64 << 47).wrapping_add(var1).wrapping_mul(p1)) >> 33;

    if var1 == 0 {
        return 0;
    }

    // A small divisor pushes p far past the range of a real sensor, the terms
    // below then wrap in two's complement
    let mut p = 1048576 - i64::from(adc_p);
    p = ((p << 31).wrapping_sub(var2).wrapping_mul(3125)).wrapping_div(var1);
    let var1 = p9.wrapping_mul(p >> 13).wrapping_mul(p >> 13) >> 25;
    let var2 = p8.wrapping_mul(p) >> 19;
    p = (p.wrapping_add(var1).wrapping_add(var2) >> 8).wrapping_add(p7 << 4);

    p.max(0).min(i64::from(PRESSURE_MAX)) as u32
}

/// Returns the relative humidity in %RH as Q22.10, e.g. 47445 for 46.333 %RH
pub fn compensate_humidity(adc_h: i32, t_fine: FineTemperature, calib: &CalibrationData) -> u32 {
    let h1 = i64::from(calib.dig_h1);
    let h2 = i64::from(calib.dig_h2);
    let h3 = i64::from(calib.dig_h3);
    let h4 = i64::from(calib.dig_h4);
    let h5 = i64::from(calib.dig_h5);
    let h6 = i64::from(calib.dig_h6);

    let mut v_x1 = i64::from(t_fine.0) - 76800;
    let offset = ((i64::from(adc_h) << 14) - (h4 << 20))
        .wrapping_sub(h5.wrapping_mul(v_x1))
        .wrapping_add(16384)
        >> 15;
    let scale = ((((v_x1.wrapping_mul(h6) >> 10)
        .wrapping_mul((v_x1.wrapping_mul(h3) >> 11).wrapping_add(32768))
        >> 10)
        .wrapping_add(2097152))
    .wrapping_mul(h2)
    .wrapping_add(8192))
        >> 14;
    v_x1 = offset.wrapping_mul(scale);
    // Only exceeds 64 bits for inputs a real sensor never produces, and the
    // clamp below bounds the result either way
    let square = (v_x1 >> 15).wrapping_mul(v_x1 >> 15);
    v_x1 = v_x1.wrapping_sub(((square >> 7).wrapping_mul(h1)) >> 4);

    (v_x1.max(0).min(HUMIDITY_MAX) >> 12) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::tests::datasheet;

    #[test]
    fn datasheet_temperature() {
        let (temperature, t_fine) = compensate_temperature(519888, &datasheet());

        assert_eq!(temperature, 2508);
        assert_eq!(t_fine.value(), 128422);
    }

    #[test]
    fn datasheet_pressure() {
        let calib = datasheet();
        let (_, t_fine) = compensate_temperature(519888, &calib);

        let pressure = compensate_pressure(415148, t_fine, &calib);
        assert_eq!(pressure, 25767233);
        // 100653.25 Pa
        assert_eq!(pressure / 256, 100653);
    }

    #[test]
    fn humidity_reference_values() {
        let calib = datasheet();
        let (_, t_fine) = compensate_temperature(519888, &calib);

        assert_eq!(compensate_humidity(30000, t_fine, &calib), 56317);
        assert_eq!(compensate_humidity(0x6000, t_fine, &calib), 25290);
        assert_eq!(compensate_humidity(0, t_fine, &calib), 0);
        assert_eq!(compensate_humidity(0xFFFF, t_fine, &calib), 102400);
    }

    #[test]
    fn zero_divisor_gives_zero_pressure() {
        let calib = CalibrationData {dig_p1: 0, ..datasheet()};
        let (_, t_fine) = compensate_temperature(519888, &calib);

        assert_eq!(compensate_pressure(415148, t_fine, &calib), 0);
        assert_eq!(compensate_pressure(0, t_fine, &calib), 0);
    }

    #[test]
    fn tiny_divisor_does_not_overflow() {
        let calib = CalibrationData {dig_p1: 1, ..datasheet()};
        let (_, t_fine) = compensate_temperature(519888, &calib);

        for adc_p in &[0, 415148, 0xFFFFF, i32::MIN, i32::MAX] {
            assert!(compensate_pressure(*adc_p, t_fine, &calib) <= PRESSURE_MAX);
        }
    }

    #[test]
    fn extreme_pressure_calibration_stays_in_range() {
        let calib = CalibrationData {
            dig_p1: u16::MAX,
            dig_p2: i16::MIN,
            dig_p3: i16::MAX,
            dig_p4: i16::MAX,
            dig_p5: i16::MIN,
            dig_p6: i16::MAX,
            dig_p7: i16::MAX,
            dig_p8: i16::MIN,
            dig_p9: i16::MAX,
            ..datasheet()
        };
        for t in &[i32::MIN, -1, 0, 128422, i32::MAX] {
            let (_, t_fine) = compensate_temperature(*t, &calib);
            assert!(compensate_pressure(0xFFFFF, t_fine, &calib) <= PRESSURE_MAX);
        }
    }

    #[test]
    fn extreme_temperature_calibration_wraps() {
        let calib = CalibrationData {dig_t1: 0, dig_t2: i16::MAX, dig_t3: 0, ..datasheet()};

        let (temperature, t_fine) = compensate_temperature(0xFFFFF, &calib);
        assert_eq!(t_fine.value(), -80);
        assert_eq!(temperature, -2);

        let calib = CalibrationData {dig_t1: 0, dig_t2: i16::MIN, dig_t3: i16::MIN, ..datasheet()};
        for adc_t in &[0, 0xFFFFF, i32::MIN, i32::MAX] {
            compensate_temperature(*adc_t, &calib);
        }
    }

    #[test]
    fn humidity_is_always_clamped() {
        let calib = datasheet();
        let limit = (HUMIDITY_MAX >> 12) as u32;

        let t_fines = [i32::MIN, -2_000_000, -76800, 0, 128422, 500_000, 2_000_000, i32::MAX];
        let edges = [i32::MIN, i32::MIN + 1, -1, 0, 1, 0xFFFF, i32::MAX - 1, i32::MAX];

        for &t_fine in &t_fines {
            let t_fine = FineTemperature(t_fine);
            for &adc_h in &edges {
                assert!(compensate_humidity(adc_h, t_fine, &calib) <= limit);
            }
            // Deterministic walk over the whole i32 range
            let mut adc_h: i32 = 0x1234_5678;
            for _ in 0..20_000 {
                adc_h = adc_h.wrapping_mul(1_103_515_245).wrapping_add(12345);
                assert!(compensate_humidity(adc_h, t_fine, &calib) <= limit);
            }
        }
    }
}
