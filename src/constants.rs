#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    Noop = 0x00,
    Vmon,
    Imon,
    Fet,
    Psense,
    Rsense,
    Power,
    Status,
    Cbalh,
    Cball,
    Setsc = 0x0A,
}

impl Register {
    #[inline]
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum VmonBits {
    Out = 4,
}

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum ImonBits {
    Gim = 0,
    Zero,
    Gcal0,
    Gcal1,
    Out,
}

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum FetBits {
    Df = 0,
    Cf,
    Drv = 4,
}

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum PowerBits {
    Psv = 0,
    Pdwn = 3,
    Pupin = 7,
}

#[derive(Clone, Copy)]
#[repr(u8)]
pub enum StatusBits {
    Df = 0,
    Cf,
    Psv,
    Int,
    Rpsl,
    Rpsh,
    Rrs,
    Rsc,
}

pub trait RegisterBits {
    fn get(&self) -> u8;

    #[inline]
    fn mask(&self) -> u8 {
        1 << self.get()
    }
}

macro_rules! impl_register_bits {
    ($($type:ident),*) => {
        $(
            impl RegisterBits for $type {
                fn get(&self) -> u8 {
                    *self as _
                }
            }
        )*
    }
}

impl_register_bits!(VmonBits, ImonBits, FetBits, PowerBits, StatusBits);

/// Voltage gain of the current-sense amplifier (GIM bit).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CurrentGain {
    X10 = 0b0,
    X50 = 0b1,
}

impl CurrentGain {
    pub const fn factor(self) -> i64 {
        match self {
            CurrentGain::X10 => 10,
            CurrentGain::X50 => 50,
        }
    }

    /// Reference voltage applied to ISP during input calibration.
    pub const fn calibration_reference_mv(self) -> u32 {
        match self {
            CurrentGain::X10 => 100,
            CurrentGain::X50 => 20,
        }
    }
}

/// Gain calibration routing (GCAL1:GCAL0). Ignored by the chip while zero
/// correction is active.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CurrentCalibration {
    /// ISP/ISM from pins, IMON carries the amplified signal.
    Off = 0b00,
    /// ISP tied to the internal reference, ISM to GND. IMON reads about 2 V.
    ReferenceInput = 0b01,
    /// ISP/ISM from pins, IMON outputs the internal reference directly.
    ReferenceOutput = 0b10,
    /// ISP tied to the internal reference, ISM to GND, IMON outputs the reference.
    ReferenceInputOutput = 0b11,
}

impl CurrentCalibration {
    pub(crate) const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => CurrentCalibration::Off,
            0b01 => CurrentCalibration::ReferenceInput,
            0b10 => CurrentCalibration::ReferenceOutput,
            _ => CurrentCalibration::ReferenceInputOutput,
        }
    }
}

/// ISP-ISM voltage at which the short-current comparator trips (SETSC).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ShortCircuitThreshold {
    Mv100 = 0b00,
    Mv200 = 0b01,
    Mv300 = 0b10,
    Mv400 = 0b11,
}

impl ShortCircuitThreshold {
    pub(crate) const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => ShortCircuitThreshold::Mv100,
            0b01 => ShortCircuitThreshold::Mv200,
            0b10 => ShortCircuitThreshold::Mv300,
            _ => ShortCircuitThreshold::Mv400,
        }
    }

    pub const fn millivolts(self) -> u32 {
        (self as u32 + 1) * 100
    }

    /// Current through a sense resistor of `shunt_uohm` that trips the
    /// comparator. 3 mOhm at 0.1 V gives 33333 mA.
    pub const fn trip_current_ma(self, shunt_uohm: u32) -> u32 {
        if shunt_uohm == 0 {
            return u32::MAX;
        }
        self.millivolts() * 1_000_000 / shunt_uohm
    }
}

/// Short-current detecting delay set by the CDLY capacitor: tsc[us] = C[nF] * 100.
pub const fn short_circuit_delay_us(cdly_nf: u32) -> u32 {
    cdly_nf.saturating_mul(100)
}

/// Battery cell routed to the VMON pin, 1 (lowest) to 16 (highest).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cell(u8);

impl Cell {
    pub const fn new(n: u8) -> Option<Self> {
        if n >= 1 && n <= 16 {
            Some(Cell(n))
        } else {
            None
        }
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    pub(crate) const fn select_bits(self) -> u8 {
        self.0 - 1
    }

    pub(crate) const fn from_select_bits(bits: u8) -> Self {
        Cell((bits & 0x0F) + 1)
    }
}

/// IMON pin voltage for a given sense current: V = I * R * G + 1.0 V.
/// Returns `None` if the result does not fit in an `i32`.
pub fn imon_millivolts(current_ma: i32, shunt_uohm: u32, gain: CurrentGain) -> Option<i32> {
    let amplified_mv = i64::from(current_ma)
        .checked_mul(i64::from(shunt_uohm))?
        .checked_mul(gain.factor())?
        / 1_000_000;
    i32::try_from(amplified_mv.checked_add(1_000)?).ok()
}

/// Inverse of [`imon_millivolts`]. Returns `None` for a zero shunt or a
/// current outside `i32`.
pub fn current_from_imon(imon_mv: i32, shunt_uohm: u32, gain: CurrentGain) -> Option<i32> {
    if shunt_uohm == 0 {
        return None;
    }
    let amplified_mv = i64::from(imon_mv) - 1_000;
    let current_ma = amplified_mv.checked_mul(1_000_000)? / (gain.factor() * i64::from(shunt_uohm));
    i32::try_from(current_ma).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_table() {
        assert_eq!(ShortCircuitThreshold::Mv100.millivolts(), 100);
        assert_eq!(ShortCircuitThreshold::Mv400.millivolts(), 400);
        assert_eq!(ShortCircuitThreshold::Mv100.trip_current_ma(3_000), 33_333);
        assert_eq!(ShortCircuitThreshold::Mv200.trip_current_ma(3_000), 66_666);
        assert_eq!(ShortCircuitThreshold::Mv300.trip_current_ma(3_000), 100_000);
        assert_eq!(ShortCircuitThreshold::Mv400.trip_current_ma(3_000), 133_333);
        assert_eq!(ShortCircuitThreshold::from_bits(0b10), ShortCircuitThreshold::Mv300);
    }

    #[test]
    fn cdly_delay() {
        assert_eq!(short_circuit_delay_us(0), 0);
        assert_eq!(short_circuit_delay_us(47), 4_700);
    }

    #[test]
    fn imon_conversion() {
        // 10 A through 1 mOhm at x10 is 100 mV of amplified signal.
        assert_eq!(imon_millivolts(10_000, 1_000, CurrentGain::X10), Some(1_100));
        assert_eq!(imon_millivolts(-10_000, 1_000, CurrentGain::X50), Some(500));
        assert_eq!(imon_millivolts(0, 1_000, CurrentGain::X50), Some(1_000));

        assert_eq!(current_from_imon(1_100, 1_000, CurrentGain::X10), Some(10_000));
        assert_eq!(current_from_imon(500, 1_000, CurrentGain::X50), Some(-10_000));
        assert_eq!(current_from_imon(1_000, 0, CurrentGain::X10), None);
    }

    #[test]
    fn imon_conversion_out_of_range() {
        assert_eq!(imon_millivolts(i32::MAX, 1_000_000, CurrentGain::X50), None);
        assert_eq!(imon_millivolts(i32::MAX, u32::MAX, CurrentGain::X50), None);
        assert_eq!(imon_millivolts(i32::MIN, u32::MAX, CurrentGain::X50), None);

        assert_eq!(current_from_imon(i32::MAX, 1, CurrentGain::X10), None);
        assert_eq!(current_from_imon(i32::MIN, 1, CurrentGain::X10), None);
        assert_eq!(
            current_from_imon(i32::MAX, u32::MAX, CurrentGain::X50),
            Some(9_999)
        );
    }

    #[test]
    fn cell_numbers() {
        assert!(Cell::new(0).is_none());
        assert!(Cell::new(17).is_none());
        let top = Cell::new(16).unwrap();
        assert_eq!(top.select_bits(), 0b1111);
        assert_eq!(Cell::from_select_bits(0b0000), Cell::new(1).unwrap());
    }
}
