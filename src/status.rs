use crate::constants::*;

/// One of the four comparator blocks in PSENSE/RSENSE. Each occupies a
/// nibble laid out as enable, interrupt enable, interrupt flag, output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Detector {
    /// Charger open, 0.2 V threshold. Used while the discharge FET is on.
    ChargerLow,
    /// Charger open, VDD x 0.75 threshold. Used around power down.
    ChargerHigh,
    /// Load open on RSENSE, 2.4 V threshold.
    Load,
    /// Short current on ISP-ISM, threshold from SETSC.
    ShortCircuit,
}

impl Detector {
    const ENABLE: u8 = 3;
    const INTERRUPT: u8 = 2;
    const FLAG: u8 = 1;
    const OUTPUT: u8 = 0;

    /// Interrupt flags of both nibbles. Writing 1 to a flag is ignored by the
    /// chip, writing 0 clears it.
    pub(crate) const FLAGS: u8 = (1 << Self::FLAG) | (1 << (Self::FLAG + 4));

    pub const fn register(self) -> Register {
        match self {
            Detector::ChargerLow | Detector::ChargerHigh => Register::Psense,
            Detector::Load | Detector::ShortCircuit => Register::Rsense,
        }
    }

    const fn shift(self) -> u8 {
        match self {
            Detector::ChargerLow | Detector::Load => 0,
            Detector::ChargerHigh | Detector::ShortCircuit => 4,
        }
    }

    pub(crate) const fn enable_mask(self) -> u8 {
        1 << (Self::ENABLE + self.shift())
    }

    pub(crate) const fn interrupt_mask(self) -> u8 {
        1 << (Self::INTERRUPT + self.shift())
    }

    pub(crate) const fn flag_mask(self) -> u8 {
        1 << (Self::FLAG + self.shift())
    }

    /// Whether the interrupt enable must trail the comparator enable by 1 ms.
    pub const fn needs_settle(self) -> bool {
        !matches!(self, Detector::ShortCircuit)
    }

    pub(crate) const fn decode(self, reg: u8) -> DetectorState {
        let nibble = reg >> self.shift();
        DetectorState {
            enabled: nibble & (1 << Self::ENABLE) != 0,
            interrupt_enabled: nibble & (1 << Self::INTERRUPT) != 0,
            interrupted: nibble & (1 << Self::FLAG) != 0,
            tripped: nibble & (1 << Self::OUTPUT) != 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DetectorState {
    pub enabled: bool,
    pub interrupt_enabled: bool,
    /// Latched interrupt, cleared with `clear_detector_interrupt`.
    pub interrupted: bool,
    /// Live comparator output: charger or load disconnected, or short current
    /// present. Always false while disabled.
    pub tripped: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FetState {
    pub charge: bool,
    pub discharge: bool,
    /// Enhanced gate drive (DRV) still active.
    pub boosted: bool,
}

impl FetState {
    pub(crate) fn from_reg(reg: u8) -> Self {
        FetState {
            charge: reg & FetBits::Cf.mask() != 0,
            discharge: reg & FetBits::Df.mask() != 0,
            boosted: reg & FetBits::Drv.mask() != 0,
        }
    }

    pub fn any_on(&self) -> bool {
        self.charge || self.discharge
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurrentMonitor {
    pub gain: CurrentGain,
    pub zero_correction: bool,
    pub calibration: CurrentCalibration,
    pub output_enabled: bool,
}

impl CurrentMonitor {
    pub(crate) fn from_reg(reg: u8) -> Self {
        let gain = if reg & ImonBits::Gim.mask() != 0 {
            CurrentGain::X50
        } else {
            CurrentGain::X10
        };
        CurrentMonitor {
            gain,
            zero_correction: reg & ImonBits::Zero.mask() != 0,
            calibration: CurrentCalibration::from_bits(reg >> ImonBits::Gcal0.get()),
            output_enabled: reg & ImonBits::Out.mask() != 0,
        }
    }
}

/// Decoded STATUS register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    pub discharge_fet: bool,
    pub charge_fet: bool,
    pub power_save: bool,
    /// /INTO asserted.
    pub interrupt: bool,
    pub charger_open_low: bool,
    pub charger_open_high: bool,
    pub load_open: bool,
    pub short_circuit: bool,
}

impl Status {
    pub fn from_reg(reg: u8) -> Self {
        let bit = |b: StatusBits| reg & b.mask() != 0;
        Status {
            discharge_fet: bit(StatusBits::Df),
            charge_fet: bit(StatusBits::Cf),
            power_save: bit(StatusBits::Psv),
            interrupt: bit(StatusBits::Int),
            charger_open_low: bit(StatusBits::Rpsl),
            charger_open_high: bit(StatusBits::Rpsh),
            load_open: bit(StatusBits::Rrs),
            short_circuit: bit(StatusBits::Rsc),
        }
    }

    /// First detector with a latched interrupt, most severe first.
    pub fn pending(&self) -> Option<Detector> {
        if self.short_circuit {
            Some(Detector::ShortCircuit)
        } else if self.charger_open_low {
            Some(Detector::ChargerLow)
        } else if self.charger_open_high {
            Some(Detector::ChargerHigh)
        } else if self.load_open {
            Some(Detector::Load)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_masks() {
        assert_eq!(Detector::ChargerLow.enable_mask(), 0b0000_1000);
        assert_eq!(Detector::ChargerHigh.interrupt_mask(), 0b0100_0000);
        assert_eq!(Detector::Load.flag_mask(), 0b0000_0010);
        assert_eq!(Detector::ShortCircuit.enable_mask(), 0b1000_0000);
        assert_eq!(Detector::FLAGS, 0b0010_0010);
        assert_eq!(Detector::ShortCircuit.register(), Register::Rsense);
    }

    #[test]
    fn detector_decode() {
        // ESC ISC SC set, ERS set
        let state = Detector::ShortCircuit.decode(0b1101_1000);
        assert!(state.enabled && state.interrupt_enabled && state.tripped);
        assert!(!state.interrupted);

        let load = Detector::Load.decode(0b1101_1000);
        assert_eq!(
            load,
            DetectorState {
                enabled: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn status_decode() {
        let status = Status::from_reg(0b1000_1011);
        assert!(status.discharge_fet);
        assert!(status.charge_fet);
        assert!(!status.power_save);
        assert!(status.interrupt);
        assert!(status.short_circuit);
        assert_eq!(status.pending(), Some(Detector::ShortCircuit));

        assert_eq!(Status::from_reg(0).pending(), None);
        assert_eq!(Status::from_reg(0b0100_0000).pending(), Some(Detector::Load));
    }

    #[test]
    fn current_monitor_decode() {
        let imon = CurrentMonitor::from_reg(0b0001_0101);
        assert_eq!(imon.gain, CurrentGain::X50);
        assert_eq!(imon.calibration, CurrentCalibration::ReferenceInput);
        assert!(imon.output_enabled);
        assert!(!imon.zero_correction);
    }
}
