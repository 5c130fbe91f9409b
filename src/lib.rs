#![cfg_attr(not(test), no_std)]

//! Driver for the ML5238 battery monitor AFE using `embedded-hal` traits.
//!
//! Covers the whole control register map: cell voltage routing (VMON),
//! current sense amplifier (IMON), FET drivers, charger/load/short-circuit
//! comparators, power save and power down, and the sixteen cell balancing
//! switches. Balancing requests go through [`request_switch_state`] before
//! anything reaches the bus.

use embedded_hal::delay::DelayNs;

#[macro_use]
mod fmt;

pub mod balance;
mod constants;
mod interface;
mod stack;
mod status;

pub use balance::{request_switch_state, RegisterPair, SwitchBank, ValidationError};
pub use constants::*;
pub use interface::{RegisterInterface, SpiInterface};
pub use stack::CellStack;
pub use status::{CurrentMonitor, Detector, DetectorState, FetState, Status};

pub type Result<T, E> = core::result::Result<T, Error<E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Register access failed. Carries the interface error unchanged.
    Bus(E),
    /// Balancing request would damage the switches.
    Validation(ValidationError),
    /// NOOP register did not read back what was written.
    CommunicationCheck(u8),
    /// Balancing switch spans pins that are not wired to a cell.
    CellNotPopulated(u8),
    /// Power down requested with a FET still on.
    FetsEnabled,
    /// Power down requested without a confirmed charger disconnection.
    ChargerConnected,
}

impl<E> From<ValidationError> for Error<E> {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e)
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Bus(e) => write!(f, "register access failed: {:?}", e),
            Error::Validation(e) => write!(f, "rejected balancing request: {}", e),
            Error::CommunicationCheck(read) => {
                write!(f, "NOOP register read back {:#04x}", read)
            }
            Error::CellNotPopulated(k) => {
                write!(f, "balancing switch {} is outside the cell stack", k)
            }
            Error::FetsEnabled => f.write_str("charge or discharge FET is still on"),
            Error::ChargerConnected => f.write_str("charger disconnection not confirmed"),
        }
    }
}

/// Settings applied by [`Ml5238::new_with_config`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub stack: CellStack,
    pub short_circuit_threshold: ShortCircuitThreshold,
    pub current_gain: CurrentGain,
    /// Run the short-current comparator with its interrupt enabled.
    pub short_circuit_detection: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stack: CellStack::default(),
            short_circuit_threshold: ShortCircuitThreshold::Mv100,
            current_gain: CurrentGain::X10,
            short_circuit_detection: true,
        }
    }
}

pub struct Ml5238<D: RegisterInterface> {
    iface: D,
    stack: CellStack,
}

impl<D: RegisterInterface> Ml5238<D> {
    /// Comparator enable to interrupt enable spacing, a little over 1 ms.
    const SETTLE_US: u32 = 1_100;
    const NOOP_PATTERN: u8 = 0xA5;

    #[inline]
    pub fn new(iface: D) -> Result<Self, D::Error> {
        Self::new_with_config(iface, Config::default())
    }

    pub fn new_with_config(iface: D, config: Config) -> Result<Self, D::Error> {
        let mut afe = Self {
            iface,
            stack: config.stack,
        };

        afe.check_communication()?;
        afe.stop_balancing()?;
        afe.set_short_circuit_threshold(config.short_circuit_threshold)?;
        afe.set_current_gain(config.current_gain)?;

        if config.short_circuit_detection {
            // short-current comparator needs no settle time before ISC
            afe.modify_detector(Detector::ShortCircuit, Detector::ShortCircuit.enable_mask(), 0)?;
            afe.modify_detector(
                Detector::ShortCircuit,
                Detector::ShortCircuit.interrupt_mask(),
                0,
            )?;
        }

        debug!("ml5238 ready, {} cell stack", config.stack.cells());
        Ok(afe)
    }

    pub fn destroy(self) -> D {
        let Self { iface, .. } = self;
        iface
    }

    pub fn stack(&self) -> CellStack {
        self.stack
    }

    /// Writes a pattern to NOOP and reads it back.
    pub fn check_communication(&mut self) -> Result<(), D::Error> {
        self.set_register(Register::Noop, Self::NOOP_PATTERN)?;
        let read = self.get_register(Register::Noop)?;

        if read == Self::NOOP_PATTERN {
            Ok(())
        } else {
            warn!("NOOP read back {}", read);
            Err(Error::CommunicationCheck(read))
        }
    }

    /// Routes a cell to the VMON pin, or pulls the pin to 0 V with `None`.
    pub fn select_cell_output(&mut self, cell: Option<Cell>) -> Result<(), D::Error> {
        let val = match cell {
            Some(cell) => VmonBits::Out.mask() | cell.select_bits(),
            None => 0,
        };
        self.set_register(Register::Vmon, val)
    }

    pub fn cell_output(&mut self) -> Result<Option<Cell>, D::Error> {
        let val = self.get_register(Register::Vmon)?;

        if val & VmonBits::Out.mask() != 0 {
            Ok(Some(Cell::from_select_bits(val)))
        } else {
            Ok(None)
        }
    }

    pub fn set_current_gain(&mut self, gain: CurrentGain) -> Result<(), D::Error> {
        self.set_function_helper(
            Register::Imon,
            !ImonBits::Gim.mask(),
            ImonBits::Gim.get(),
            gain as _,
        )
    }

    /// Ties ISP and ISM to GND to measure the amplifier offset.
    pub fn set_current_zero(&mut self, zero: bool) -> Result<(), D::Error> {
        self.set_flag(Register::Imon, ImonBits::Zero, zero)
    }

    /// Any calibration other than `Off` also turns on the IMON output, which
    /// must stay on while gain correction is held.
    pub fn set_current_calibration(&mut self, cal: CurrentCalibration) -> Result<(), D::Error> {
        const GCAL_MASK: u8 = 0b11110011;

        self.set_function_helper(Register::Imon, GCAL_MASK, ImonBits::Gcal0.get(), cal as _)?;

        if cal != CurrentCalibration::Off {
            self.set_bit(Register::Imon, ImonBits::Out)?;
        }
        Ok(())
    }

    pub fn enable_current_output(&mut self, enable: bool) -> Result<(), D::Error> {
        self.set_flag(Register::Imon, ImonBits::Out, enable)
    }

    pub fn current_monitor(&mut self) -> Result<CurrentMonitor, D::Error> {
        self.get_register(Register::Imon).map(CurrentMonitor::from_reg)
    }

    /// Sets the C_FET and D_FET outputs, leaving the drive strength alone.
    pub fn set_fets(&mut self, charge: bool, discharge: bool) -> Result<(), D::Error> {
        const FET_MASK: u8 = 0b11111100;

        let bits = (charge as u8) << FetBits::Cf.get() | (discharge as u8) << FetBits::Df.get();
        self.set_function_helper(Register::Fet, FET_MASK, 0, bits)
    }

    /// Sets the FET outputs with enhanced gate drive for `boost_us`, then
    /// drops back to normal drive. Size `boost_us` to the gate capacitance.
    pub fn switch_fets_boosted<W: DelayNs>(
        &mut self,
        charge: bool,
        discharge: bool,
        boost_us: u32,
        wait: &mut W,
    ) -> Result<(), D::Error> {
        let bits = FetBits::Drv.mask()
            | (charge as u8) << FetBits::Cf.get()
            | (discharge as u8) << FetBits::Df.get();
        self.set_register(Register::Fet, bits)?;

        wait.delay_us(boost_us);

        self.clear_bit(Register::Fet, FetBits::Drv)
    }

    pub fn fet_state(&mut self) -> Result<FetState, D::Error> {
        self.get_register(Register::Fet).map(FetState::from_reg)
    }

    /// Starts a comparator. With `interrupt`, also lets it assert /INTO;
    /// PSENSE and load comparators are given 1 ms to settle first. Without
    /// it, a previously armed interrupt is disarmed.
    pub fn enable_detector<W: DelayNs>(
        &mut self,
        det: Detector,
        interrupt: bool,
        wait: &mut W,
    ) -> Result<(), D::Error> {
        let disarm = if interrupt { 0 } else { det.interrupt_mask() };
        self.modify_detector(det, det.enable_mask(), disarm)?;

        if interrupt {
            if det.needs_settle() {
                wait.delay_us(Self::SETTLE_US);
            }
            self.modify_detector(det, det.interrupt_mask(), 0)?;
        }

        debug!("detector enabled, interrupt {}", interrupt);
        Ok(())
    }

    pub fn disable_detector(&mut self, det: Detector) -> Result<(), D::Error> {
        self.modify_detector(det, 0, det.enable_mask() | det.interrupt_mask())
    }

    pub fn detector_state(&mut self, det: Detector) -> Result<DetectorState, D::Error> {
        let val = self.get_register(det.register())?;
        Ok(det.decode(val))
    }

    /// Clears the latched interrupt of `det`, leaving the other flag in the
    /// register untouched.
    pub fn clear_detector_interrupt(&mut self, det: Detector) -> Result<(), D::Error> {
        self.modify_detector(det, 0, det.flag_mask())
    }

    pub fn set_short_circuit_threshold(
        &mut self,
        threshold: ShortCircuitThreshold,
    ) -> Result<(), D::Error> {
        self.set_register(Register::Setsc, threshold as _)
    }

    pub fn short_circuit_threshold(&mut self) -> Result<ShortCircuitThreshold, D::Error> {
        self.get_register(Register::Setsc)
            .map(ShortCircuitThreshold::from_bits)
    }

    /// Stops cell voltage and current measurement and the PSENSE/RSENSE
    /// comparators. FET drive and short-current detection keep running.
    pub fn enter_power_save(&mut self) -> Result<(), D::Error> {
        self.set_bit(Register::Power, PowerBits::Psv)
    }

    /// Comparators stopped by power save must be enabled again afterwards.
    pub fn exit_power_save(&mut self) -> Result<(), D::Error> {
        self.clear_bit(Register::Power, PowerBits::Psv)
    }

    /// True while the /PUPIN pin is held low.
    pub fn power_down_input_asserted(&mut self) -> Result<bool, D::Error> {
        self.get_bit(Register::Power, PowerBits::Pupin)
    }

    /// Enters power down. Both FETs must be off and one of the charger-open
    /// comparators must report the charger gone. Returns
    /// `nb::Error::WouldBlock` while /PUPIN is held low, since the chip would
    /// not power down until it rises anyway.
    pub fn power_down(&mut self) -> nb::Result<(), Error<D::Error>> {
        let status = self.status().map_err(nb::Error::Other)?;
        if status.charge_fet || status.discharge_fet {
            warn!("power down refused, FETs on");
            return Err(nb::Error::Other(Error::FetsEnabled));
        }

        let psense = self
            .get_register(Register::Psense)
            .map_err(nb::Error::Other)?;
        let disconnected =
            Detector::ChargerLow.decode(psense).tripped || Detector::ChargerHigh.decode(psense).tripped;
        if !disconnected {
            warn!("power down refused, charger not confirmed open");
            return Err(nb::Error::Other(Error::ChargerConnected));
        }

        if self.power_down_input_asserted().map_err(nb::Error::Other)? {
            return Err(nb::Error::WouldBlock);
        }

        debug!("entering power down");
        self.set_bit(Register::Power, PowerBits::Pdwn)
            .map_err(nb::Error::Other)
    }

    pub fn status(&mut self) -> Result<Status, D::Error> {
        self.get_register(Register::Status).map(Status::from_reg)
    }

    /// Validates `bank`, checks it against the cell stack and programs
    /// CBALH/CBALL. Nothing is written if the request is rejected.
    ///
    /// The two registers are written one at a time, so the write order is
    /// chosen such that the state between the writes is also valid.
    pub fn set_balancing(&mut self, bank: &SwitchBank) -> Result<RegisterPair, D::Error> {
        let pair = request_switch_state(bank).map_err(|e| {
            warn!("balancing rejected at switch {}", e.index());
            Error::Validation(e)
        })?;

        if let Some(k) = bank.switches_on().find(|&k| !self.stack.contains(k)) {
            warn!("balancing switch {} outside cell stack", k);
            return Err(Error::CellNotPopulated(k));
        }

        let current = self.balancing_registers()?;
        let upper_first = RegisterPair {
            upper: pair.upper,
            lower: current.lower,
        };
        let lower_first = RegisterPair {
            upper: current.upper,
            lower: pair.lower,
        };

        if request_switch_state(&upper_first.to_bank()).is_ok() {
            self.set_register(Register::Cbalh, pair.upper)?;
            self.set_register(Register::Cball, pair.lower)?;
        } else if request_switch_state(&lower_first.to_bank()).is_ok() {
            self.set_register(Register::Cball, pair.lower)?;
            self.set_register(Register::Cbalh, pair.upper)?;
        } else {
            self.set_register(Register::Cball, 0)?;
            self.set_register(Register::Cbalh, pair.upper)?;
            self.set_register(Register::Cball, pair.lower)?;
        }

        Ok(pair)
    }

    pub fn stop_balancing(&mut self) -> Result<(), D::Error> {
        for (reg, val) in RegisterPair::default().writes().iter() {
            self.set_register(*reg, *val)?;
        }
        Ok(())
    }

    pub fn balancing(&mut self) -> Result<SwitchBank, D::Error> {
        self.balancing_registers().map(|pair| pair.to_bank())
    }

    fn balancing_registers(&mut self) -> Result<RegisterPair, D::Error> {
        Ok(RegisterPair {
            upper: self.get_register(Register::Cbalh)?,
            lower: self.get_register(Register::Cball)?,
        })
    }

    /// Read-modify-write of PSENSE/RSENSE. Interrupt flags are written as 1
    /// unless named in `clear`, so pending interrupts survive.
    fn modify_detector(&mut self, det: Detector, set: u8, clear: u8) -> Result<(), D::Error> {
        let reg = det.register();
        let val = self.get_register(reg)?;
        let val = (val | set | Detector::FLAGS) & !clear;

        self.set_register(reg, val)
    }

    fn set_function_helper(
        &mut self,
        reg: Register,
        mask: u8,
        start_idx: u8,
        new_val: u8,
    ) -> Result<(), D::Error> {
        let mut val = self.get_register(reg)?;
        val &= mask;
        val |= new_val << start_idx;

        self.set_register(reg, val)
    }

    fn set_flag<B: RegisterBits>(&mut self, reg: Register, bit: B, on: bool) -> Result<(), D::Error> {
        if on {
            self.set_bit(reg, bit)
        } else {
            self.clear_bit(reg, bit)
        }
    }

    fn set_bit<B: RegisterBits>(&mut self, reg: Register, bit: B) -> Result<(), D::Error> {
        let mut val = self.get_register(reg)?;
        val |= bit.mask();
        self.set_register(reg, val)
    }

    fn clear_bit<B: RegisterBits>(&mut self, reg: Register, bit: B) -> Result<(), D::Error> {
        let mut val = self.get_register(reg)?;
        val &= !bit.mask();
        self.set_register(reg, val)
    }

    fn get_bit<B: RegisterBits>(&mut self, reg: Register, bit: B) -> Result<bool, D::Error> {
        let val = self.get_register(reg)?;
        Ok(val & bit.mask() != 0)
    }

    fn set_register(&mut self, reg: Register, val: u8) -> Result<(), D::Error> {
        trace!("write {} <- {}", reg.addr(), val);
        self.iface.write_register(reg, val).map_err(Error::Bus)
    }

    fn get_register(&mut self, reg: Register) -> Result<u8, D::Error> {
        self.iface.read_register(reg).map_err(Error::Bus)
    }
}
