//! Cell-balancing switch validation and encoding.
//!
//! The chip's internal balancing switches can be destroyed by two
//! configurations:
//!
//! 1. two side-by-side switches ON at the same time,
//! 2. both neighbours of an OFF switch ON at the same time.
//!
//! [`request_switch_state`] checks a requested [`SwitchBank`] against both
//! rules and, when it passes, encodes it into the CBALH/CBALL byte pair. It
//! never touches the bus.

use byteorder::{BigEndian, ByteOrder as _};
use core::fmt;

use crate::constants::Register;

pub const NUM_SWITCHES: u8 = 16;

/// ON/OFF state of the sixteen balancing switches. Switch `k` bridges pin
/// V`k` and V`k-1`; switch 1 sits on the bottom rail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SwitchBank(u16);

impl SwitchBank {
    pub const fn all_off() -> Self {
        SwitchBank(0)
    }

    /// `states[0]` is switch 1, `states[15]` is switch 16.
    pub fn from_states(states: [bool; 16]) -> Self {
        let bits = states
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .fold(0u16, |acc, (i, _)| acc | 1 << i);
        SwitchBank(bits)
    }

    /// Builds a bank with the listed switches ON. Returns `None` if an index
    /// is outside 1..=16.
    pub fn from_switches(switches: &[u8]) -> Option<Self> {
        let mut bank = Self::all_off();
        for &k in switches {
            if !(1..=NUM_SWITCHES).contains(&k) {
                return None;
            }
            bank.set(k, true);
        }
        Some(bank)
    }

    /// Raw form, bit `k-1` is switch `k`.
    pub const fn from_bits(bits: u16) -> Self {
        SwitchBank(bits)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub fn states(&self) -> [bool; 16] {
        let mut states = [false; 16];
        for (i, state) in states.iter_mut().enumerate() {
            *state = self.0 & (1 << i) != 0;
        }
        states
    }

    /// Out-of-range indices read as OFF.
    pub fn is_on(&self, k: u8) -> bool {
        (1..=NUM_SWITCHES).contains(&k) && self.0 & (1 << (k - 1)) != 0
    }

    /// Out-of-range indices are ignored.
    pub fn set(&mut self, k: u8, on: bool) {
        if !(1..=NUM_SWITCHES).contains(&k) {
            return;
        }
        let mask = 1 << (k - 1);
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count_on(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn switches_on(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=NUM_SWITCHES).filter(move |&k| self.is_on(k))
    }

    /// Splits the request into three banks by `index mod 3`. Switches in one
    /// phase are at least three apart, so each phase passes
    /// [`request_switch_state`] regardless of the original request.
    pub fn phases(&self) -> [SwitchBank; 3] {
        let mut phases = [SwitchBank::all_off(); 3];
        for k in self.switches_on() {
            phases[usize::from((k - 1) % 3)].set(k, true);
        }
        phases
    }
}

impl From<[bool; 16]> for SwitchBank {
    fn from(states: [bool; 16]) -> Self {
        Self::from_states(states)
    }
}

/// CBALH/CBALL values for an accepted [`SwitchBank`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterPair {
    /// Switches 16..9, MSB first.
    pub upper: u8,
    /// Switches 8..1, MSB first.
    pub lower: u8,
}

impl RegisterPair {
    pub fn from_bank(bank: &SwitchBank) -> Self {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, bank.bits());
        RegisterPair {
            upper: buf[0],
            lower: buf[1],
        }
    }

    pub fn to_bank(&self) -> SwitchBank {
        SwitchBank::from_bits(BigEndian::read_u16(&[self.upper, self.lower]))
    }

    /// Register writes in the order they are issued.
    pub fn writes(&self) -> [(Register, u8); 2] {
        [(Register::Cbalh, self.upper), (Register::Cball, self.lower)]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ValidationError {
    /// Switches `k` and `k+1` are both ON.
    Adjacent(u8),
    /// Switch `k` is OFF while `k-1` and `k+1` are both ON.
    Flanked(u8),
}

impl ValidationError {
    /// The switch the violation was detected at.
    pub fn index(&self) -> u8 {
        match *self {
            ValidationError::Adjacent(k) | ValidationError::Flanked(k) => k,
        }
    }

    /// The pair of ON switches that cannot coexist, kept within 1..=16.
    pub fn conflicting_indices(&self) -> (u8, u8) {
        let clamp = |k: u8| k.clamp(1, NUM_SWITCHES);
        match *self {
            ValidationError::Adjacent(k) => (clamp(k), clamp(k.saturating_add(1))),
            ValidationError::Flanked(k) => (clamp(k.saturating_sub(1)), clamp(k.saturating_add(1))),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (low, high) = self.conflicting_indices();
        match *self {
            ValidationError::Adjacent(_) => {
                write!(f, "balancing switches {} and {} are side by side", low, high)
            }
            ValidationError::Flanked(k) => write!(
                f,
                "balancing switches {} and {} flank switch {} which is off",
                low, high, k
            ),
        }
    }
}

/// Validates `bank` and encodes it. The lowest offending index is reported.
pub fn request_switch_state(bank: &SwitchBank) -> Result<RegisterPair, ValidationError> {
    for k in 1..=NUM_SWITCHES {
        let on = bank.is_on(k);
        let above = bank.is_on(k + 1);

        if on && above {
            return Err(ValidationError::Adjacent(k));
        }
        if !on && k > 1 && bank.is_on(k - 1) && above {
            return Err(ValidationError::Flanked(k));
        }
    }

    Ok(RegisterPair::from_bank(bank))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(switches: &[u8]) -> SwitchBank {
        SwitchBank::from_switches(switches).unwrap()
    }

    #[test]
    fn adjacent_pairs_rejected() {
        for k in 1..NUM_SWITCHES {
            assert_eq!(
                request_switch_state(&bank(&[k, k + 1])),
                Err(ValidationError::Adjacent(k))
            );
        }
    }

    #[test]
    fn flanked_off_switch_rejected() {
        for k in 2..NUM_SWITCHES {
            let err = request_switch_state(&bank(&[k - 1, k + 1])).unwrap_err();
            assert_eq!(err, ValidationError::Flanked(k));
            assert_eq!(err.conflicting_indices(), (k - 1, k + 1));
        }
    }

    #[test]
    fn all_off() {
        let pair = request_switch_state(&SwitchBank::from_states([false; 16])).unwrap();
        assert_eq!(pair, RegisterPair { upper: 0x00, lower: 0x00 });
    }

    #[test]
    fn single_switches() {
        let pair = request_switch_state(&bank(&[1])).unwrap();
        assert_eq!(pair, RegisterPair { upper: 0x00, lower: 0x01 });

        let pair = request_switch_state(&bank(&[16])).unwrap();
        assert_eq!(pair, RegisterPair { upper: 0x80, lower: 0x00 });

        for k in 1..=8 {
            let pair = request_switch_state(&bank(&[k])).unwrap();
            assert_eq!(pair.lower, 1 << (k - 1));
            assert_eq!(pair.upper, 0);
        }
        for k in 9..=16 {
            let pair = request_switch_state(&bank(&[k])).unwrap();
            assert_eq!(pair.upper, 1 << (k - 9));
            assert_eq!(pair.lower, 0);
        }
    }

    #[test]
    fn gap_of_one_is_flanked() {
        // switch 2 is off with 1 and 3 on
        assert_eq!(
            request_switch_state(&bank(&[1, 3, 5])),
            Err(ValidationError::Flanked(2))
        );
    }

    #[test]
    fn sparse_pattern_accepted() {
        let pair = request_switch_state(&bank(&[1, 4, 7])).unwrap();
        assert_eq!(pair, RegisterPair { upper: 0x00, lower: 0b0100_1001 });

        let pair = request_switch_state(&bank(&[8, 11, 14])).unwrap();
        assert_eq!(pair, RegisterPair { upper: 0b0010_0100, lower: 0b1000_0000 });
    }

    #[test]
    fn lowest_violation_reported_first() {
        let err = request_switch_state(&bank(&[3, 5, 10, 11])).unwrap_err();
        assert_eq!(err, ValidationError::Flanked(4));

        let err = request_switch_state(&bank(&[1, 2, 3])).unwrap_err();
        assert_eq!(err, ValidationError::Adjacent(1));
    }

    #[test]
    fn idempotent() {
        let request = bank(&[2, 5, 9, 16]);
        let first = request_switch_state(&request);
        let second = request_switch_state(&request);
        assert_eq!(first, second);
        assert_eq!(request, bank(&[2, 5, 9, 16]));
    }

    #[test]
    fn phases_are_always_valid() {
        let everything = SwitchBank::from_bits(0xFFFF);
        let phases = everything.phases();

        let mut merged = 0u16;
        for phase in phases.iter() {
            assert!(request_switch_state(phase).is_ok());
            merged |= phase.bits();
        }
        assert_eq!(merged, 0xFFFF);
        assert_eq!(phases[0].switches_on().collect::<Vec<_>>(), [1, 4, 7, 10, 13, 16]);
    }

    #[test]
    fn pair_back_to_bank() {
        let request = bank(&[3, 9, 12]);
        let pair = RegisterPair::from_bank(&request);
        assert_eq!(pair.to_bank(), request);
        assert_eq!(pair.writes()[0], (Register::Cbalh, 0b0000_1001));
        assert_eq!(pair.writes()[1], (Register::Cball, 0b0000_0100));
    }

    #[test]
    fn hand_built_errors_stay_in_range() {
        assert_eq!(ValidationError::Flanked(0).conflicting_indices(), (1, 1));
        assert_eq!(ValidationError::Adjacent(16).conflicting_indices(), (16, 16));
        assert_eq!(ValidationError::Adjacent(255).conflicting_indices(), (16, 16));
        assert_eq!(ValidationError::Flanked(5).conflicting_indices(), (4, 6));

        assert_eq!(
            ValidationError::Flanked(0).to_string(),
            "balancing switches 1 and 1 flank switch 0 which is off"
        );
        assert_eq!(
            ValidationError::Adjacent(3).to_string(),
            "balancing switches 3 and 4 are side by side"
        );
    }

    #[test]
    fn switch_indices_out_of_range() {
        assert!(SwitchBank::from_switches(&[0]).is_none());
        assert!(SwitchBank::from_switches(&[17]).is_none());

        let mut b = SwitchBank::all_off();
        b.set(17, true);
        assert!(b.is_empty());
        assert!(!b.is_on(0));
    }
}
