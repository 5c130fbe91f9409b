use core::ops::RangeInclusive;

/// How many cells are wired to the chip. The stack always occupies the top
/// of the pin range: with `n` cells, pins below V`15-n` are tied to GND and
/// V16 goes to VDD_SW.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CellStack {
    cells: u8,
}

impl CellStack {
    pub const MIN_CELLS: u8 = 5;
    pub const MAX_CELLS: u8 = 15;

    pub const fn new(cells: u8) -> Option<Self> {
        if cells >= Self::MIN_CELLS && cells <= Self::MAX_CELLS {
            Some(CellStack { cells })
        } else {
            None
        }
    }

    pub const fn cells(&self) -> u8 {
        self.cells
    }

    /// Balancing switches (and VMON cells) that span a real cell.
    pub fn populated(&self) -> RangeInclusive<u8> {
        (16 - self.cells)..=15
    }

    pub fn contains(&self, switch: u8) -> bool {
        self.populated().contains(&switch)
    }
}

impl Default for CellStack {
    fn default() -> Self {
        CellStack {
            cells: Self::MAX_CELLS,
        }
    }
}
