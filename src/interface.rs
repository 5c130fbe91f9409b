use embedded_hal::spi::SpiDevice;

use crate::constants::Register;

/// Single-byte register access to the chip.
pub trait RegisterInterface {
    type Error;

    fn write_register(&mut self, reg: Register, val: u8) -> Result<(), Self::Error>;

    fn read_register(&mut self, reg: Register) -> Result<u8, Self::Error>;
}

/// Serial interface over an `embedded-hal` SPI device. Each access is one
/// two-byte frame: `address << 1 | W`, then the data byte.
pub struct SpiInterface<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> SpiInterface<SPI> {
    const WRITE: u8 = 0x01;

    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn destroy(self) -> SPI {
        let Self { spi } = self;
        spi
    }

    #[inline]
    fn command(reg: Register) -> u8 {
        reg.addr() << 1
    }
}

impl<SPI: SpiDevice> RegisterInterface for SpiInterface<SPI> {
    type Error = SPI::Error;

    fn write_register(&mut self, reg: Register, val: u8) -> Result<(), Self::Error> {
        let frame = [Self::command(reg) | Self::WRITE, val];
        self.spi.write(&frame)
    }

    fn read_register(&mut self, reg: Register) -> Result<u8, Self::Error> {
        let mut frame = [Self::command(reg), 0];
        self.spi.transfer_in_place(&mut frame)?;
        Ok(frame[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::spi::{Mock, Transaction};

    #[test]
    fn write_frame() {
        let expectations = [
            Transaction::transaction_start(),
            Transaction::write_vec(vec![0x11, 0x49]),
            Transaction::transaction_end(),
        ];
        let mut iface = SpiInterface::new(Mock::new(&expectations));

        iface.write_register(Register::Cbalh, 0x49).unwrap();

        iface.destroy().done();
    }

    #[test]
    fn read_frame() {
        let expectations = [
            Transaction::transaction_start(),
            Transaction::transfer_in_place(vec![0x0E, 0x00], vec![0xFF, 0x83]),
            Transaction::transaction_end(),
        ];
        let mut iface = SpiInterface::new(Mock::new(&expectations));

        assert_eq!(iface.read_register(Register::Status).unwrap(), 0x83);

        iface.destroy().done();
    }
}
