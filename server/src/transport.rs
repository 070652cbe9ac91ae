use std::fmt::Debug;

use embedded_hal::blocking::i2c::{Write, WriteRead};

use crate::error::{BusError, BusOp};

/// Synchronous access to the 8 bit registers of one already addressed device.
///
/// Implementations do not retry. A block read must be a single bus transaction so
/// the device never hands out a torn multi-byte value.
pub trait RegisterTransport {
    fn read_block(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), BusError>;
    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError>;

    fn read_byte(&mut self, register: u8) -> Result<u8, BusError> {
        let mut buffer = [0];
        self.read_block(register, &mut buffer)?;
        Ok(buffer[0])
    }
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn read_block(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        (**self).read_block(register, buffer)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        (**self).write_byte(register, value)
    }

    fn read_byte(&mut self, register: u8) -> Result<u8, BusError> {
        (**self).read_byte(register)
    }
}

/// Register access on top of an embedded-hal I2C bus
pub struct HalTransport<I> {
    i2c: I,
    address: u8,
}

impl<I> HalTransport<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self {i2c, address}
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I, E> RegisterTransport for HalTransport<I>
where
    I: Write<Error = E> + WriteRead<Error = E>,
    E: Debug,
{
    fn read_block(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        self.i2c
            .write_read(self.address, &[register], buffer)
            .map_err(|e| BusError::new(register, BusOp::ReadBlock, e))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|e| BusError::new(register, BusOp::WriteByte, e))
    }
}
