//! Register addressing on top of the raw transport: the RTL2832U
//! groups its registers into blocks selected through the control
//! transfer's index field, and bridges I2C onto the same mechanism.

use crate::transport::{
    TransportError,
    UsbTransport,
};

pub const BLOCK_DEMOD: u16 = 0x000;
pub const BLOCK_USB: u16 = 0x100;
pub const BLOCK_SYS: u16 = 0x200;
pub const BLOCK_I2C: u16 = 0x600;

/// USB block registers.
pub const USB_SYSCTL: u16 = 0x2000;
pub const USB_EPA_CTL: u16 = 0x2148;
pub const USB_EPA_MAXPKT: u16 = 0x2158;

/// SYS block registers.
pub const SYS_DEMOD_CTL: u16 = 0x3000;
pub const SYS_DEMOD_CTL_1: u16 = 0x300b;

/// Register access for one RTL2832U.
///
/// Cheap to clone; all clones talk to the same device.
#[derive(Clone)]
pub struct RtlCom<C> {
    conn: C,
}

impl<C: UsbTransport> RtlCom<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn transport(&self) -> &C {
        &self.conn
    }

    /// Writes a value of `len` bytes, little-endian, into a register.
    pub async fn write_reg(
        &self,
        block: u16,
        reg: u16,
        value: u32,
        len: usize,
    ) -> Result<(), TransportError> {
        let buffer = to_le_bytes(value, len);
        self.conn.control_write(reg, block, &buffer).await
    }

    /// Reads a register as a little-endian value of `len` bytes.
    pub async fn read_reg(&self, block: u16, reg: u16, len: usize) -> Result<u32, TransportError> {
        let buffer = self.conn.control_read(reg, block, len).await?;
        Ok(from_le_bytes(&buffer))
    }

    /// Changes only the masked bits of a one-byte register: the new
    /// value is `(old & !mask) | (value & mask)`.
    pub async fn write_reg_mask(
        &self,
        block: u16,
        reg: u16,
        value: u8,
        mask: u8,
    ) -> Result<(), TransportError> {
        if mask == 0xff {
            self.write_reg(block, reg, u32::from(value), 1).await
        }
        else {
            let old = self.read_reg(block, reg, 1).await? as u8;
            let merged = (old & !mask) | (value & mask);
            self.write_reg(block, reg, u32::from(merged), 1).await
        }
    }

    /// Writes a demodulator register. Demod registers live at
    /// `(addr << 8) | 0x20` in the page's block and take their payload
    /// big-endian; the trailing read of page 10 register 1 latches the
    /// write into the chip.
    pub async fn write_demod_reg(
        &self,
        page: u16,
        addr: u16,
        value: u32,
        len: usize,
    ) -> Result<(), TransportError> {
        let buffer = to_be_bytes(value, len);
        self.conn
            .control_write((addr << 8) | 0x20, page, &buffer)
            .await?;
        self.read_demod_reg(0x0a, 0x01).await?;
        Ok(())
    }

    pub async fn read_demod_reg(&self, page: u16, addr: u16) -> Result<u8, TransportError> {
        let value = self.read_reg(page, (addr << 8) | 0x20, 1).await?;
        Ok(value as u8)
    }

    /// Opens the I2C repeater that bridges control transfers through
    /// to the tuner chip.
    pub async fn open_i2c(&self) -> Result<(), TransportError> {
        self.write_demod_reg(1, 1, 0x18, 1).await
    }

    pub async fn close_i2c(&self) -> Result<(), TransportError> {
        self.write_demod_reg(1, 1, 0x10, 1).await
    }

    pub async fn i2c_write_reg(&self, addr: u8, reg: u8, value: u8) -> Result<(), TransportError> {
        self.conn
            .control_write(u16::from(addr), BLOCK_I2C, &[reg, value])
            .await
    }

    pub async fn i2c_read_reg(&self, addr: u8, reg: u8) -> Result<u8, TransportError> {
        self.conn
            .control_write(u16::from(addr), BLOCK_I2C, &[reg])
            .await?;
        let buffer = self.conn.control_read(u16::from(addr), BLOCK_I2C, 1).await?;
        Ok(buffer.first().copied().unwrap_or(0))
    }

    /// Writes `buffer` starting at register `reg` of an I2C device.
    pub async fn i2c_write_buffer(
        &self,
        addr: u8,
        reg: u8,
        buffer: &[u8],
    ) -> Result<(), TransportError> {
        let mut data = Vec::with_capacity(buffer.len() + 1);
        data.push(reg);
        data.extend_from_slice(buffer);
        self.conn
            .control_write(u16::from(addr), BLOCK_I2C, &data)
            .await
    }

    /// Reads `len` bytes starting at register `reg` of an I2C device.
    pub async fn i2c_read_buffer(
        &self,
        addr: u8,
        reg: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        self.conn
            .control_write(u16::from(addr), BLOCK_I2C, &[reg])
            .await?;
        self.conn.control_read(u16::from(addr), BLOCK_I2C, len).await
    }
}

fn to_le_bytes(value: u32, len: usize) -> Vec<u8> {
    value.to_le_bytes()[..len].to_vec()
}

fn to_be_bytes(value: u32, len: usize) -> Vec<u8> {
    value.to_be_bytes()[4 - len..].to_vec()
}

fn from_le_bytes(buffer: &[u8]) -> u32 {
    let mut value = 0u32;
    for (i, &byte) in buffer.iter().take(4).enumerate() {
        value |= u32::from(byte) << (8 * i);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_codec_round_trips() {
        assert_eq!(to_le_bytes(0x0210, 2), vec![0x10, 0x02]);
        assert_eq!(to_be_bytes(0x0210, 2), vec![0x02, 0x10]);
        assert_eq!(from_le_bytes(&[0x10, 0x02]), 0x0210);
        assert_eq!(from_le_bytes(&[]), 0);
    }
}
