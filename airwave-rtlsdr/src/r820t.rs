//! R820T mixer/PLL driver.
//!
//! The tuner hangs off the RTL2832U's I2C repeater. It has no data
//! path of its own; everything here is control: initialization,
//! frequency selection, gain, and power-down.
//!
//! The register tables are magic values from the chip's
//! reverse-engineered production driver and must not be cleaned up or
//! reordered.

use crate::{
    Error,
    registers::RtlCom,
    transport::UsbTransport,
};

/// The tuner's I2C address.
const I2C_ADDR: u8 = 0x34;

/// First shadowed register; the shadow covers 0x05..=0x1f.
const REG_SHADOW_START: u8 = 0x05;

/// Initial values for registers 0x05..=0x1f.
const REGISTERS: [u8; 27] = [
    0x83, 0x32, 0x75, 0xc0, 0x40, 0xd6, 0x6c, 0xf5, 0x63, 0x75, 0x68, 0x6c, 0x83, 0x80, 0x00,
    0x0f, 0x00, 0xc0, 0x30, 0x48, 0xcc, 0x60, 0x00, 0x54, 0xae, 0x4a, 0xc0,
];

/// Multiplexer configurations per frequency band: lowest frequency in
/// MHz, then the values for the open-drain, RF filter, and tracking
/// filter registers.
const MUX_CFGS: [(u32, u8, u8, u8); 15] = [
    (0, 0x08, 0x02, 0xdf),
    (50, 0x08, 0x02, 0xbe),
    (55, 0x08, 0x02, 0x8b),
    (60, 0x08, 0x02, 0x7b),
    (65, 0x08, 0x02, 0x69),
    (70, 0x08, 0x02, 0x58),
    (75, 0x00, 0x02, 0x44),
    (90, 0x00, 0x02, 0x34),
    (110, 0x00, 0x02, 0x24),
    (140, 0x00, 0x02, 0x14),
    (180, 0x00, 0x02, 0x13),
    (250, 0x00, 0x02, 0x11),
    (280, 0x00, 0x02, 0x00),
    (310, 0x00, 0x41, 0x00),
    (588, 0x00, 0x40, 0x00),
];

/// Nibble lookup to reverse the bits in a byte; the R820T returns
/// register contents bit-reversed.
const BIT_REVS: [u8; 16] = [
    0x0, 0x8, 0x4, 0xc, 0x2, 0xa, 0x6, 0xe, 0x1, 0x9, 0x5, 0xd, 0x3, 0xb, 0x7, 0xf,
];

fn reverse_bits(byte: u8) -> u8 {
    (BIT_REVS[usize::from(byte & 0x0f)] << 4) | BIT_REVS[usize::from(byte >> 4)]
}

/// The R820T tuner.
pub struct R820t<C> {
    com: RtlCom<C>,
    xtal_freq: u32,
    shadow: [u8; 27],
    has_pll_lock: bool,
}

impl<C: UsbTransport> R820t<C> {
    pub fn new(com: RtlCom<C>, xtal_freq: u32) -> Self {
        Self {
            com,
            xtal_freq,
            shadow: [0; 27],
            has_pll_lock: false,
        }
    }

    /// Brings the tuner out of reset: default registers, filter
    /// calibration, and the fixed init sequence.
    pub async fn init(&mut self) -> Result<(), Error> {
        self.init_registers().await?;
        self.init_electronics().await?;
        Ok(())
    }

    /// Tunes to `freq` Hz. Returns the frequency the PLL actually
    /// settled on, or [`Error::PllNotLocked`] if it would not lock.
    pub async fn set_frequency(&mut self, freq: u32) -> Result<u32, Error> {
        self.set_mux(freq).await?;
        let actual = self.set_pll(freq).await?;
        if !self.has_pll_lock {
            return Err(Error::PllNotLocked);
        }
        tracing::debug!(freq, actual, "tuner frequency set");
        Ok(actual)
    }

    /// Hands gain control to the tuner's own AGC.
    pub async fn set_auto_gain(&mut self) -> Result<(), Error> {
        self.write_each(&[(0x05, 0x00, 0x10), (0x07, 0x10, 0x10), (0x0c, 0x0b, 0x9f)])
            .await
    }

    /// Sets a fixed gain in dB. The dB figure maps onto the chip's 29
    /// LNA/mixer step pairs through a piecewise polynomial fit of its
    /// gain curve.
    pub async fn set_manual_gain(&mut self, gain_db: f32) -> Result<(), Error> {
        let step = gain_step(gain_db);
        let lna_value = (step + 1) / 2;
        let mixer_value = step / 2;
        self.write_each(&[
            (0x05, 0x10, 0x10),
            (0x07, 0x00, 0x10),
            (0x0c, 0x08, 0x9f),
            (0x05, lna_value, 0x0f),
            (0x07, mixer_value, 0x0f),
        ])
        .await
    }

    /// Powers the tuner down.
    pub async fn standby(&mut self) -> Result<(), Error> {
        self.write_each(&[
            (0x06, 0xb1, 0xff),
            (0x05, 0xa0, 0xff),
            (0x07, 0x3a, 0xff),
            (0x08, 0x40, 0xff),
            (0x09, 0xc0, 0xff),
            (0x0a, 0x36, 0xff),
            (0x0c, 0x35, 0xff),
            (0x0f, 0x68, 0xff),
            (0x11, 0x03, 0xff),
            (0x17, 0xf4, 0xff),
            (0x19, 0x0c, 0xff),
        ])
        .await
    }

    pub fn has_pll_lock(&self) -> bool {
        self.has_pll_lock
    }

    async fn init_registers(&mut self) -> Result<(), Error> {
        self.shadow = REGISTERS;
        self.com
            .i2c_write_buffer(I2C_ADDR, REG_SHADOW_START, &REGISTERS)
            .await?;
        Ok(())
    }

    async fn init_electronics(&mut self) -> Result<(), Error> {
        self.write_each(&[(0x0c, 0x00, 0x0f), (0x13, 49, 0x3f), (0x1d, 0x00, 0x38)])
            .await?;
        let filter_cap = self.calibrate_filter().await?;
        self.write_each(&[
            (0x0a, 0x10 | filter_cap, 0x1f),
            (0x0b, 0x6b, 0xef),
            (0x07, 0x00, 0x80),
            (0x06, 0x10, 0x30),
            (0x1e, 0x40, 0x60),
            (0x05, 0x00, 0x80),
            (0x1f, 0x00, 0x80),
            (0x0f, 0x00, 0x80),
            (0x19, 0x60, 0x60),
            (0x1d, 0xe5, 0xc7),
            (0x1c, 0x24, 0xf8),
            (0x0d, 0x53, 0xff),
            (0x0e, 0x75, 0xff),
            (0x05, 0x00, 0x60),
            (0x06, 0x00, 0x08),
            (0x11, 0x38, 0x08),
            (0x17, 0x30, 0x30),
            (0x0a, 0x40, 0x60),
            (0x1d, 0x00, 0x38),
            (0x1c, 0x00, 0x04),
            (0x06, 0x00, 0x40),
            (0x1a, 0x30, 0x30),
            (0x1d, 0x18, 0x38),
            (0x1c, 0x24, 0x04),
            (0x1e, 0x0d, 0x1f),
            (0x1a, 0x20, 0x30),
        ])
        .await
    }

    /// Runs the filter calibration. A nonzero capacitance code on the
    /// first run is suspect, so the calibration runs once more and the
    /// second answer stands.
    async fn calibrate_filter(&mut self) -> Result<u8, Error> {
        let filter_cap = self.run_filter_cal().await?;
        if filter_cap != 0 {
            return self.run_filter_cal().await;
        }
        Ok(filter_cap)
    }

    async fn run_filter_cal(&mut self) -> Result<u8, Error> {
        self.write_each(&[(0x0b, 0x6b, 0x60), (0x0f, 0x04, 0x04), (0x10, 0x00, 0x03)])
            .await?;
        self.set_pll(56_000_000).await?;
        if !self.has_pll_lock {
            return Err(Error::PllNotLocked);
        }
        // pulse the calibration start bit, then read the result
        self.write_each(&[(0x0b, 0x10, 0x10), (0x0b, 0x00, 0x10), (0x0f, 0x00, 0x04)])
            .await?;
        let data = self.read_reg_buffer(0x00, 5).await?;
        let filter_cap = data[4] & 0x0f;
        Ok(if filter_cap == 0x0f { 0 } else { filter_cap })
    }

    async fn set_mux(&mut self, freq: u32) -> Result<(), Error> {
        let freq_mhz = freq / 1_000_000;
        let mut index = 0;
        while index < MUX_CFGS.len() - 1 && MUX_CFGS[index + 1].0 <= freq_mhz {
            index += 1;
        }
        let cfg = MUX_CFGS[index];
        self.write_each(&[
            (0x17, cfg.1, 0x08),
            (0x1a, cfg.2, 0xc3),
            (0x1b, cfg.3, 0xff),
            (0x10, 0x00, 0x0b),
            (0x08, 0x00, 0x3f),
            (0x09, 0x00, 0x3f),
        ])
        .await
    }

    async fn set_pll(&mut self, freq: u32) -> Result<u32, Error> {
        let pll_ref = u64::from(self.xtal_freq);
        let pll_ref_khz = u64::from(self.xtal_freq) / 1000;
        self.write_each(&[(0x10, 0x00, 0x10), (0x1a, 0x00, 0x0c), (0x12, 0x80, 0xe0)])
            .await?;
        let mut div_num = ((1_770_000_000.0 / f64::from(freq)).log2().floor() as i32).min(6);
        let data = self.read_reg_buffer(0x00, 5).await?;
        let vco_fine_tune = (data[4] & 0x30) >> 4;
        if vco_fine_tune > 2 {
            div_num -= 1;
        }
        else if vco_fine_tune < 2 {
            div_num += 1;
        }
        self.write_reg_mask(0x10, (div_num as u8) << 5, 0xe0).await?;

        let mix_div = 1u64 << (div_num + 1);
        let vco_freq = u64::from(freq) * mix_div;
        let nint = vco_freq / (2 * pll_ref);
        let vco_fra = (vco_freq - 2 * pll_ref * nint) / 1000;
        if !(13..=63).contains(&nint) {
            self.has_pll_lock = false;
            return Err(Error::PllNotLocked);
        }

        let ni = (nint - 13) / 4;
        let si = nint - 4 * ni - 13;
        self.write_each(&[
            (0x14, (ni + (si << 6)) as u8, 0xff),
            (0x12, if vco_fra == 0 { 0x08 } else { 0x00 }, 0x08),
        ])
        .await?;

        let sdm = u64::min(65535, 32768 * vco_fra / pll_ref_khz);
        self.write_each(&[(0x16, (sdm >> 8) as u8, 0xff), (0x15, (sdm & 0xff) as u8, 0xff)])
            .await?;

        self.has_pll_lock = self.get_pll_lock().await?;
        Ok((2 * pll_ref * (nint * 65536 + sdm) / 65536 / mix_div) as u32)
    }

    /// Checks the PLL lock bit; one retry with a stronger charge-pump
    /// current before giving up.
    async fn get_pll_lock(&mut self) -> Result<bool, Error> {
        let data = self.read_reg_buffer(0x00, 3).await?;
        if data[2] & 0x40 != 0 {
            return Ok(true);
        }
        self.write_reg_mask(0x12, 0x60, 0xe0).await?;
        let data = self.read_reg_buffer(0x00, 3).await?;
        Ok(data[2] & 0x40 != 0)
    }

    /// Writes the masked bits of a register, going through the shadow
    /// so that unmasked bits keep their last written value.
    async fn write_reg_mask(&mut self, reg: u8, value: u8, mask: u8) -> Result<(), Error> {
        let index = usize::from(reg - REG_SHADOW_START);
        let merged = (self.shadow[index] & !mask) | (value & mask);
        self.shadow[index] = merged;
        self.com.i2c_write_reg(I2C_ADDR, reg, merged).await?;
        Ok(())
    }

    async fn write_each(&mut self, ops: &[(u8, u8, u8)]) -> Result<(), Error> {
        for &(reg, value, mask) in ops {
            self.write_reg_mask(reg, value, mask).await?;
        }
        Ok(())
    }

    /// Reads registers from the device. Reads bypass the shadow and
    /// arrive bit-reversed from the chip.
    async fn read_reg_buffer(&self, reg: u8, len: usize) -> Result<Vec<u8>, Error> {
        let raw = self.com.i2c_read_buffer(I2C_ADDR, reg, len).await?;
        Ok(raw.into_iter().map(reverse_bits).collect())
    }
}

/// Maps a gain in dB to one of the chip's 29 combined LNA/mixer
/// steps.
fn gain_step(gain_db: f32) -> u8 {
    let g = gain_db;
    let step = if g <= 15.0 {
        1.36 + g * (1.1118 + g * (-0.0786 + g * 0.0027))
    }
    else if g <= 41.5 {
        1.2068 + g * (0.4902 + g * 0.0016)
    }
    else {
        -3.1252 + g * (0.6536 + g * 0.0001)
    };
    (step.round() as i32).clamp(0, 28) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_reversal_swaps_nibble_mirrors() {
        assert_eq!(reverse_bits(0x00), 0x00);
        assert_eq!(reverse_bits(0xff), 0xff);
        assert_eq!(reverse_bits(0x01), 0x80);
        assert_eq!(reverse_bits(0x40), 0x02);
        assert_eq!(reverse_bits(0x69), 0x96);
    }

    #[test]
    fn mux_table_is_sorted_by_frequency() {
        for pair in MUX_CFGS.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[test]
    fn gain_step_mapping_is_monotonic_and_clamped() {
        let mut last = gain_step(0.0);
        for tenth in 1..=550 {
            let step = gain_step(tenth as f32 / 10.0);
            assert!(step >= last, "gain curve dips at {} dB", tenth as f32 / 10.0);
            last = step;
        }
        assert_eq!(gain_step(55.0), 28);
    }
}
