//! RTL2832U demodulator driver: chip bring-up, sample-rate
//! programming, and the bulk sample pump.

use crate::{
    Error,
    r820t::R820t,
    registers::{
        BLOCK_SYS,
        BLOCK_USB,
        RtlCom,
        SYS_DEMOD_CTL,
        SYS_DEMOD_CTL_1,
        USB_EPA_CTL,
        USB_EPA_MAXPKT,
        USB_SYSCTL,
    },
    transport::UsbTransport,
};

/// Frequency of the oscillator crystal.
const XTAL_FREQ: u32 = 28_800_000;

/// Intermediate frequency the R820T presents the signal at.
const IF_FREQ: u32 = 3_570_000;

/// Each I/Q sample is one byte of I and one byte of Q.
const BYTES_PER_SAMPLE: usize = 2;

/// An open RTL2832U with its R820T tuner.
///
/// Owns the USB connection for its whole `open`..`close` lifetime.
pub struct Rtl2832u<C> {
    com: RtlCom<C>,
    ppm: i32,
    gain: Option<f32>,
    tuner: Option<R820t<C>>,
    center_frequency: u32,
}

impl<C: UsbTransport> Rtl2832u<C> {
    /// `ppm` is the crystal's frequency error; `gain` is a fixed
    /// tuner gain in dB, or `None` for hardware AGC.
    pub fn new(conn: C, ppm: i32, gain: Option<f32>) -> Self {
        Self {
            com: RtlCom::new(conn),
            ppm,
            gain,
            tuner: None,
            center_frequency: 0,
        }
    }

    /// Initializes the chip into SDR mode and brings up the tuner.
    pub async fn open(&mut self) -> Result<(), Error> {
        // usb prelude: full-speed sysctl, max packet size, open the
        // sample endpoint
        self.com.write_reg(BLOCK_USB, USB_SYSCTL, 0x09, 1).await?;
        self.com.write_reg(BLOCK_USB, USB_EPA_MAXPKT, 0x0200, 2).await?;
        self.com.write_reg(BLOCK_USB, USB_EPA_CTL, 0x0210, 2).await?;

        self.com.transport().claim_interface().await?;

        // power on the demodulator and reset it
        self.com.write_reg(BLOCK_SYS, SYS_DEMOD_CTL_1, 0x22, 1).await?;
        self.com.write_reg(BLOCK_SYS, SYS_DEMOD_CTL, 0xe8, 1).await?;
        self.com.write_demod_reg(1, 0x01, 0x14, 1).await?;
        self.com.write_demod_reg(1, 0x01, 0x10, 1).await?;

        // clear the DDC shift and IF frequency registers
        self.com.write_demod_reg(1, 0x15, 0x00, 1).await?;
        self.com.write_demod_reg(1, 0x16, 0x0000, 2).await?;
        self.com.write_demod_reg(1, 0x18, 0x00, 1).await?;
        self.com.write_demod_reg(1, 0x19, 0x00, 1).await?;
        self.com.write_demod_reg(1, 0x1a, 0x00, 1).await?;
        self.com.write_demod_reg(1, 0x1b, 0x00, 1).await?;

        // default baseband FIR coefficients
        for (offset, &byte) in FIR_DEFAULT.iter().enumerate() {
            self.com
                .write_demod_reg(1, 0x1c + offset as u16, u32::from(byte), 1)
                .await?;
        }

        // enable SDR mode, disable DAGC
        self.com.write_demod_reg(0, 0x19, 0x05, 1).await?;

        // init FSM state-holding registers
        self.com.write_demod_reg(1, 0x93, 0xf0, 1).await?;
        self.com.write_demod_reg(1, 0x94, 0x0f, 1).await?;

        // disable AGC and the RF/IF AGC loop
        self.com.write_demod_reg(1, 0x11, 0x00, 1).await?;
        self.com.write_demod_reg(1, 0x04, 0x00, 1).await?;

        // disable the PID filter, keep the default ADC datapath
        self.com.write_demod_reg(0, 0x61, 0x60, 1).await?;
        self.com.write_demod_reg(0, 0x06, 0x80, 1).await?;

        // enable zero-IF input, DC estimation and IQ compensation
        self.com.write_demod_reg(1, 0xb1, 0x1b, 1).await?;

        // disable the 4.096 MHz clock output
        self.com.write_demod_reg(0, 0x0d, 0x83, 1).await?;

        let xtal_freq = self.xtal_freq();

        self.com.open_i2c().await?;
        let probe = self.com.i2c_read_reg(R820T_I2C_ADDR, 0).await?;
        if probe != R820T_CHIP_ID {
            self.com.close_i2c().await?;
            return Err(Error::UnsupportedTuner);
        }
        tracing::debug!(xtal_freq, "found R820T tuner");

        // route the tuner's IF through the demodulator's downconverter
        self.com.write_demod_reg(1, 0xb1, 0x1a, 1).await?;
        self.com.write_demod_reg(0, 0x08, 0x4d, 1).await?;
        let multiplier = -((i64::from(IF_FREQ) << 22) / i64::from(xtal_freq));
        self.com
            .write_demod_reg(1, 0x19, ((multiplier >> 16) & 0x3f) as u32, 1)
            .await?;
        self.com
            .write_demod_reg(1, 0x1a, ((multiplier >> 8) & 0xff) as u32, 1)
            .await?;
        self.com
            .write_demod_reg(1, 0x1b, (multiplier & 0xff) as u32, 1)
            .await?;
        self.com.write_demod_reg(1, 0x15, 0x01, 1).await?;

        let mut tuner = R820t::new(self.com.clone(), xtal_freq);
        tuner.init().await?;
        match self.gain {
            Some(gain_db) => tuner.set_manual_gain(gain_db).await?,
            None => tuner.set_auto_gain().await?,
        }
        self.com.close_i2c().await?;

        self.tuner = Some(tuner);
        Ok(())
    }

    /// Programs the sample rate and returns the rate the divider can
    /// actually produce.
    pub async fn set_sample_rate(&mut self, rate: u32) -> Result<u32, Error> {
        let ratio = ((u64::from(XTAL_FREQ) << 22) / u64::from(rate)) as u32 & 0x0fff_fffc;
        let actual_rate = ((u64::from(XTAL_FREQ) << 22) / u64::from(ratio)) as u32;
        let ppm_offset = -((f64::from(self.ppm) * (1i64 << 24) as f64 / 1e6).floor() as i64);
        self.com
            .write_demod_reg(1, 0x9f, (ratio >> 16) & 0xffff, 2)
            .await?;
        self.com.write_demod_reg(1, 0xa1, ratio & 0xffff, 2).await?;
        self.com
            .write_demod_reg(1, 0x3e, ((ppm_offset >> 8) & 0x3f) as u32, 1)
            .await?;
        self.com
            .write_demod_reg(1, 0x3f, (ppm_offset & 0xff) as u32, 1)
            .await?;
        // reset the demodulator so the new rate takes
        self.com.write_demod_reg(1, 0x01, 0x14, 1).await?;
        self.com.write_demod_reg(1, 0x01, 0x10, 1).await?;
        tracing::debug!(rate, actual_rate, "sample rate set");
        Ok(actual_rate)
    }

    /// Tunes the dongle so that `freq` lands at the demodulator's
    /// IF input.
    pub async fn set_center_frequency(&mut self, freq: u32) -> Result<u32, Error> {
        let tuner = self.tuner.as_mut().expect("tuner not open");
        self.com.open_i2c().await?;
        let result = tuner.set_frequency(freq + IF_FREQ).await;
        self.com.close_i2c().await?;
        let actual = result?;
        self.center_frequency = freq;
        Ok(actual - IF_FREQ)
    }

    pub fn center_frequency(&self) -> u32 {
        self.center_frequency
    }

    /// Drops whatever stale samples the chip has buffered.
    pub async fn reset_buffer(&self) -> Result<(), Error> {
        self.com.write_reg(BLOCK_USB, USB_EPA_CTL, 0x0210, 2).await?;
        self.com.write_reg(BLOCK_USB, USB_EPA_CTL, 0x0000, 2).await?;
        Ok(())
    }

    /// Reads `length` samples (twice that many bytes) from the bulk
    /// endpoint.
    pub async fn read_samples(&self, length: usize) -> Result<Vec<u8>, Error> {
        let buffer = self
            .com
            .transport()
            .bulk_read(length * BYTES_PER_SAMPLE)
            .await?;
        Ok(buffer)
    }

    /// Shuts the tuner down and releases the device.
    pub async fn close(&mut self) -> Result<(), Error> {
        if let Some(tuner) = self.tuner.as_mut() {
            self.com.open_i2c().await?;
            tuner.standby().await?;
            self.com.close_i2c().await?;
        }
        self.tuner = None;
        self.com.transport().release_interface().await?;
        Ok(())
    }

    fn xtal_freq(&self) -> u32 {
        (f64::from(XTAL_FREQ) * (1.0 + f64::from(self.ppm) / 1e6)).floor() as u32
    }
}

const R820T_I2C_ADDR: u8 = 0x34;
const R820T_CHIP_ID: u8 = 0x69;

/// Default baseband FIR: eight 8-bit taps followed by six packed
/// 12-bit taps.
const FIR_DEFAULT: [u8; 20] = [
    0xca, 0xdc, 0xd7, 0xd8, 0xe0, 0xf2, 0x0e, 0x35, // 8-bit taps
    0x06, 0x50, 0x9c, 0x0d, 0x71, 0x11, 0x14, 0x71, 0x74, 0x19, 0x41, 0xa5, // 12-bit taps
];
