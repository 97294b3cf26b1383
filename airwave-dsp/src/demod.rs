//! Demodulator primitives: one struct per modulation, each consuming
//! interleaved I/Q blocks and producing baseband audio.

use std::f32::consts::{
    FRAC_PI_2,
    TAU,
};

use crate::{
    coeffs::{
        get_hilbert_coeffs,
        get_lowpass_fir_coeffs,
    },
    filters::{
        ExpAverage,
        FirFilter,
        IqDownsampler,
    },
    samples::Samples,
};

/// Sum-of-squares per sample below which a block is considered empty
/// air.
const CARRIER_THRESHOLD: f32 = 0.002;

/// First-quadrant polynomial approximation of atan. Good to about
/// 0.005 rad, which is far below the noise floor of an 8-bit tuner,
/// and much cheaper than the libm call in the per-sample loop.
fn fast_atan2(y: f32, x: f32) -> f32 {
    let mut sgn = 1.0;
    let mut y = y;
    if y < 0.0 {
        sgn = -sgn;
        y = -y;
    }
    let mut ang = 0.0;
    let div;
    if x == y {
        div = 1.0;
    }
    else if x > y {
        div = y / x;
    }
    else {
        ang = -FRAC_PI_2;
        div = x / y;
        sgn = -sgn;
    }
    ang += div
        / (0.98419158358617365 + div * (0.093485702629671305 + div * 0.19556307900617517));
    sgn * ang
}

/// FM frequency discriminator.
///
/// Filters and downsamples the I/Q stream, then reads the frequency as
/// the angle between consecutive samples.
pub struct FmDemodulator {
    ampl_conv: f32,
    downsampler: IqDownsampler,
    last_i: f32,
    last_q: f32,
    rel_signal_power: f32,
    has_carrier: bool,
}

impl FmDemodulator {
    pub fn new(in_rate: u32, out_rate: u32, max_f: u32, filter_freq: f32, kernel_len: usize) -> Self {
        let coefficients = get_lowpass_fir_coeffs(in_rate, filter_freq, kernel_len);
        Self {
            ampl_conv: out_rate as f32 / (TAU * max_f as f32),
            downsampler: IqDownsampler::new(in_rate, out_rate, &coefficients),
            last_i: 0.0,
            last_q: 0.0,
            rel_signal_power: 0.0,
            has_carrier: false,
        }
    }

    pub fn demodulate_tuned(&mut self, samples: &Samples) -> Samples {
        let iq = self.downsampler.downsample(samples);
        let out_len = iq.len();
        let mut out = Vec::with_capacity(out_len);
        let mut sig_sqr_sum = 0.0;
        for n in 0..out_len {
            let (i, q) = (iq.i[n], iq.q[n]);
            let real = self.last_i * i + self.last_q * q;
            let imag = self.last_i * q - i * self.last_q;
            out.push(fast_atan2(imag, real) * self.ampl_conv);
            self.last_i = i;
            self.last_q = q;
            sig_sqr_sum += i * i;
        }
        self.has_carrier = sig_sqr_sum > CARRIER_THRESHOLD * out_len as f32;
        self.rel_signal_power = if out_len == 0 {
            0.0
        }
        else {
            sig_sqr_sum / out_len as f32
        };
        Samples {
            data: out,
            rate: iq.rate,
        }
    }

    pub fn has_carrier(&self) -> bool {
        self.has_carrier
    }

    pub fn rel_signal_power(&self) -> f32 {
        self.rel_signal_power
    }
}

/// AM envelope detector with DC removal.
pub struct AmDemodulator {
    downsampler: IqDownsampler,
    rel_signal_power: f32,
    has_carrier: bool,
}

impl AmDemodulator {
    pub fn new(in_rate: u32, out_rate: u32, filter_freq: f32, kernel_len: usize) -> Self {
        let coefficients = get_lowpass_fir_coeffs(in_rate, filter_freq, kernel_len);
        Self {
            downsampler: IqDownsampler::new(in_rate, out_rate, &coefficients),
            rel_signal_power: 0.0,
            has_carrier: false,
        }
    }

    pub fn demodulate_tuned(&mut self, samples: &Samples) -> Samples {
        let iq = self.downsampler.downsample(samples);
        let out_len = iq.len();
        if out_len == 0 {
            return Samples::new(Vec::new(), iq.rate);
        }
        let i_avg: f32 = iq.i.iter().sum::<f32>() / out_len as f32;
        let q_avg: f32 = iq.q.iter().sum::<f32>() / out_len as f32;

        let mut out = Vec::with_capacity(out_len);
        let mut sig_sum = 0.0;
        let mut sig_sqr_sum = 0.0;
        for n in 0..out_len {
            let i = iq.i[n] - i_avg;
            let q = iq.q[n] - q_avg;
            let power = i * i + q * q;
            let ampl = power.sqrt();
            out.push(ampl);
            sig_sum += ampl;
            sig_sqr_sum += power;
        }
        // the mean amplitude is the carrier; audio is the excursion
        // around it
        let half_point = sig_sum / out_len as f32;
        if half_point > 0.0 {
            for sample in &mut out {
                *sample = (*sample - half_point) / half_point;
            }
        }
        self.has_carrier = sig_sqr_sum > CARRIER_THRESHOLD * out_len as f32;
        self.rel_signal_power = sig_sqr_sum / out_len as f32;
        Samples {
            data: out,
            rate: iq.rate,
        }
    }

    pub fn has_carrier(&self) -> bool {
        self.has_carrier
    }

    pub fn rel_signal_power(&self) -> f32 {
        self.rel_signal_power
    }
}

/// Single-sideband demodulator using the phasing method.
///
/// The Q arm goes through a Hilbert kernel, the I arm through a
/// matching delay; their sum or difference selects the upper or lower
/// sideband, which then passes a band-limiting filter and a simple
/// two-speed AGC.
pub struct SsbDemodulator {
    downsampler: IqDownsampler,
    delay: FirFilter,
    hilbert: FirFilter,
    band_filter: FirFilter,
    hilbert_mul: f32,
    power_short: ExpAverage,
    power_long: ExpAverage,
    rel_signal_power: f32,
    has_carrier: bool,
}

impl SsbDemodulator {
    pub fn new(in_rate: u32, out_rate: u32, filter_freq: f32, upper: bool, kernel_len: usize) -> Self {
        let coefficients = get_lowpass_fir_coeffs(in_rate, 10_000.0, 51);
        let hilbert_coeffs = get_hilbert_coeffs(kernel_len);
        let mut delay_coeffs = vec![0.0; hilbert_coeffs.len()];
        delay_coeffs[hilbert_coeffs.len() / 2] = 1.0;
        let band_coeffs = get_lowpass_fir_coeffs(out_rate, filter_freq, kernel_len);
        Self {
            downsampler: IqDownsampler::new(in_rate, out_rate, &coefficients),
            delay: FirFilter::new(&delay_coeffs, 1),
            hilbert: FirFilter::new(&hilbert_coeffs, 1),
            band_filter: FirFilter::new(&band_coeffs, 1),
            hilbert_mul: if upper { -1.0 } else { 1.0 },
            power_short: ExpAverage::new(out_rate / 10),
            power_long: ExpAverage::new(out_rate),
            rel_signal_power: 0.0,
            has_carrier: false,
        }
    }

    pub fn demodulate_tuned(&mut self, samples: &Samples) -> Samples {
        let iq = self.downsampler.downsample(samples);
        let out_len = iq.len();
        self.delay.load(&iq.i);
        self.hilbert.load(&iq.q);
        let mut sideband = Vec::with_capacity(out_len);
        for n in 0..out_len {
            sideband.push(self.delay.delayed(n) + self.hilbert.get(n) * self.hilbert_mul);
        }
        self.band_filter.load(&sideband);
        let mut out = Vec::with_capacity(out_len);
        let mut sig_sqr_sum = 0.0;
        for n in 0..out_len {
            let sig = self.band_filter.get(n);
            let power = sig * sig;
            sig_sqr_sum += power;
            let short = self.power_short.add(power);
            let long = self.power_long.add(power);
            let envelope = short.max(long).max(1.0 / 32768.0);
            out.push(sig * 0.9 / envelope.sqrt());
        }
        self.has_carrier = sig_sqr_sum > CARRIER_THRESHOLD * out_len as f32;
        self.rel_signal_power = if out_len == 0 {
            0.0
        }
        else {
            sig_sqr_sum / out_len as f32
        };
        Samples {
            data: out,
            rate: iq.rate,
        }
    }

    pub fn has_carrier(&self) -> bool {
        self.has_carrier
    }

    pub fn rel_signal_power(&self) -> f32 {
        self.rel_signal_power
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn fast_atan2_tracks_libm() {
        for &(y, x) in &[
            (0.0f32, 1.0f32),
            (1.0, 1.0),
            (1.0, 0.5),
            (-0.3, 0.8),
            (0.7, -0.7),
            (-1.0, -0.1),
        ] {
            // the polynomial only covers |angle| <= pi/2 around the
            // x axis; the discriminator never sees more than that at
            // sane deviations
            if x > 0.0 || y.abs() > x.abs() {
                assert_abs_diff_eq!(fast_atan2(y, x), y.atan2(x), epsilon = 0.01);
            }
        }
    }

    #[test]
    fn fm_discriminator_reads_frequency() {
        // constant +5 kHz offset tone must demodulate to a constant
        // level of 5/75
        let rate = 336_000u32;
        let mut demod = FmDemodulator::new(rate, 48_000, 75_000, 67_500.0, 101);
        let mut data = Vec::new();
        for n in 0..(rate as usize / 5) {
            let phase = TAU * 5000.0 * n as f32 / rate as f32;
            data.push(phase.cos());
            data.push(phase.sin());
        }
        let out = demod.demodulate_tuned(&Samples::new(data, rate));
        assert!(demod.has_carrier());
        let settled = &out.data[out.data.len() / 2..];
        let mean: f32 = settled.iter().sum::<f32>() / settled.len() as f32;
        assert_abs_diff_eq!(mean, 5000.0 / 75_000.0, epsilon = 0.002);
    }

    #[test]
    fn fm_flags_missing_carrier() {
        let rate = 336_000u32;
        let mut demod = FmDemodulator::new(rate, 48_000, 75_000, 67_500.0, 101);
        let data = vec![0.0f32; rate as usize / 10];
        demod.demodulate_tuned(&Samples::new(data, rate));
        assert!(!demod.has_carrier());
    }

    #[test]
    fn am_recovers_the_envelope() {
        // (1 + 0.5 sin wt) on a 1 kHz residual carrier
        let rate = 48_000u32;
        let mut demod = AmDemodulator::new(rate, 48_000, 5000.0, 51);
        let mut data = Vec::new();
        for n in 0..rate as usize {
            let t = n as f32 / rate as f32;
            let m = 0.5 * (TAU * 600.0 * t).sin();
            let carrier = TAU * 1000.0 * t;
            data.push(0.5 * (1.0 + m) * carrier.cos());
            data.push(0.5 * (1.0 + m) * carrier.sin());
        }
        let out = demod.demodulate_tuned(&Samples::new(data, rate));
        assert!(demod.has_carrier());
        // output is normalized modulation; peak should be near 0.5
        let settled = &out.data[out.data.len() / 2..];
        let peak = settled.iter().fold(0.0f32, |acc, &x| acc.max(x));
        assert_abs_diff_eq!(peak, 0.5, epsilon = 0.05);
    }
}
