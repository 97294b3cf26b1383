//! FM stereo pilot recovery.

use std::f64::consts::TAU;

use crate::{
    filters::ExpAverage,
    samples::Samples,
};

/// The separated L-R signal, plus whether the pilot was actually
/// there.
#[derive(Clone, Debug)]
pub struct StereoSignal {
    pub pilot_detected: bool,
    pub diff: Samples,
}

/// Extracts the stereo difference channel from demodulated wideband
/// FM.
///
/// An internal oscillator chases the 19 kHz pilot. Rather than compute
/// a sine per sample, the oscillator steps through a precomputed table
/// of rotation increments covering pilot - 40 Hz .. pilot + 40 Hz in
/// 0.01 Hz steps (8001 entries); the correlation between the signal
/// and the oscillator's two phases picks the increment. Multiplying
/// the signal by the doubled oscillator shifts the 38 kHz L-R
/// subcarrier down to audio.
pub struct StereoSeparator {
    sin_table: Vec<f32>,
    cos_table: Vec<f32>,
    sine: f32,
    cosine: f32,
    iavg: ExpAverage,
    qavg: ExpAverage,
    cavg: ExpAverage,
}

impl StereoSeparator {
    const CORR_THRES: f32 = 4.0;

    pub fn new(sample_rate: u32, pilot_freq: u32) -> Self {
        let mut sin_table = vec![0.0f32; 8001];
        let mut cos_table = vec![0.0f32; 8001];
        for i in 0..8001usize {
            let freq =
                (f64::from(pilot_freq) + i as f64 / 100.0 - 40.0) * TAU / f64::from(sample_rate);
            sin_table[i] = freq.sin() as f32;
            cos_table[i] = freq.cos() as f32;
        }
        Self {
            sin_table,
            cos_table,
            sine: 0.0,
            cosine: 1.0,
            iavg: ExpAverage::new((sample_rate as f32 * 0.03) as u32),
            qavg: ExpAverage::new((sample_rate as f32 * 0.03) as u32),
            cavg: ExpAverage::new((sample_rate as f32 * 0.15) as u32),
        }
    }

    pub fn separate(&mut self, samples: &Samples) -> StereoSignal {
        let mut out = samples.clone();
        for sample in &mut out.data {
            let hdev = self.qavg.add(*sample * self.cosine);
            let vdev = self.iavg.add(*sample * self.sine);
            *sample *= self.sine * self.cosine * 2.0;
            let corr = if vdev > 0.0 {
                (hdev / vdev).clamp(-4.0, 4.0)
            }
            else if hdev == 0.0 {
                0.0
            }
            else if hdev > 0.0 {
                4.0
            }
            else {
                -4.0
            };
            let idx = ((corr + 4.0) * 1000.0).round() as usize;
            let sine = self.sine * self.cos_table[idx] + self.cosine * self.sin_table[idx];
            self.cosine = self.cosine * self.cos_table[idx] - self.sine * self.sin_table[idx];
            self.sine = sine;
            self.cavg.add(corr * corr);
        }
        StereoSignal {
            pilot_detected: self.cavg.get() < Self::CORR_THRES,
            diff: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 336_000;
    const PILOT: u32 = 19_000;

    fn composite(pilot_ampl: f32, diff_tone: f32, len: usize) -> Samples {
        let mut data = Vec::with_capacity(len);
        for n in 0..len {
            let t = n as f64 / f64::from(RATE);
            let pilot = pilot_ampl * (TAU * f64::from(PILOT) * t).cos() as f32;
            let subcarrier =
                (TAU * 2.0 * f64::from(PILOT) * t).cos() as f32 * (TAU * f64::from(diff_tone) * t).sin() as f32;
            data.push(pilot + 0.45 * subcarrier);
        }
        Samples::new(data, RATE)
    }

    #[test]
    fn locks_onto_a_present_pilot() {
        let mut separator = StereoSeparator::new(RATE, PILOT);
        let signal = separator.separate(&composite(0.1, 1000.0, RATE as usize / 2));
        assert!(signal.pilot_detected);
    }

    #[test]
    fn reports_absence_within_half_a_second() {
        let mut separator = StereoSeparator::new(RATE, PILOT);
        // same composite, pilot amplitude zero
        let signal = separator.separate(&composite(0.0, 1000.0, RATE as usize / 2));
        assert!(!signal.pilot_detected);
    }
}
