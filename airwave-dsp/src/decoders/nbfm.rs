//! Narrowband FM (amateur and utility voice).

use crate::{
    coeffs::get_lowpass_fir_coeffs,
    decoders::Decoder,
    demod::FmDemodulator,
    filters::Downsampler,
    samples::{
        Samples,
        StereoAudio,
    },
};

const FILTER_FREQ: f32 = 8_000.0;
const FILTER_LEN: usize = 41;

/// Narrowband FM decoder. The intermediate rate scales with the
/// deviation so the discriminator always has headroom, then the audio
/// comes back down to the output rate.
pub struct NbfmDecoder {
    demodulator: FmDemodulator,
    down_sampler: Downsampler,
}

impl NbfmDecoder {
    pub fn new(in_rate: u32, out_rate: u32, max_f: u32) -> Self {
        let multiple = 1 + (max_f - 1) * 7 / 75_000;
        let inter_rate = 48_000 * multiple;
        let filter_coefs = get_lowpass_fir_coeffs(inter_rate, FILTER_FREQ, FILTER_LEN);
        Self {
            demodulator: FmDemodulator::new(
                in_rate,
                inter_rate,
                max_f,
                max_f as f32 * 0.8,
                351,
            ),
            down_sampler: Downsampler::new(inter_rate, out_rate, &filter_coefs),
        }
    }
}

impl Decoder for NbfmDecoder {
    fn decode(&mut self, samples: &Samples, _in_stereo: bool) -> StereoAudio {
        let demodulated = self.demodulator.demodulate_tuned(samples);
        let left = self.down_sampler.downsample(&demodulated);
        StereoAudio {
            right: left.clone(),
            left,
            stereo: false,
            signal_level: self.demodulator.rel_signal_power().powf(0.17),
        }
    }
}
