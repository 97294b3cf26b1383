//! Wideband (broadcast) FM.

use crate::{
    coeffs::get_lowpass_fir_coeffs,
    decoders::Decoder,
    demod::FmDemodulator,
    filters::{
        Deemphasizer,
        Downsampler,
    },
    samples::{
        Samples,
        StereoAudio,
    },
    stereo::StereoSeparator,
};

const INTER_RATE: u32 = 336_000;
const MAX_F: u32 = 75_000;
const PILOT_FREQ: u32 = 19_000;
const DEEMPH_TC: u32 = 50;
const FILTER_FREQ: f32 = 10_000.0;
const FILTER_LEN: usize = 41;

/// Broadcast FM decoder with stereo pilot recovery and de-emphasis.
pub struct WbfmDecoder {
    demodulator: FmDemodulator,
    mono_sampler: Downsampler,
    stereo_sampler: Downsampler,
    stereo_separator: StereoSeparator,
    left_deemph: Deemphasizer,
    right_deemph: Deemphasizer,
}

impl WbfmDecoder {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        let filter_coefs = get_lowpass_fir_coeffs(INTER_RATE, FILTER_FREQ, FILTER_LEN);
        Self {
            demodulator: FmDemodulator::new(
                in_rate,
                INTER_RATE,
                MAX_F,
                MAX_F as f32 * 0.9,
                101,
            ),
            mono_sampler: Downsampler::new(INTER_RATE, out_rate, &filter_coefs),
            stereo_sampler: Downsampler::new(INTER_RATE, out_rate, &filter_coefs),
            stereo_separator: StereoSeparator::new(INTER_RATE, PILOT_FREQ),
            left_deemph: Deemphasizer::new(out_rate, DEEMPH_TC),
            right_deemph: Deemphasizer::new(out_rate, DEEMPH_TC),
        }
    }
}

impl Decoder for WbfmDecoder {
    fn decode(&mut self, samples: &Samples, in_stereo: bool) -> StereoAudio {
        let demodulated = self.demodulator.demodulate_tuned(samples);

        let left = self.mono_sampler.downsample(&demodulated);
        let mut output = StereoAudio {
            right: left.clone(),
            left,
            stereo: false,
            signal_level: self.demodulator.rel_signal_power().powf(0.17),
        };

        if in_stereo {
            let stereo = self.stereo_separator.separate(&demodulated);
            if stereo.pilot_detected {
                let diff_audio = self.stereo_sampler.downsample(&stereo.diff);
                for (n, &diff) in diff_audio.data.iter().enumerate() {
                    output.right.data[n] -= 2.0 * diff;
                    output.left.data[n] += 2.0 * diff;
                }
                output.stereo = true;
            }
        }

        self.left_deemph.in_place(&mut output.left);
        self.right_deemph.in_place(&mut output.right);
        output
    }
}
