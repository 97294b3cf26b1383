//! Single sideband (amateur voice below and above 10 MHz).

use crate::{
    decoders::Decoder,
    demod::SsbDemodulator,
    samples::{
        Samples,
        StereoAudio,
    },
};

const KERNEL_LEN: usize = 151;

/// SSB decoder, upper or lower sideband.
pub struct SsbDecoder {
    demodulator: SsbDemodulator,
}

impl SsbDecoder {
    pub fn new(in_rate: u32, out_rate: u32, bandwidth: u32, upper: bool) -> Self {
        Self {
            demodulator: SsbDemodulator::new(in_rate, out_rate, bandwidth as f32, upper, KERNEL_LEN),
        }
    }
}

impl Decoder for SsbDecoder {
    fn decode(&mut self, samples: &Samples, _in_stereo: bool) -> StereoAudio {
        let left = self.demodulator.demodulate_tuned(samples);
        StereoAudio {
            right: left.clone(),
            left,
            stereo: false,
            signal_level: 3.5 * self.demodulator.rel_signal_power().sqrt(),
        }
    }
}
