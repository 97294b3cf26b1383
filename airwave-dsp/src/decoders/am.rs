//! Amplitude modulation (medium wave and shortwave broadcast).

use crate::{
    decoders::Decoder,
    demod::AmDemodulator,
    samples::{
        Samples,
        StereoAudio,
    },
};

const KERNEL_LEN: usize = 351;

/// AM decoder: envelope detection straight to the output rate.
pub struct AmDecoder {
    demodulator: AmDemodulator,
}

impl AmDecoder {
    pub fn new(in_rate: u32, out_rate: u32, bandwidth: u32) -> Self {
        Self {
            demodulator: AmDemodulator::new(in_rate, out_rate, bandwidth as f32 / 2.0, KERNEL_LEN),
        }
    }
}

impl Decoder for AmDecoder {
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
