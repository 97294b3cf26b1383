//! Per-modulation decoders: each one wires the primitives from
//! [`crate::demod`] and [`crate::filters`] into a chain that ends at
//! 48 kHz stereo audio.

mod am;
mod nbfm;
mod ssb;
mod wbfm;

pub use self::{
    am::AmDecoder,
    nbfm::NbfmDecoder,
    ssb::SsbDecoder,
    wbfm::WbfmDecoder,
};
use crate::samples::{
    Samples,
    StereoAudio,
};

/// The modulation to receive. Carries the per-mode tuning knobs the
/// UI exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Wbfm,
    Nbfm { max_f: u32 },
    Am { bandwidth: u32 },
    Ssb { bandwidth: u32, upper: bool },
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Wbfm
    }
}

/// A block decoder for one modulation. Fed consecutive interleaved
/// I/Q blocks; keeps its filter and oscillator state between calls.
pub trait Decoder: Send {
    /// Decodes one block. `in_stereo` asks for stereo where the mode
    /// supports it; mono modes ignore it.
    fn decode(&mut self, samples: &Samples, in_stereo: bool) -> StereoAudio;
}

/// Builds a fresh decoder for `mode`, sized for the given input and
/// output rates.
pub fn make_decoder(mode: Mode, in_rate: u32, out_rate: u32) -> Box<dyn Decoder> {
    match mode {
        Mode::Wbfm => Box::new(WbfmDecoder::new(in_rate, out_rate)),
        Mode::Nbfm { max_f } => Box::new(NbfmDecoder::new(in_rate, out_rate, max_f)),
        Mode::Am { bandwidth } => Box::new(AmDecoder::new(in_rate, out_rate, bandwidth)),
        Mode::Ssb { bandwidth, upper } => {
            Box::new(SsbDecoder::new(in_rate, out_rate, bandwidth, upper))
        }
    }
}
