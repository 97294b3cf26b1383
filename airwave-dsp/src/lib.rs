//! # Demodulation pipeline for the airwave receiver
//!
//! This crate turns blocks of raw 8-bit I/Q samples into 48 kHz stereo
//! audio. It provides the filtering and resampling primitives, the
//! per-modulation demodulators, and the mode decoders built on top of
//! them.
//!
//! Everything here is plain block-at-a-time DSP: a decoder is fed one
//! sample block per call and keeps whatever history it needs (filter
//! tails, oscillator phase, averager state) between calls, so
//! consecutive blocks splice without seams.

pub mod coeffs;
pub mod decoders;
pub mod demod;
pub mod filters;
pub mod samples;
pub mod shifter;
pub mod stereo;

pub use crate::{
    decoders::{
        Decoder,
        Mode,
        make_decoder,
    },
    samples::{
        Samples,
        StereoAudio,
        samples_from_u8,
    },
    shifter::FrequencyShifter,
};
