//! # Radio controller
//!
//! The supervisor that turns the tuner driver and the demodulation
//! pipeline into a radio: it sequences device open/close, moves
//! sample blocks from the USB reader to the decoder worker under a
//! bounded in-flight budget, retunes, scans, and feeds the audio
//! sink.

pub mod audio;
pub mod controller;
pub mod decoder;
pub mod device;

pub use crate::{
    audio::{
        AudioSink,
        RecordingSink,
    },
    controller::{
        Radio,
        ScanParams,
    },
    device::{
        SdrBackend,
        SdrProvider,
        UsbProvider,
    },
};

/// Errors surfaced through the controller's error handler (and from
/// `start`).
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("permission to open the USB device was denied")]
    PermissionDenied,

    #[error("no compatible RTL-SDR device found")]
    DeviceNotFound,

    #[error("unsupported tuner chip")]
    UnsupportedTuner,

    #[error("tuner PLL failed to lock")]
    PllNotLocked,

    #[error(transparent)]
    Transport(#[from] airwave_rtlsdr::TransportError),

    #[error("the decoder worker died")]
    DecoderDead,
}

impl From<airwave_rtlsdr::Error> for RadioError {
    fn from(error: airwave_rtlsdr::Error) -> Self {
        use airwave_rtlsdr::Error;
        match error {
            Error::PermissionDenied => RadioError::PermissionDenied,
            Error::DeviceNotFound => RadioError::DeviceNotFound,
            Error::UnsupportedTuner => RadioError::UnsupportedTuner,
            Error::PllNotLocked => RadioError::PllNotLocked,
            Error::Transport(transport) => RadioError::Transport(transport),
        }
    }
}
