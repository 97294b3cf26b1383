//! # Native USB driver for RTL2832U dongles
//!
//! Talks to an RTL2832U-based DVB-T stick over plain vendor control
//! transfers and turns it into an SDR front end: the RTL2832U is put
//! into direct-sampling SDR mode and the R820T mixer/PLL behind it is
//! programmed over the chip's I2C repeater.
//!
//! The layering mirrors the hardware: [`transport`] moves bytes over
//! USB, [`registers`] addresses the chip's register blocks on top of
//! that, [`r820t`] and [`rtl2832u`] implement the two chips.

pub mod enumerate;
pub mod r820t;
pub mod registers;
pub mod rtl2832u;
pub mod transport;

pub use crate::{
    enumerate::{
        DeviceInfo,
        devices,
    },
    rtl2832u::Rtl2832u,
    transport::{
        TransportError,
        UsbConnection,
        UsbTransport,
    },
};

/// Errors returned by the tuner stack.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// USB permission refused when opening the device.
    #[error("permission to open the USB device was denied")]
    PermissionDenied,

    /// No dongle with a known vendor/product id is attached.
    #[error("no compatible RTL-SDR device found")]
    DeviceNotFound,

    /// The stick answered, but its tuner is not an R820T.
    #[error("unsupported tuner chip")]
    UnsupportedTuner,

    /// The R820T PLL would not lock at the requested frequency, even
    /// after the charge-pump retry.
    #[error("tuner PLL failed to lock")]
    PllNotLocked,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
