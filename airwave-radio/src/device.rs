//! The seam between the controller and the tuner hardware.
//!
//! The controller is written against these traits so its state
//! machine can be exercised with fake devices; the real
//! implementations are thin forwards to [`airwave_rtlsdr`].

use std::future::Future;

use airwave_rtlsdr::{
    Rtl2832u,
    UsbConnection,
    devices,
};

use crate::RadioError;

/// An SDR front end as the controller sees it.
pub trait SdrBackend: Send + Sync + 'static {
    /// Initializes the hardware; must be called before anything else.
    fn open(&mut self) -> impl Future<Output = Result<(), RadioError>> + Send;

    /// Returns the rate actually programmed.
    fn set_sample_rate(&mut self, rate: u32)
    -> impl Future<Output = Result<u32, RadioError>> + Send;

    fn set_center_frequency(
        &mut self,
        frequency: u32,
    ) -> impl Future<Output = Result<u32, RadioError>> + Send;

    fn reset_buffer(&self) -> impl Future<Output = Result<(), RadioError>> + Send;

    /// Reads one block of `length` I/Q samples.
    fn read_samples(
        &self,
        length: usize,
    ) -> impl Future<Output = Result<Vec<u8>, RadioError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), RadioError>> + Send;
}

/// Finds and opens a device. Separated from [`SdrBackend`] so tests
/// can hand out fakes and the controller can own retry policy.
pub trait SdrProvider: Send + 'static {
    type Backend: SdrBackend;

    /// Locates a compatible device and returns it, unopened.
    fn acquire(
        &mut self,
        ppm: i32,
        gain: Option<f32>,
    ) -> impl Future<Output = Result<Self::Backend, RadioError>> + Send;
}

impl SdrBackend for Rtl2832u<UsbConnection> {
    async fn open(&mut self) -> Result<(), RadioError> {
        Rtl2832u::open(self).await.map_err(Into::into)
    }

    async fn set_sample_rate(&mut self, rate: u32) -> Result<u32, RadioError> {
        Rtl2832u::set_sample_rate(self, rate).await.map_err(Into::into)
    }

    async fn set_center_frequency(&mut self, frequency: u32) -> Result<u32, RadioError> {
        Rtl2832u::set_center_frequency(self, frequency)
            .await
            .map_err(Into::into)
    }

    async fn reset_buffer(&self) -> Result<(), RadioError> {
        Rtl2832u::reset_buffer(self).await.map_err(Into::into)
    }

    async fn read_samples(&self, length: usize) -> Result<Vec<u8>, RadioError> {
        Rtl2832u::read_samples(self, length).await.map_err(Into::into)
    }

    async fn close(&mut self) -> Result<(), RadioError> {
        Rtl2832u::close(self).await.map_err(Into::into)
    }
}

/// Opens the first attached dongle from the known-device list.
#[derive(Clone, Copy, Debug, Default)]
pub struct UsbProvider;

impl SdrProvider for UsbProvider {
    type Backend = Rtl2832u<UsbConnection>;

    async fn acquire(
        &mut self,
        ppm: i32,
        gain: Option<f32>,
    ) -> Result<Self::Backend, RadioError> {
        let devices = devices()?;
        let info = devices.first().ok_or(RadioError::DeviceNotFound)?;
        Ok(info.open(ppm, gain)?)
    }
}
