//! USB transport: vendor control transfers and bulk reads over one
//! device handle.

use std::{
    future::Future,
    time::Duration,
};

use nusb::transfer::{
    ControlIn,
    ControlOut,
    ControlType,
    Recipient,
    RequestBuffer,
};
use parking_lot::Mutex;

/// The interface the RTL2832U exposes its SDR endpoint on.
const INTERFACE: u8 = 1;

/// Bulk-in endpoint carrying the sample stream.
const ENDPOINT_IN: u8 = 0x81;

/// All vendor requests use request code 0; writes flag bit 0x10 in
/// the index field.
const REQUEST: u8 = 0;
const WRITE_FLAG: u16 = 0x10;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(1);
const BULK_TIMEOUT: Duration = Duration::from_secs(2);

/// A failed USB operation, with enough context to tell which register
/// access died.
#[derive(Debug, thiserror::Error)]
#[error("usb {op} failed (value {value:#06x}, index {index:#06x}): {message}")]
pub struct TransportError {
    pub op: &'static str,
    pub value: u16,
    pub index: u16,
    pub message: String,
}

impl TransportError {
    pub fn new(op: &'static str, value: u16, index: u16, message: impl ToString) -> Self {
        Self {
            op,
            value,
            index,
            message: message.to_string(),
        }
    }
}

/// The operations the tuner stack needs from a USB device.
///
/// Everything above this trait is written against it, so the whole
/// register machinery runs unchanged against a scripted fake in
/// tests.
pub trait UsbTransport: Clone + Send + Sync + 'static {
    /// Vendor/device/in control transfer.
    fn control_read(
        &self,
        value: u16,
        index: u16,
        length: usize,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Vendor/device/out control transfer. The write flag is OR'd
    /// into `index` here, callers pass the plain block index.
    fn control_write(
        &self,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// One bulk read of exactly `length` bytes from the sample
    /// endpoint.
    fn bulk_read(&self, length: usize)
    -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    fn claim_interface(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn release_interface(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// The real transport over a [`nusb::Device`].
#[derive(Clone)]
pub struct UsbConnection {
    device: nusb::Device,
    interface: std::sync::Arc<Mutex<Option<nusb::Interface>>>,
}

impl UsbConnection {
    pub fn new(device: nusb::Device) -> Self {
        Self {
            device,
            interface: std::sync::Arc::new(Mutex::new(None)),
        }
    }
}

impl UsbTransport for UsbConnection {
    async fn control_read(
        &self,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let transfer = self.device.control_in(ControlIn {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request: REQUEST,
            value,
            index,
            length: length as u16,
        });
        let completion = tokio::time::timeout(CONTROL_TIMEOUT, transfer)
            .await
            .map_err(|_| TransportError::new("control_read", value, index, "timed out"))?;
        completion
            .into_result()
            .map_err(|error| TransportError::new("control_read", value, index, error))
    }

    async fn control_write(
        &self,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let index = index | WRITE_FLAG;
        let transfer = self.device.control_out(ControlOut {
            control_type: ControlType::Vendor,
            recipient: Recipient::Device,
            request: REQUEST,
            value,
            index,
            data,
        });
        let completion = tokio::time::timeout(CONTROL_TIMEOUT, transfer)
            .await
            .map_err(|_| TransportError::new("control_write", value, index, "timed out"))?;
        completion
            .into_result()
            .map(|_| ())
            .map_err(|error| TransportError::new("control_write", value, index, error))
    }

    async fn bulk_read(&self, length: usize) -> Result<Vec<u8>, TransportError> {
        let interface = self
            .interface
            .lock()
            .clone()
            .ok_or_else(|| TransportError::new("bulk_read", 0, 0, "interface not claimed"))?;
        let transfer = interface.bulk_in(ENDPOINT_IN, RequestBuffer::new(length));
        let completion = tokio::time::timeout(BULK_TIMEOUT, transfer)
            .await
            .map_err(|_| TransportError::new("bulk_read", 0, 0, "timed out"))?;
        completion
            .into_result()
            .map_err(|error| TransportError::new("bulk_read", 0, 0, error))
    }

    async fn claim_interface(&self) -> Result<(), TransportError> {
        let interface = self
            .device
            .claim_interface(INTERFACE)
            .map_err(|error| TransportError::new("claim_interface", 0, 0, error))?;
        *self.interface.lock() = Some(interface);
        Ok(())
    }

    async fn release_interface(&self) -> Result<(), TransportError> {
        *self.interface.lock() = None;
        Ok(())
    }
}
