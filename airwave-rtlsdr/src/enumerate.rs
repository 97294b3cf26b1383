//! Device discovery.

use crate::{
    Error,
    Rtl2832u,
    transport::UsbConnection,
};

/// Vendor/product ids of the dongles this driver knows how to drive.
const KNOWN_DEVICES: &[(u16, u16)] = &[(0x0bda, 0x2832), (0x0bda, 0x2838)];

/// A compatible dongle that is plugged in but not yet opened.
#[derive(Debug)]
pub struct DeviceInfo {
    info: nusb::DeviceInfo,
}

impl DeviceInfo {
    pub fn product(&self) -> Option<&str> {
        self.info.product_string()
    }

    pub fn serial(&self) -> Option<&str> {
        self.info.serial_number()
    }

    /// Opens the device. `ppm` and `gain` are handed to the
    /// [`Rtl2832u`] constructor; the chip itself is not touched until
    /// [`Rtl2832u::open`].
    pub fn open(&self, ppm: i32, gain: Option<f32>) -> Result<Rtl2832u<UsbConnection>, Error> {
        let device = self.info.open().map_err(|error| {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                Error::PermissionDenied
            }
            else {
                Error::Transport(crate::transport::TransportError::new(
                    "open_device",
                    0,
                    0,
                    error,
                ))
            }
        })?;
        Ok(Rtl2832u::new(UsbConnection::new(device), ppm, gain))
    }
}

/// Lists the attached compatible dongles.
pub fn devices() -> Result<Vec<DeviceInfo>, Error> {
    let devices = nusb::list_devices()
        .map_err(|error| {
            Error::Transport(crate::transport::TransportError::new(
                "list_devices",
                0,
                0,
                error,
            ))
        })?
        .filter(|info| {
            KNOWN_DEVICES
                .iter()
                .any(|&(vendor, product)| info.vendor_id() == vendor && info.product_id() == product)
        })
        .map(|info| DeviceInfo { info })
        .collect();
    Ok(devices)
}
