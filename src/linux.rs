use std::path::Path;

use linux_embedded_hal::i2cdev::linux::LinuxI2CError;
use linux_embedded_hal::{Delay, I2cdev};

use crate::{I2cTransport, Options, Session};

/// Session on a linux `/dev/i2c-*` device
pub type LinuxSession = Session<I2cTransport<I2cdev>, Delay, LinuxI2CError>;

impl Session<I2cTransport<I2cdev>, Delay, LinuxI2CError> {
    /// Create a new linux I2C session instance
    pub fn linux<P: AsRef<Path>>(device: P, options: Options) -> Result<Self, LinuxI2CError> {
        // Open bus
        let i2c = I2cdev::new(device.as_ref())?;

        debug!(
            "Opened {} for bridge at 0x{:02x}",
            device.as_ref().display(),
            options.address
        );

        let transport = I2cTransport::new(i2c, options.address).with_timeout(options.read_timeout());

        // Return instance
        Ok(Self::new(transport, Delay {}, options))
    }
}
