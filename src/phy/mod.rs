//! PHY - Physical layer abstraction
//!
//! The DP master drives the bus through the [`ProfibusPhy`] trait.  A PHY is a blocking byte
//! channel to the RS-485 medium: the master sends one complete telegram and then waits for the
//! response bytes, bounded by a timeout.  Baudrate and device configuration are the concern of
//! each PHY's constructor.
//!
//! Available implementations:
//!
//! - [`SerialPortPhy`] (feature `phy-serial`): serial port devices, e.g. USB-RS485 converters.
//! - [`SimulatorPhy`] (feature `phy-simulator`): simulated bus with simulated time and simulated
//!   slave stations, for testing.
#[cfg(feature = "phy-serial")]
mod serial;
#[cfg(feature = "phy-serial")]
pub use serial::SerialPortPhy;

#[cfg(feature = "phy-simulator")]
mod simulator;
#[cfg(feature = "phy-simulator")]
pub use simulator::{CapturedTelegram, Responder, SimulatedSlave, SimulatorPhy};

/// Errors reported by a PHY.
#[derive(Debug, thiserror::Error)]
pub enum PhyError {
    /// Nothing was received within the allotted time.
    #[error("no response within the timeout")]
    Timeout,
    /// The PHY was already closed.
    #[error("PHY is closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "phy-serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PhyError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, PhyError::Timeout)
    }
}

pub trait ProfibusPhy {
    /// Transmit a complete telegram.
    ///
    /// Returns once all bytes were handed to the medium.  Stale bytes still waiting in the
    /// receive path are discarded before transmission.
    fn send(&mut self, data: &[u8]) -> Result<(), PhyError>;

    /// Receive bytes into `buffer`.
    ///
    /// Blocks until at least one byte is available, but no longer than `timeout`.  Returns the
    /// number of bytes written to `buffer`, or [`PhyError::Timeout`] when nothing arrived.
    fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: crate::time::Duration,
    ) -> Result<usize, PhyError>;

    /// Current time of the monotonic clock this PHY operates on.
    fn now(&mut self) -> crate::time::Instant;

    /// Release the underlying device.
    ///
    /// Called once when the DP master is destroyed.  Any later `send()` or `receive()` may fail
    /// with [`PhyError::Closed`].
    fn close(&mut self) {}
}

impl<P: ProfibusPhy + ?Sized> ProfibusPhy for &mut P {
    fn send(&mut self, data: &[u8]) -> Result<(), PhyError> {
        (**self).send(data)
    }

    fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: crate::time::Duration,
    ) -> Result<usize, PhyError> {
        (**self).receive(buffer, timeout)
    }

    fn now(&mut self) -> crate::time::Instant {
        (**self).now()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
