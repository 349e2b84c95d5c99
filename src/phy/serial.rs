use serialport::SerialPort;
use std::borrow::Cow;
use std::io;
use std::io::{Read, Write};

/// Platform-independent PHY implementation for serial port devices
///
/// Available with the `phy-serial` feature.
///
/// This PHY implementation is mainly meant for use with USB-RS485 converters, for applications
/// running within a general purpose operating system.
///
/// Between USB, the converter device, and the OS, large delays are introduced into the
/// communication path.  The PROFIBUS timing paramters need to be adjusted to account for this.
/// Here are a few points to consider:
///
/// - Particularly FT232-based devices come with a 16ms latency by default, unless explicitly
///   configured for low-latency.  On Linux, low-latency mode is enabled automatically.
/// - The T<sub>SL</sub> (slot time) PROFIBUS timing parameter, which the DP master uses as its
///   response timeout, needs to be much longer than usual.  A few milliseconds on top of the
///   roundtrip time of an average data exchange has proven to work well.
/// - At least one or two retries should be permitted to cope with the non-realtime nature of the
///   general purpose operating system.  This can be facilitated by setting `max_retry_limit` to 2
///   or 3.
///
/// # Measuring roundtrip time
/// You can measure the roundtrip time using the `debug-measure-roundtrip` crate-feature.  It will
/// debug-log the roundtrip time of every request sent to a slave.
///
/// # Example
/// ```no_run
/// use profirust_dpm1::{Baudrate, dp, phy};
/// const BAUDRATE: Baudrate = Baudrate::B500000;
///
/// let phy = phy::SerialPortPhy::new("/dev/ttyUSB0", BAUDRATE).unwrap();
/// let dp_master = dp::DpMaster::new(
///     Vec::new(),
///     phy,
///     dp::ParametersBuilder::new(0x02, BAUDRATE)
///         // Increased slot time due to USB latency
///         .slot_bits(4000)
///         .build(),
/// );
/// ```
pub struct SerialPortPhy {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortPhy {
    pub fn new<'a, P: Into<Cow<'a, str>>>(
        serial_port: P,
        baudrate: crate::Baudrate,
    ) -> Result<Self, crate::phy::PhyError> {
        Self::new_inner(serial_port.into(), baudrate)
    }

    fn new_inner(
        serial_port: Cow<'_, str>,
        baudrate: crate::Baudrate,
    ) -> Result<Self, crate::phy::PhyError> {
        let rate = u32::try_from(baudrate.to_rate()).unwrap_or(u32::MAX);
        #[allow(unused_mut)]
        let mut port = serialport::new(serial_port.as_ref(), rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .open_native()?;

        let configured = port.baud_rate()?;
        if u64::from(configured) != baudrate.to_rate() {
            log::warn!(
                "Serial port \"{}\" runs at {} baud instead of {}",
                serial_port,
                configured,
                baudrate.to_rate()
            );
        }

        #[cfg(target_os = "linux")]
        if let Err(e) = serialport_low_latency::enable_low_latency(&mut port) {
            log::warn!("Could not enable low-latency mode: {}", e);
        }

        Ok(Self {
            port: Some(Box::new(port)),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, crate::phy::PhyError> {
        self.port.as_mut().ok_or(crate::phy::PhyError::Closed)
    }
}

impl crate::phy::ProfibusPhy for SerialPortPhy {
    fn send(&mut self, data: &[u8]) -> Result<(), crate::phy::PhyError> {
        let port = self.port()?;

        let pending = port.bytes_to_read()?;
        if pending != 0 {
            log::warn!(
                "{} bytes in the receive buffer and we go into transmission?",
                pending
            );
            port.clear(serialport::ClearBuffer::Input)?;
        }

        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn receive(
        &mut self,
        buffer: &mut [u8],
        timeout: crate::time::Duration,
    ) -> Result<usize, crate::phy::PhyError> {
        let port = self.port()?;
        port.set_timeout(timeout.into())?;
        match port.read(buffer) {
            Ok(0) => Err(crate::phy::PhyError::Timeout),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(crate::phy::PhyError::Timeout),
            Err(e) => Err(e.into()),
        }
    }

    fn now(&mut self) -> crate::time::Instant {
        crate::time::Instant::now()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Closed serial port.");
        }
    }
}
