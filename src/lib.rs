//! # `profirust-dpm1` - A PROFIBUS DP Class 1 master
//!
//! _profirust-dpm1_ sets up PROFIBUS DP slaves and exchanges cyclic I/O data with them.  It
//! assumes to be the only active station on the bus.  The crate is structured in layers:
//!
//! - The [`phy`] module abstracts the byte transport to the RS-485 medium.
//! - The [`fdl`] module implements the _Fieldbus Data Link_ telegram framing.
//! - The [`dp`] module implements the DP master: slave setup, cyclic data exchange,
//!   diagnostics and global control.
//!
//! All operations are blocking and the DP master never runs on its own.  The application calls
//! [`dp::DpMaster::run_slave()`] for each slave in its own cycle.
//!
//! # Example
//! ```no_run
//! use profirust_dpm1::{dp, phy, Baudrate};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let phy = phy::SerialPortPhy::new("/dev/ttyUSB0", Baudrate::B500000)?;
//! let params = dp::ParametersBuilder::new(0x02, Baudrate::B500000)
//!     .slot_bits(300)
//!     .build();
//! let mut dp_master = dp::DpMaster::new(Vec::new(), phy, params);
//!
//! // Let's add a slave with 8 bytes of inputs and 4 bytes of outputs:
//! let remoteio = dp_master.add_slave(
//!     dp::SlaveDescriptor::builder(7, 0x80a3)
//!         .config(&[0x17, 0x23])
//!         .watchdog(profirust_dpm1::time::Duration::from_millis(300))
//!         .build()?,
//! )?;
//!
//! dp_master.initialize()?;
//!
//! let mut outputs = [0u8; 4];
//! loop {
//!     if let Some(inputs) = dp_master.run_slave(remoteio, &outputs)? {
//!         println!("Inputs: {:?}", inputs);
//!     }
//!     outputs[0] ^= 0x80;
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! # }
//! ```
mod consts;
pub mod dp;
pub mod fdl;
pub mod phy;
pub mod time;

#[cfg(test)]
pub(crate) mod test_utils;

/// Station address on the bus
pub type Address = u8;

/// Baudrate for fieldbus communication
///
/// - PROFIBUS DP networks can run at any of the available baudrates given that all stations
///   support the selected speed.
/// - PROFIBUS PA networks must use `B31250` (31.25 kbit/s).
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum Baudrate {
    /// 9.6 kbit/s
    B9600,
    /// 19.2 kbit/s
    B19200,
    /// 31.25 kbit/s
    B31250,
    /// 45.45 kbit/s
    B45450,
    /// 93.75 kbit/s
    B93750,
    /// 187.5 kbit/s
    B187500,
    /// 500 kbit/s
    B500000,
    /// 1.5 Mbit/s
    B1500000,
    /// 3 Mbit/s
    B3000000,
    /// 6 Mbit/s
    B6000000,
    /// 12 Mbit/s
    B12000000,
}

impl Baudrate {
    /// Convert baudrate into its numeric value in bit/s.
    pub fn to_rate(self) -> u64 {
        match self {
            Baudrate::B9600 => 9600,
            Baudrate::B19200 => 19200,
            Baudrate::B31250 => 31250,
            Baudrate::B45450 => 45450,
            Baudrate::B93750 => 93750,
            Baudrate::B187500 => 187500,
            Baudrate::B500000 => 500000,
            Baudrate::B1500000 => 1500000,
            Baudrate::B3000000 => 3000000,
            Baudrate::B6000000 => 6000000,
            Baudrate::B12000000 => 12000000,
        }
    }

    /// At this baudrate, return how long a given number of bits take to transmit.
    pub fn bits_to_time(self, bits: u32) -> crate::time::Duration {
        crate::time::Duration::from_micros(u64::from(bits) * 1000000 / self.to_rate())
    }

    /// At this baudrate, return how many bits could be transmitted in the given time.
    pub fn time_to_bits(self, time: crate::time::Duration) -> u64 {
        time.total_micros() * self.to_rate() / 1000000
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn baudrate_time_conversions() {
        let all_bauds = &[
            crate::Baudrate::B9600,
            crate::Baudrate::B19200,
            crate::Baudrate::B31250,
            crate::Baudrate::B45450,
            crate::Baudrate::B93750,
            crate::Baudrate::B187500,
            crate::Baudrate::B500000,
            crate::Baudrate::B1500000,
            crate::Baudrate::B3000000,
            crate::Baudrate::B6000000,
            crate::Baudrate::B12000000,
        ];
        let test_values = &[0, 1, 10, 100, 2000, 65536, u32::MAX];

        for baud in all_bauds.iter().copied() {
            for bits in test_values.iter().copied() {
                let time = baud.bits_to_time(bits);
                let micros = time.total_micros();
                let bits2 = baud.time_to_bits(time);

                let max_difference = match baud {
                    crate::Baudrate::B9600 => 1,
                    crate::Baudrate::B19200 => 1,
                    crate::Baudrate::B31250 => 1,
                    crate::Baudrate::B45450 => 1,
                    crate::Baudrate::B93750 => 1,
                    crate::Baudrate::B187500 => 1,
                    crate::Baudrate::B500000 => 1,
                    crate::Baudrate::B1500000 => 1,
                    crate::Baudrate::B3000000 => 2,
                    crate::Baudrate::B6000000 => 4,
                    crate::Baudrate::B12000000 => 10,
                };
                assert!(
                    u64::from(bits) - bits2 <= max_difference,
                    "{bits} (={micros}us) was converted to {bits2} (at {baud:?})"
                );
            }
        }
    }
}
