/// DP master parameters
///
/// These parameters configure the bus timing and the retry policy of the DP master.
///
/// # Example
/// ```
/// use profirust_dpm1::dp;
///
/// let param = dp::Parameters {
///     address: 2,
///     baudrate: profirust_dpm1::Baudrate::B500000,
///     .. Default::default()
/// };
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Parameters {
    /// Station address for this master
    pub address: crate::Address,
    /// Baudrate
    pub baudrate: crate::Baudrate,
    /// T<sub>SL</sub>: Slot time in bits, the time to wait for a response
    pub slot_bits: u16,
    /// Maximum number of retries of a setup telegram when no valid answer was received
    ///
    /// Without a slave watchdog, this is also the number of consecutive failed data exchange
    /// cycles after which the slave is considered faulted.
    pub max_retry_limit: u8,
    /// Maximum number of diagnostics polls while waiting for a slave to become ready
    pub max_diag_polls: u16,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            address: 2,
            baudrate: crate::Baudrate::B19200,
            slot_bits: 100,
            max_retry_limit: 3,
            max_diag_polls: 20,
        }
    }
}

impl Parameters {
    pub fn bits_to_time(&self, bits: u32) -> crate::time::Duration {
        self.baudrate.bits_to_time(bits)
    }

    /// T<sub>SL</sub> (slot time) converted to duration
    pub fn slot_time(&self) -> crate::time::Duration {
        self.bits_to_time(u32::from(self.slot_bits))
    }
}

/// Builder for DP master [`Parameters`]
///
/// # Example
/// ```
/// use profirust_dpm1::{dp, Baudrate};
///
/// let param = dp::ParametersBuilder::new(0x02, Baudrate::B19200)
///     .slot_bits(300)
///     .max_retry_limit(2)
///     .build();
/// assert_eq!(param.max_diag_polls, 20);
/// ```
#[derive(Debug, Clone)]
pub struct ParametersBuilder(Parameters);

impl ParametersBuilder {
    pub fn new(address: crate::Address, baudrate: crate::Baudrate) -> Self {
        Self(Parameters {
            address,
            baudrate,
            ..Default::default()
        })
    }

    pub fn slot_bits(mut self, slot_bits: u16) -> Self {
        self.0.slot_bits = slot_bits;
        self
    }

    pub fn max_retry_limit(mut self, max_retry_limit: u8) -> Self {
        self.0.max_retry_limit = max_retry_limit;
        self
    }

    pub fn max_diag_polls(mut self, max_diag_polls: u16) -> Self {
        self.0.max_diag_polls = max_diag_polls;
        self
    }

    pub fn build(self) -> Parameters {
        self.0
    }
}
