use crate::dp::{Dpv1Parameters, Dpv1Status1, DpError, SlaveCatalog};
use crate::time::Duration;

/// Largest Chk_Cfg payload
pub const MAX_CONFIG_LENGTH: usize = 244;
/// Largest amount of user parameters in a Set_Prm telegram
pub const MAX_USER_PARAMETERS_LENGTH: usize = 237;
/// Largest amount of input or output data of a slave in one Data_Exchange telegram
pub const MAX_IO_LENGTH: usize = 244;

/// Description of one DP slave
///
/// Created through a [`SlaveDescriptorBuilder`], either by hand or from a [`SlaveCatalog`].  Once
/// registered with a DP master, the descriptor can no longer be changed.
///
/// # Example
/// ```
/// use profirust_dpm1::dp::SlaveDescriptor;
/// use profirust_dpm1::time::Duration;
///
/// let descriptor = SlaveDescriptor::builder(8, 0x806a)
///     .config(&[0x00, 0x20, 0x20, 0x10])
///     .user_parameters(&[0x00, 0x00, 0x00])
///     .groups(0x01)
///     .sync_mode(true)
///     .freeze_mode(true)
///     .watchdog(Duration::from_millis(300))
///     .build()
///     .unwrap();
///
/// assert_eq!(descriptor.input_length(), 1);
/// assert_eq!(descriptor.output_length(), 2);
/// assert_eq!(descriptor.watchdog_factors(), Some((1, 30)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDescriptor {
    address: crate::Address,
    ident_number: u16,
    config: Vec<u8>,
    user_parameters: Vec<u8>,
    groups: u8,
    sync_mode: bool,
    freeze_mode: bool,
    watchdog: Option<Duration>,
    watchdog_factors: Option<(u8, u8)>,
    response_timeout: Option<Duration>,
    input_length: usize,
    output_length: usize,
}

impl SlaveDescriptor {
    pub fn builder(address: crate::Address, ident_number: u16) -> SlaveDescriptorBuilder {
        SlaveDescriptorBuilder::new(address, ident_number)
    }

    /// Start a descriptor with ident number, configuration and user parameters from a catalog.
    pub fn from_catalog<C: SlaveCatalog + ?Sized>(
        address: crate::Address,
        catalog: &C,
        dpv1: &Dpv1Parameters,
    ) -> SlaveDescriptorBuilder {
        SlaveDescriptorBuilder::new(address, catalog.ident_number())
            .config(&catalog.cfg_data_elements())
            .user_parameters(&catalog.user_prm_data(dpv1))
    }

    #[inline(always)]
    pub fn address(&self) -> crate::Address {
        self.address
    }

    #[inline(always)]
    pub fn ident_number(&self) -> u16 {
        self.ident_number
    }

    /// Configuration bytes sent with Chk_Cfg.
    #[inline(always)]
    pub fn config(&self) -> &[u8] {
        &self.config
    }

    #[inline(always)]
    pub fn user_parameters(&self) -> &[u8] {
        &self.user_parameters
    }

    #[inline(always)]
    pub fn groups(&self) -> u8 {
        self.groups
    }

    #[inline(always)]
    pub fn sync_mode(&self) -> bool {
        self.sync_mode
    }

    #[inline(always)]
    pub fn freeze_mode(&self) -> bool {
        self.freeze_mode
    }

    #[inline(always)]
    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog
    }

    /// Watchdog factors as sent in Set_Prm, `None` when the watchdog is off.
    #[inline(always)]
    pub fn watchdog_factors(&self) -> Option<(u8, u8)> {
        self.watchdog_factors
    }

    /// Response timeout for this slave, overriding the slot time of the master.
    #[inline(always)]
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout
    }

    /// Number of input bytes the slave sends in each data exchange.
    #[inline(always)]
    pub fn input_length(&self) -> usize {
        self.input_length
    }

    /// Number of output bytes the slave expects in each data exchange.
    #[inline(always)]
    pub fn output_length(&self) -> usize {
        self.output_length
    }

    /// The watchdog time base selected by the DPV1 status bytes.
    fn watchdog_base(user_parameters: &[u8]) -> Duration {
        match user_parameters.first() {
            Some(b) if Dpv1Status1::from_bits_retain(*b).contains(Dpv1Status1::WD_BASE_1MS) => {
                Duration::from_millis(1)
            }
            _ => Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlaveDescriptorBuilder {
    address: crate::Address,
    ident_number: u16,
    config: Vec<u8>,
    user_parameters: Vec<u8>,
    groups: u8,
    sync_mode: bool,
    freeze_mode: bool,
    watchdog: Option<Duration>,
    response_timeout: Option<Duration>,
}

impl SlaveDescriptorBuilder {
    pub fn new(address: crate::Address, ident_number: u16) -> Self {
        Self {
            address,
            ident_number,
            config: Vec::new(),
            user_parameters: Vec::new(),
            groups: 0,
            sync_mode: false,
            freeze_mode: false,
            watchdog: None,
            response_timeout: None,
        }
    }

    pub fn config(mut self, config: &[u8]) -> Self {
        self.config = config.to_vec();
        self
    }

    pub fn user_parameters(mut self, user_parameters: &[u8]) -> Self {
        self.user_parameters = user_parameters.to_vec();
        self
    }

    /// Group membership mask
    pub fn groups(mut self, groups: u8) -> Self {
        self.groups = groups;
        self
    }

    pub fn sync_mode(mut self, sync_mode: bool) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn freeze_mode(mut self, freeze_mode: bool) -> Self {
        self.freeze_mode = freeze_mode;
        self
    }

    /// Enable the slave watchdog.  A zero duration leaves it disabled.
    pub fn watchdog(mut self, timeout: Duration) -> Self {
        self.watchdog = Some(timeout).filter(|t| *t != Duration::ZERO);
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SlaveDescriptor, DpError> {
        let address = self.address;
        let invalid = |reason| DpError::InvalidDescriptor { address, reason };

        if !(1..=crate::consts::ADDRESS_SLAVE_MAX).contains(&address) {
            return Err(DpError::InvalidAddress(address));
        }
        if self.config.is_empty() {
            return Err(invalid("configuration is empty"));
        }
        if self.config.len() > MAX_CONFIG_LENGTH {
            return Err(invalid("configuration is too long"));
        }
        if self.user_parameters.len() > MAX_USER_PARAMETERS_LENGTH {
            return Err(invalid("user parameters are too long"));
        }

        let (input_length, output_length) =
            io_lengths(&self.config).map_err(|_| invalid("truncated special identifier"))?;
        if input_length > MAX_IO_LENGTH {
            return Err(invalid("input data does not fit a telegram"));
        }
        if output_length > MAX_IO_LENGTH {
            return Err(invalid("output data does not fit a telegram"));
        }

        let watchdog_factors = match self.watchdog {
            Some(timeout) => Some(
                watchdog_factors(
                    timeout,
                    SlaveDescriptor::watchdog_base(&self.user_parameters),
                )
                .ok_or(invalid("watchdog timeout is out of range"))?,
            ),
            None => None,
        };

        Ok(SlaveDescriptor {
            address,
            ident_number: self.ident_number,
            config: self.config,
            user_parameters: self.user_parameters,
            groups: self.groups,
            sync_mode: self.sync_mode,
            freeze_mode: self.freeze_mode,
            watchdog: self.watchdog,
            watchdog_factors,
            response_timeout: self.response_timeout,
            input_length,
            output_length,
        })
    }
}

/// Calculate the watchdog factors for a watchdog timeout.
///
/// The timeout is rounded up to the next value `f1 * f2 * base` that can be represented.
/// Returns `None` when the timeout is too long.
pub fn watchdog_factors(timeout: Duration, base: Duration) -> Option<(u8, u8)> {
    let base = base.total_micros().max(1);
    let ticks = timeout.total_micros().div_ceil(base).max(1);

    let mut best: Option<(u64, u64)> = None;
    for f1 in 1..=255u64 {
        let f2 = ticks.div_ceil(f1);
        if f2 > 255 {
            continue;
        }
        if best.map(|(b1, b2)| f1 * f2 < b1 * b2).unwrap_or(true) {
            best = Some((f1, f2));
        }
        if f1 * f2 == ticks {
            break;
        }
    }
    best.and_then(|(f1, f2)| Some((u8::try_from(f1).ok()?, u8::try_from(f2).ok()?)))
}

/// A special identifier is missing its length bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedIdentifier;

/// Calculate the input and output lengths described by configuration bytes.
///
/// Returns `(inputs, outputs)` in bytes.
pub fn io_lengths(config: &[u8]) -> Result<(usize, usize), TruncatedIdentifier> {
    let mut inputs = 0;
    let mut outputs = 0;
    let mut bytes = config.iter().copied();

    while let Some(id) = bytes.next() {
        if id & 0x30 != 0 {
            // General identifier format
            let length = data_length(id & 0x0f, id & 0x40 != 0);
            if id & 0x10 != 0 {
                inputs += length;
            }
            if id & 0x20 != 0 {
                outputs += length;
            }
        } else {
            // Special identifier format, 0x00 being an empty slot
            let mut length_byte = || {
                bytes
                    .next()
                    .map(|b| data_length(b & 0x3f, b & 0x40 != 0))
                    .ok_or(TruncatedIdentifier)
            };
            match id >> 6 {
                0b01 => inputs += length_byte()?,
                0b10 => outputs += length_byte()?,
                0b11 => {
                    outputs += length_byte()?;
                    inputs += length_byte()?;
                }
                _ => (),
            }
            for _ in 0..(id & 0x0f) {
                bytes.next().ok_or(TruncatedIdentifier)?;
            }
        }
    }

    Ok((inputs, outputs))
}

fn data_length(length_minus_one: u8, words: bool) -> usize {
    let length = usize::from(length_minus_one) + 1;
    if words {
        length * 2
    } else {
        length
    }
}
