use crate::consts::{ADDRESS_BROADCAST, MAX_TELEGRAM_LENGTH};
use crate::dp::slave_set::SlaveSet;
use crate::dp::{
    DiagnosticStatus, DpError, DpHeader, DpTelegram, GlobalControl, Parameters, SetupError,
    SetupFailure, Slave, SlaveDescriptor, SlaveHandle, SlaveState, SlaveStorage,
};
use crate::fdl::{DecodeError, FunctionCode, Telegram};
use crate::phy::{PhyError, ProfibusPhy};
use crate::time::{Duration, Instant};

/// Request/response access to the bus
pub(crate) struct Link<P> {
    phy: Option<P>,
    baudrate: crate::Baudrate,
    tx: [u8; MAX_TELEGRAM_LENGTH],
    rx: [u8; MAX_TELEGRAM_LENGTH],
}

impl<P: ProfibusPhy> Link<P> {
    fn new(phy: P, baudrate: crate::Baudrate) -> Self {
        Self {
            phy: Some(phy),
            baudrate,
            tx: [0; MAX_TELEGRAM_LENGTH],
            rx: [0; MAX_TELEGRAM_LENGTH],
        }
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.phy.is_none()
    }

    fn close(&mut self) -> bool {
        match self.phy.take() {
            Some(mut phy) => {
                phy.close();
                true
            }
            None => false,
        }
    }

    pub(crate) fn now(&mut self) -> Result<Instant, PhyError> {
        self.phy
            .as_mut()
            .map(|phy| phy.now())
            .ok_or(PhyError::Closed)
    }

    /// Send a telegram which has no response.
    pub(crate) fn send(&mut self, telegram: &DpTelegram<'_>) -> Result<(), PhyError> {
        let length = telegram.encode(&mut self.tx);
        let phy = self.phy.as_mut().ok_or(PhyError::Closed)?;
        phy.send(&self.tx[..length])
    }

    /// Send a request and wait for the response.
    ///
    /// `timeout` bounds the time until the first response byte arrives.  Returns `None` when no
    /// response was received or the received bytes are not a valid telegram.
    pub(crate) fn exchange(
        &mut self,
        request: &DpTelegram<'_>,
        timeout: Duration,
    ) -> Result<Option<Telegram<'_>>, PhyError> {
        let length = request.encode(&mut self.tx);
        let phy = self.phy.as_mut().ok_or(PhyError::Closed)?;
        phy.send(&self.tx[..length])?;

        #[cfg(feature = "debug-measure-roundtrip")]
        let start = phy.now();

        let mut deadline = phy.now() + timeout;
        let mut received = 0;
        while received < self.rx.len() {
            let now = phy.now();
            if now >= deadline {
                break;
            }
            match phy.receive(&mut self.rx[received..], deadline - now) {
                Ok(n) => {
                    if received == 0 && n > 0 {
                        // The response started in time, give it time to complete.
                        deadline = phy.now()
                            + self
                                .baudrate
                                .bits_to_time(11 * MAX_TELEGRAM_LENGTH as u32);
                    }
                    received += n;
                }
                Err(PhyError::Timeout) => break,
                Err(e) => return Err(e),
            }
            if !matches!(
                Telegram::decode(&self.rx[..received]),
                Err(DecodeError::Truncated)
            ) {
                break;
            }
        }

        #[cfg(feature = "debug-measure-roundtrip")]
        log::debug!(
            "Roundtrip to #{}: {} us ({} bytes)",
            request.header().da,
            (phy.now() - start).total_micros(),
            received
        );

        if received == 0 {
            log::trace!("No response from #{}", request.header().da);
            return Ok(None);
        }
        match Telegram::decode(&self.rx[..received]) {
            Ok(t) => Ok(Some(t)),
            Err(e) => {
                log::debug!(
                    "Discarding invalid response from #{} ({}): {:02x?}",
                    request.header().da,
                    e,
                    &self.rx[..received]
                );
                Ok(None)
            }
        }
    }
}

/// PROFIBUS DP Class 1 master
///
/// The DP master owns the PHY and a set of slaves.  All bus access is blocking and happens
/// within [`initialize()`][DpMaster::initialize], [`run_slave()`][DpMaster::run_slave] and
/// [`global_control()`][DpMaster::global_control].
///
/// # Example
/// ```
/// use profirust_dpm1::{dp, phy, Baudrate};
///
/// let phy = phy::SimulatorPhy::new(Baudrate::B19200);
/// phy.add_slave(phy::SimulatedSlave::new(8, 0x1234, &[0x10]).with_inputs(&[0x05]));
///
/// let mut master = dp::DpMaster::new(
///     Vec::new(),
///     phy,
///     dp::ParametersBuilder::new(0x02, Baudrate::B19200).build(),
/// );
/// let handle = master.add_slave(
///     dp::SlaveDescriptor::builder(8, 0x1234)
///         .config(&[0x10])
///         .build()
///         .unwrap(),
/// ).unwrap();
///
/// master.initialize().unwrap();
/// let inputs = master.run_slave(handle, &[]).unwrap();
/// assert_eq!(inputs, Some(&[0x05][..]));
/// ```
pub struct DpMaster<'a, P: ProfibusPhy> {
    /// Storage for all slaves this master interacts with.
    slaves: SlaveSet<'a>,
    parameters: Parameters,
    link: Link<P>,
}

impl<'a, P: ProfibusPhy> DpMaster<'a, P> {
    /// Create a DP master.
    ///
    /// When `parameters.address` is not a station address (0 to 126), every bus operation fails
    /// with [`DpError::InvalidAddress`].
    pub fn new<S>(storage: S, phy: P, parameters: Parameters) -> Self
    where
        S: Into<managed::ManagedSlice<'a, SlaveStorage>>,
    {
        log::info!(
            "DP master #{} at {:?}",
            parameters.address,
            parameters.baudrate
        );
        Self {
            slaves: SlaveSet::new(storage),
            link: Link::new(phy, parameters.baudrate),
            parameters,
        }
    }

    #[inline(always)]
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Whether [`destroy()`][DpMaster::destroy] was called.
    #[inline(always)]
    pub fn is_destroyed(&self) -> bool {
        self.link.is_closed()
    }

    /// Access the PHY, unless the master was destroyed.
    #[inline]
    pub fn phy(&self) -> Option<&P> {
        self.link.phy.as_ref()
    }

    #[inline]
    pub fn phy_mut(&mut self) -> Option<&mut P> {
        self.link.phy.as_mut()
    }

    fn ensure_operational(&self) -> Result<(), DpError> {
        if self.is_destroyed() {
            return Err(DpError::Destroyed);
        }
        if self.parameters.address >= ADDRESS_BROADCAST {
            return Err(DpError::InvalidAddress(self.parameters.address));
        }
        Ok(())
    }

    /// Register a slave and return its handle.
    ///
    /// The slave starts out in [`SlaveState::Registered`].  No telegram is sent.
    pub fn add_slave(&mut self, descriptor: SlaveDescriptor) -> Result<SlaveHandle, DpError> {
        self.ensure_operational()?;
        let address = descriptor.address();
        if address == self.parameters.address {
            return Err(DpError::InvalidAddress(address));
        }
        if self.slaves.find(address).is_some() {
            return Err(DpError::AddressInUse(address));
        }
        let handle = self.slaves.add(Slave::new(descriptor))?;
        log::debug!("Registered slave #{}", address);
        Ok(handle)
    }

    /// Get a slave by its handle.
    #[inline]
    pub fn get(&self, handle: SlaveHandle) -> Option<&Slave> {
        self.slaves.get(handle)
    }

    pub fn state(&self, handle: SlaveHandle) -> Option<SlaveState> {
        self.get(handle).map(|s| s.state())
    }

    pub fn descriptor(&self, handle: SlaveHandle) -> Option<&SlaveDescriptor> {
        self.get(handle).map(|s| s.descriptor())
    }

    pub fn last_diagnostics(&self, handle: SlaveHandle) -> Option<&DiagnosticStatus> {
        self.get(handle).and_then(|s| s.last_diagnostics())
    }

    pub fn inputs(&self, handle: SlaveHandle) -> Option<&[u8]> {
        self.get(handle).map(|s| s.inputs())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlaveHandle, &Slave)> {
        self.slaves.iter()
    }

    /// Bring all slaves into data exchange.
    ///
    /// Slaves are set up one after another, each until it either reaches data exchange or is
    /// faulted.  Slaves which are already exchanging data are skipped and faulted slaves are
    /// restarted.  When any slave faults, a [`DpError::Setup`] lists every failed slave while
    /// the others stay in data exchange.
    pub fn initialize(&mut self) -> Result<(), DpError> {
        self.ensure_operational()?;
        let mut failures = Vec::new();

        for (_, slave) in self.slaves.iter_mut() {
            if slave.state() == SlaveState::Faulted {
                log::info!("Restarting faulted slave #{}", slave.address());
                slave.reset();
            }
            while !matches!(slave.state(), SlaveState::DataExchange | SlaveState::Faulted) {
                match slave.step(&mut self.link, &self.parameters, &[]) {
                    Ok(_) => (),
                    Err(DpError::Faulted {
                        address,
                        state,
                        fault,
                    }) => failures.push(SetupFailure {
                        address,
                        state,
                        fault,
                    }),
                    Err(e) => return Err(e),
                }
            }
        }

        if failures.is_empty() {
            log::info!("All slaves are exchanging data.");
            Ok(())
        } else {
            Err(SetupError::new(failures).into())
        }
    }

    /// Perform one cycle with a slave.
    ///
    /// During data exchange, `outputs` are sent to the slave and its inputs are returned.  While
    /// the slave is still being set up, the next setup telegram is sent instead and `None` is
    /// returned.  `None` is also returned when the slave did not answer in this cycle.
    pub fn run_slave(
        &mut self,
        handle: SlaveHandle,
        outputs: &[u8],
    ) -> Result<Option<&[u8]>, DpError> {
        self.ensure_operational()?;
        let slave = self.slaves.get_mut(handle).ok_or(DpError::UnknownSlave)?;
        let expected = slave.descriptor().output_length();
        if outputs.len() != expected {
            return Err(DpError::OutputLength {
                address: slave.address(),
                expected,
                actual: outputs.len(),
            });
        }

        if slave.step(&mut self.link, &self.parameters, outputs)? {
            Ok(Some(slave.inputs()))
        } else {
            Ok(None)
        }
    }

    /// Start a slave over from parameterization.
    ///
    /// This clears a fault.  The next [`run_slave()`][DpMaster::run_slave] or
    /// [`initialize()`][DpMaster::initialize] sends Set_Prm again.
    pub fn reset(&mut self, handle: SlaveHandle) -> Result<(), DpError> {
        self.ensure_operational()?;
        let slave = self.slaves.get_mut(handle).ok_or(DpError::UnknownSlave)?;
        log::debug!("Resetting slave #{}", slave.address());
        slave.reset();
        Ok(())
    }

    /// Broadcast a Global_Control command.
    ///
    /// The telegram is not acknowledged by the slaves.
    pub fn global_control(&mut self, gc: GlobalControl) -> Result<(), DpError> {
        self.ensure_operational()?;
        log::debug!(
            "Global control {:?} to groups {:#04x}",
            gc.command,
            gc.groups
        );
        let telegram = DpTelegram::GlobalControl {
            h: DpHeader {
                da: ADDRESS_BROADCAST,
                sa: self.parameters.address,
                fc: FunctionCode::new_sdn_low(),
            },
            gc,
        };
        self.link.send(&telegram)?;
        Ok(())
    }

    /// Shut the DP master down.
    ///
    /// Closes the PHY and clears the runtime state of all slaves.  Calling this again has no
    /// effect.  Afterwards, all bus operations fail with [`DpError::Destroyed`].
    pub fn destroy(&mut self) {
        if self.link.close() {
            log::info!("DP master #{} shut down.", self.parameters.address);
            for (_, slave) in self.slaves.iter_mut() {
                slave.clear();
            }
        }
    }
}

impl<P: ProfibusPhy> Drop for DpMaster<'_, P> {
    fn drop(&mut self) {
        self.destroy();
    }
}
