use crate::dp::SlaveState;
use core::fmt;

/// Reason why a slave was taken out of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SlaveFault {
    /// No valid response within the retry budget.
    #[error("no valid response")]
    Timeout,
    /// The slave refused the request.
    #[error("request was refused")]
    Rejected,
    /// The slave reports a module layout different from the configuration.
    #[error("configuration mismatch")]
    ConfigMismatch,
    #[error("station does not exist")]
    StationNotExistent,
    #[error("station is not ready")]
    StationNotReady,
    /// The slave refused the parameters (e.g. a wrong ident number).
    #[error("parameters were refused")]
    ParameterFault,
    /// The slave does not support a requested function.
    #[error("requested function is not supported")]
    NotSupported,
    /// No successful data exchange within the watchdog time.
    #[error("watchdog expired")]
    WatchdogExpired,
}

/// A slave which failed to reach data exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFailure {
    pub address: crate::Address,
    /// State in which the fault occurred
    pub state: SlaveState,
    pub fault: SlaveFault,
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} faulted in {:?}: {}", self.address, self.state, self.fault)
    }
}

/// Aggregate error of [`DpMaster::initialize()`][crate::dp::DpMaster::initialize]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupError {
    failures: Vec<SetupFailure>,
}

impl SetupError {
    pub(crate) fn new(failures: Vec<SetupFailure>) -> Self {
        debug_assert!(!failures.is_empty());
        Self { failures }
    }

    /// The first slave that faulted during setup.
    pub fn first(&self) -> Option<&SetupFailure> {
        self.failures.first()
    }

    /// All slaves that faulted, in setup order.
    pub fn failures(&self) -> &[SetupFailure] {
        &self.failures
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setup failed for {} slave(s)", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { ":" } else { "," }, failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for SetupError {}

#[derive(Debug, thiserror::Error)]
pub enum DpError {
    #[error("{0} is not a valid station address")]
    InvalidAddress(crate::Address),
    #[error("address {0} is already in use")]
    AddressInUse(crate::Address),
    #[error("invalid descriptor for #{address}: {reason}")]
    InvalidDescriptor {
        address: crate::Address,
        reason: &'static str,
    },
    #[error("slave storage is full")]
    StorageFull,
    #[error("handle does not refer to a registered slave")]
    UnknownSlave,
    #[error("#{address} expects {expected} bytes of output data, got {actual}")]
    OutputLength {
        address: crate::Address,
        expected: usize,
        actual: usize,
    },
    #[error("#{address} faulted in {state:?}: {fault}")]
    Faulted {
        address: crate::Address,
        state: SlaveState,
        fault: SlaveFault,
    },
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("PHY error: {0}")]
    Phy(#[from] crate::phy::PhyError),
    #[error("DP master was destroyed")]
    Destroyed,
}

impl DpError {
    /// The slave fault this error reports, if any.
    ///
    /// For a [`SetupError`], this is the fault of the first failed slave.
    pub fn fault(&self) -> Option<SlaveFault> {
        match self {
            DpError::Faulted { fault, .. } => Some(*fault),
            DpError::Setup(e) => e.first().map(|f| f.fault),
            _ => None,
        }
    }

    #[inline]
    pub fn is_config_mismatch(&self) -> bool {
        self.fault() == Some(SlaveFault::ConfigMismatch)
    }

    #[inline]
    pub fn is_station_not_existent(&self) -> bool {
        self.fault() == Some(SlaveFault::StationNotExistent)
    }

    #[inline]
    pub fn is_station_not_ready(&self) -> bool {
        self.fault() == Some(SlaveFault::StationNotReady)
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        match self {
            DpError::Phy(e) => e.is_timeout(),
            _ => self.fault() == Some(SlaveFault::Timeout),
        }
    }
}
