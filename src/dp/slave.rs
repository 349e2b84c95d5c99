use crate::dp::master::Link;
use crate::dp::{
    DiagnosticFlags, DiagnosticStatus, DpError, DpHeader, DpTelegram, Parameters, SetPrm,
    SlaveDescriptor, SlaveFault, StationStatus,
};
use crate::fdl::{FrameCountBit, FunctionCode, ResponseStatus, Telegram};
use crate::phy::{PhyError, ProfibusPhy};
use crate::time::{Duration, Instant};

/// Lifecycle state of a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlaveState {
    /// Known to the master, nothing was sent yet.
    #[default]
    Registered,
    /// Waiting for the slave to acknowledge its parameters.
    ParameterizationPending,
    /// Waiting for the slave to acknowledge the configuration.
    ConfigurationPending,
    /// Waiting for the slave to report readiness through its diagnostics.
    DiagnosticsPending,
    /// Cyclic data exchange.
    DataExchange,
    /// Taken out of operation until it is reset.
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fault {
    state: SlaveState,
    fault: SlaveFault,
}

/// Answer of a slave, as far as the DP master is concerned
#[derive(Debug)]
enum Response<'a> {
    /// Short confirmation or positive response without data
    Ack(ResponseStatus),
    /// Positive response carrying a DP service payload
    Data(ResponseStatus, DpTelegram<'a>),
    /// Negative response
    Refused(ResponseStatus),
    /// No response or nothing usable
    Silent,
}

impl<'a> Response<'a> {
    fn new(reply: Option<Telegram<'a>>, master: u8, slave: u8) -> Self {
        let t = match reply {
            None => return Response::Silent,
            Some(Telegram::ShortConfirmation(_)) => return Response::Ack(ResponseStatus::Ok),
            Some(Telegram::Data(t)) => t,
        };

        if t.h.da != master || t.h.sa != slave {
            log::debug!(
                "Ignoring telegram from #{} to #{} while waiting for #{}",
                t.h.sa,
                t.h.da,
                slave
            );
            return Response::Silent;
        }
        let FunctionCode::Response { status, .. } = t.h.fc else {
            log::debug!("Ignoring request from #{} while waiting for a response", slave);
            return Response::Silent;
        };
        if !status.is_positive() {
            return Response::Refused(status);
        }
        if t.pdu.is_empty() && t.h.dsap.is_none() && t.h.ssap.is_none() {
            return Response::Ack(status);
        }
        match DpTelegram::from_fdl(&t) {
            Ok(dp) => Response::Data(status, dp),
            Err(e) => {
                log::debug!("Ignoring response from #{} ({}): {:?}", slave, e, t);
                Response::Silent
            }
        }
    }
}

/// Faults reported by diagnostics which prevent data exchange
fn diagnostics_fault(diag: &DiagnosticStatus) -> Option<SlaveFault> {
    let flags = diag.flags;
    if flags.contains(DiagnosticFlags::STATION_NON_EXISTENT) {
        Some(SlaveFault::StationNotExistent)
    } else if flags.contains(DiagnosticFlags::CONFIGURATION_FAULT) {
        Some(SlaveFault::ConfigMismatch)
    } else if flags.contains(DiagnosticFlags::PARAMETER_FAULT) {
        Some(SlaveFault::ParameterFault)
    } else if flags.contains(DiagnosticFlags::NOT_SUPPORTED) {
        Some(SlaveFault::NotSupported)
    } else {
        None
    }
}

/// A DP slave and its runtime state in the DP master
///
/// Every call to [`DpMaster::run_slave()`][crate::dp::DpMaster::run_slave] performs exactly one
/// exchange with the slave, as appropriate for its current [`SlaveState`]:
///
/// - Set_Prm while parameterization is pending,
/// - Chk_Cfg while configuration is pending,
/// - Slave_Diag while waiting for the slave to become ready,
/// - Data_Exchange (retried once right away) in data exchange.
///
/// Setup telegrams are retried up to [`Parameters::max_retry_limit`] times before the slave is
/// faulted.  A slave refusing its configuration is faulted right away.
#[derive(Debug)]
pub struct Slave {
    descriptor: SlaveDescriptor,
    state: SlaveState,
    fault: Option<Fault>,
    /// Retries spent in the current setup state
    retries: u8,
    diag_polls: u16,
    /// Consecutive data exchange cycles without a valid response
    failed_cycles: u8,
    fcb: FrameCountBit,
    /// Last valid response during data exchange
    last_exchange: Option<Instant>,
    /// The slave signalled new diagnostics
    diag_requested: bool,
    inputs: Vec<u8>,
    outputs: Vec<u8>,
    diag: Option<DiagnosticStatus>,
}

impl Slave {
    pub(crate) fn new(descriptor: SlaveDescriptor) -> Self {
        Self {
            inputs: vec![0; descriptor.input_length()],
            outputs: vec![0; descriptor.output_length()],
            descriptor,
            state: SlaveState::Registered,
            fault: None,
            retries: 0,
            diag_polls: 0,
            failed_cycles: 0,
            fcb: FrameCountBit::First,
            last_exchange: None,
            diag_requested: false,
            diag: None,
        }
    }

    /// Address of this slave.
    #[inline(always)]
    pub fn address(&self) -> crate::Address {
        self.descriptor.address()
    }

    #[inline(always)]
    pub fn descriptor(&self) -> &SlaveDescriptor {
        &self.descriptor
    }

    #[inline(always)]
    pub fn state(&self) -> SlaveState {
        self.state
    }

    /// Why the slave was faulted.
    #[inline]
    pub fn fault(&self) -> Option<SlaveFault> {
        self.fault.map(|f| f.fault)
    }

    /// Whether this slave is exchanging data with us.
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.state == SlaveState::DataExchange
    }

    /// Input data from the last successful data exchange.
    #[inline(always)]
    pub fn inputs(&self) -> &[u8] {
        &self.inputs
    }

    /// Output data of the last successful data exchange.
    #[inline(always)]
    pub fn outputs(&self) -> &[u8] {
        &self.outputs
    }

    /// Get the last diagnostics information received from this slave.
    #[inline]
    pub fn last_diagnostics(&self) -> Option<&DiagnosticStatus> {
        self.diag.as_ref()
    }

    /// Time of the last valid response during data exchange.
    #[inline]
    pub fn last_exchange(&self) -> Option<Instant> {
        self.last_exchange
    }

    fn faulted(&self) -> Option<DpError> {
        self.fault.map(|f| DpError::Faulted {
            address: self.address(),
            state: f.state,
            fault: f.fault,
        })
    }

    /// Start over with parameterization.
    pub(crate) fn reset(&mut self) {
        self.state = SlaveState::ParameterizationPending;
        self.fault = None;
        self.retries = 0;
        self.diag_polls = 0;
        self.failed_cycles = 0;
        self.fcb.reset();
        self.last_exchange = None;
        self.diag_requested = false;
        self.inputs.fill(0);
        self.outputs.fill(0);
    }

    /// Forget all runtime state.
    pub(crate) fn clear(&mut self) {
        self.reset();
        self.state = SlaveState::Registered;
        self.diag = None;
    }

    fn enter(&mut self, state: SlaveState) {
        self.state = state;
        self.retries = 0;
    }

    fn set_fault(&mut self, fault: SlaveFault) {
        log::warn!(
            "Slave #{} faulted in {:?}: {}",
            self.address(),
            self.state,
            fault
        );
        self.fault = Some(Fault {
            state: self.state,
            fault,
        });
        self.state = SlaveState::Faulted;
        self.diag_requested = false;
        self.inputs.fill(0);
    }

    fn retry(&mut self, parameters: &Parameters, fault: SlaveFault) {
        if self.retries >= parameters.max_retry_limit {
            log::warn!(
                "Slave #{} did not complete {:?} after {} retries",
                self.address(),
                self.state,
                self.retries
            );
            self.set_fault(fault);
        } else {
            self.retries += 1;
            log::debug!(
                "Slave #{}: {} in {:?}, retry {}/{}",
                self.address(),
                fault,
                self.state,
                self.retries,
                parameters.max_retry_limit
            );
        }
    }

    fn response_timeout(&self, parameters: &Parameters) -> Duration {
        self.descriptor
            .response_timeout()
            .unwrap_or_else(|| parameters.slot_time())
    }

    fn header(&self, parameters: &Parameters, fc: FunctionCode) -> DpHeader {
        DpHeader {
            da: self.address(),
            sa: parameters.address,
            fc,
        }
    }

    /// Perform one exchange with the slave.
    ///
    /// Returns `true` when new input data was received.
    pub(crate) fn step<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
        outputs: &[u8],
    ) -> Result<bool, DpError> {
        if let Some(e) = self.faulted() {
            return Err(e);
        }

        let new_inputs = match self.state {
            SlaveState::Registered => {
                self.reset();
                self.parameterize(link, parameters)?
            }
            SlaveState::ParameterizationPending => self.parameterize(link, parameters)?,
            SlaveState::ConfigurationPending => self.configure(link, parameters)?,
            SlaveState::DiagnosticsPending => self.wait_ready(link, parameters)?,
            SlaveState::DataExchange if self.diag_requested => self.diagnose(link, parameters)?,
            SlaveState::DataExchange => self.data_exchange(link, parameters, outputs)?,
            SlaveState::Faulted => false,
        };

        match self.faulted() {
            Some(e) => Err(e),
            None => Ok(new_inputs),
        }
    }

    fn parameterize<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
    ) -> Result<bool, PhyError> {
        let address = self.address();
        let d = &self.descriptor;

        let mut station_status = StationStatus::LOCK_REQ;
        station_status.set(StationStatus::SYNC_REQ, d.sync_mode());
        station_status.set(StationStatus::FREEZE_REQ, d.freeze_mode());
        station_status.set(StationStatus::WD_ON, d.watchdog_factors().is_some());

        let telegram = DpTelegram::SetPrm {
            h: self.header(parameters, FunctionCode::new_srd_low(self.fcb)),
            prm: SetPrm {
                station_status,
                watchdog_factors: d.watchdog_factors().unwrap_or((1, 1)),
                min_tsdr: 11,
                ident_number: d.ident_number(),
                groups: d.groups(),
                user_parameters: d.user_parameters(),
            },
        };
        let timeout = self.response_timeout(parameters);

        match Response::new(link.exchange(&telegram, timeout)?, parameters.address, address) {
            Response::Ack(_) => {
                log::debug!("Sent parameters to #{}.", address);
                self.fcb.cycle();
                self.enter(SlaveState::ConfigurationPending);
            }
            Response::Refused(status) => {
                log::debug!("Slave #{} refused parameters ({:?})", address, status);
                self.fcb.cycle();
                self.retry(parameters, SlaveFault::Rejected);
            }
            Response::Data(..) | Response::Silent => self.retry(parameters, SlaveFault::Timeout),
        }
        Ok(false)
    }

    fn configure<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
    ) -> Result<bool, PhyError> {
        let address = self.address();
        let telegram = DpTelegram::ChkCfg {
            h: self.header(parameters, FunctionCode::new_srd_low(self.fcb)),
            config: self.descriptor.config(),
        };
        let timeout = self.response_timeout(parameters);

        match Response::new(link.exchange(&telegram, timeout)?, parameters.address, address) {
            Response::Ack(_) => {
                log::debug!("Sent configuration to #{}.", address);
                self.fcb.cycle();
                self.diag_polls = 0;
                self.enter(SlaveState::DiagnosticsPending);
            }
            Response::Refused(status) => {
                log::debug!("Slave #{} refused configuration ({:?})", address, status);
                self.fcb.cycle();
                self.set_fault(SlaveFault::ConfigMismatch);
            }
            Response::Data(..) | Response::Silent => self.retry(parameters, SlaveFault::Timeout),
        }
        Ok(false)
    }

    fn request_diagnostics<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
    ) -> Result<Result<DiagnosticStatus, SlaveFault>, PhyError> {
        let address = self.address();
        let telegram = DpTelegram::SlaveDiag {
            h: self.header(parameters, FunctionCode::new_srd_low(self.fcb)),
            diag: &[],
        };
        let timeout = self.response_timeout(parameters);

        let result = match Response::new(link.exchange(&telegram, timeout)?, parameters.address, address)
        {
            Response::Data(_, DpTelegram::SlaveDiag { diag, .. }) => {
                self.fcb.cycle();
                crate::dp::interpret(diag).map_err(|e| {
                    log::warn!("Invalid diagnostics from #{}: {}", address, e);
                    SlaveFault::Timeout
                })
            }
            Response::Refused(status) => {
                log::debug!("Slave #{} refused diagnostics ({:?})", address, status);
                self.fcb.cycle();
                Err(SlaveFault::Rejected)
            }
            Response::Ack(_) | Response::Data(..) | Response::Silent => Err(SlaveFault::Timeout),
        };

        if let Ok(diag) = &result {
            log::debug!("Slave Diagnostics (#{}): {:?}", address, diag);
            self.diag = Some(diag.clone());
        }
        Ok(result)
    }

    fn wait_ready<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
    ) -> Result<bool, PhyError> {
        let address = self.address();
        let diag = match self.request_diagnostics(link, parameters)? {
            Ok(diag) => diag,
            Err(fault) => {
                self.retry(parameters, fault);
                return Ok(false);
            }
        };
        self.retries = 0;

        if let Some(fault) = diagnostics_fault(&diag) {
            self.set_fault(fault);
        } else if diag.is_not_ready() {
            self.diag_polls += 1;
            if self.diag_polls >= parameters.max_diag_polls {
                log::warn!(
                    "Slave #{} is still not ready after {} diagnostics polls",
                    address,
                    self.diag_polls
                );
                self.set_fault(SlaveFault::StationNotReady);
            } else {
                log::debug!("Slave #{} is not ready yet.", address);
            }
        } else {
            log::info!("Slave #{} becomes ready for data exchange.", address);
            self.enter(SlaveState::DataExchange);
            self.failed_cycles = 0;
            self.last_exchange = Some(link.now()?);
        }
        Ok(false)
    }

    fn diagnose<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
    ) -> Result<bool, PhyError> {
        let diag = match self.request_diagnostics(link, parameters)? {
            Ok(diag) => diag,
            Err(SlaveFault::Rejected) => {
                self.set_fault(SlaveFault::Rejected);
                return Ok(false);
            }
            Err(_) => {
                self.cycle_failed(parameters, link.now()?);
                return Ok(false);
            }
        };
        self.diag_requested = false;
        self.failed_cycles = 0;
        self.last_exchange = Some(link.now()?);

        if let Some(fault) = diagnostics_fault(&diag) {
            self.set_fault(fault);
        } else if diag.is_not_ready() {
            self.set_fault(SlaveFault::StationNotReady);
        }
        Ok(false)
    }

    fn data_exchange<P: ProfibusPhy>(
        &mut self,
        link: &mut Link<P>,
        parameters: &Parameters,
        outputs: &[u8],
    ) -> Result<bool, PhyError> {
        let address = self.address();
        let timeout = self.response_timeout(parameters);
        let input_length = self.descriptor.input_length();

        for attempt in 0..2 {
            let telegram = DpTelegram::DataExchange {
                h: self.header(parameters, FunctionCode::new_srd_high(self.fcb)),
                data: outputs,
            };

            let accepted = match Response::new(
                link.exchange(&telegram, timeout)?,
                parameters.address,
                address,
            ) {
                Response::Ack(status) if input_length == 0 => Some(status),
                Response::Data(status, DpTelegram::DataExchange { data, .. })
                    if data.len() == input_length =>
                {
                    self.inputs.copy_from_slice(data);
                    Some(status)
                }
                Response::Refused(status) => {
                    log::debug!("Slave #{} refused data exchange ({:?})", address, status);
                    self.fcb.cycle();
                    self.set_fault(SlaveFault::Rejected);
                    return Ok(false);
                }
                Response::Ack(_) | Response::Data(..) => {
                    log::warn!("Slave #{} responded with unexpected input length", address);
                    None
                }
                Response::Silent => None,
            };

            if let Some(status) = accepted {
                self.fcb.cycle();
                self.outputs.copy_from_slice(outputs);
                self.failed_cycles = 0;
                self.last_exchange = Some(link.now()?);
                if status == ResponseStatus::DataHigh {
                    log::debug!("Slave #{} has new diagnostics.", address);
                    self.diag_requested = true;
                }
                return Ok(true);
            }
            if attempt == 0 {
                log::debug!("No valid data exchange response from #{}, retrying", address);
            }
        }

        self.cycle_failed(parameters, link.now()?);
        Ok(false)
    }

    fn cycle_failed(&mut self, parameters: &Parameters, now: Instant) {
        self.failed_cycles = self.failed_cycles.saturating_add(1);
        match self.descriptor.watchdog() {
            Some(watchdog) => {
                let elapsed = self
                    .last_exchange
                    .map(|t| now - t)
                    .unwrap_or(Duration::MAX);
                if elapsed > watchdog {
                    self.set_fault(SlaveFault::WatchdogExpired);
                }
            }
            None => {
                if self.failed_cycles > parameters.max_retry_limit {
                    self.set_fault(SlaveFault::Timeout);
                }
            }
        }
    }
}
