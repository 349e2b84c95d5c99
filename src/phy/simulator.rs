use crate::dp::{
    ControlCommand, DiagnosticFlags, DiagnosticStatus, DpHeader, DpTelegram, StationStatus,
};
use crate::fdl::{FunctionCode, ResponseStatus};
use crate::time::{Duration, Instant};
use std::sync;

/// A telegram observed on the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedTelegram {
    /// `"master"` or `"slave"`
    pub sender: &'static str,
    /// Time when the first byte went on the bus
    pub timestamp: Instant,
    pub data: Vec<u8>,
}

impl CapturedTelegram {
    pub fn decode(&self) -> Result<crate::fdl::Telegram<'_>, crate::fdl::DecodeError> {
        crate::fdl::Telegram::decode(&self.data)
    }

    pub fn decode_dp(&self) -> Result<DpTelegram<'_>, crate::fdl::DecodeError> {
        DpTelegram::decode(&self.data)
    }
}

/// Station on the simulated bus which answers the master's telegrams
///
/// Closures of the form `FnMut(&[u8]) -> Option<Vec<u8>>` implement this trait.
pub trait Responder: Send {
    /// Answer a telegram sent by the master.
    ///
    /// Returning `None` passes the telegram on to the next station on the bus.  An empty reply
    /// claims the telegram without putting anything on the bus.
    fn respond(&mut self, now: Instant, request: &[u8]) -> Option<Vec<u8>>;
}

impl<F> Responder for F
where
    F: FnMut(&[u8]) -> Option<Vec<u8>> + Send,
{
    fn respond(&mut self, _now: Instant, request: &[u8]) -> Option<Vec<u8>> {
        self(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimulatedState {
    WaitPrm,
    WaitCfg,
    DataExchange,
}

/// Simulated DP slave
///
/// Implements the slave side of parameterization, configuration, diagnostics, cyclic data
/// exchange and global control, including its watchdog.
#[derive(Debug, Clone)]
pub struct SimulatedSlave {
    address: crate::Address,
    ident_number: u16,
    config: Vec<u8>,
    inputs: Vec<u8>,
    outputs: Vec<u8>,
    state: SimulatedState,
    master_address: Option<crate::Address>,
    watchdog: Option<Duration>,
    last_telegram: Instant,
    faults: DiagnosticFlags,
    not_ready_polls: u32,
    remaining_not_ready: u32,
    ext_diag: Vec<u8>,
    diag_pending: bool,
    silent: bool,
    last_control: Option<ControlCommand>,
    data_exchange_count: usize,
}

impl SimulatedSlave {
    pub fn new(address: crate::Address, ident_number: u16, config: &[u8]) -> Self {
        Self {
            address,
            ident_number,
            config: config.to_vec(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            state: SimulatedState::WaitPrm,
            master_address: None,
            watchdog: None,
            last_telegram: Instant::ZERO,
            faults: DiagnosticFlags::empty(),
            not_ready_polls: 0,
            remaining_not_ready: 0,
            ext_diag: Vec::new(),
            diag_pending: false,
            silent: false,
            last_control: None,
            data_exchange_count: 0,
        }
    }

    /// Input data the slave reports in every data exchange.
    pub fn with_inputs(mut self, inputs: &[u8]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    /// Number of diagnostics polls after configuration for which the slave is not ready yet.
    pub fn with_not_ready_polls(mut self, polls: u32) -> Self {
        self.not_ready_polls = polls;
        self
    }

    pub fn address(&self) -> crate::Address {
        self.address
    }

    pub fn set_inputs(&mut self, inputs: &[u8]) {
        self.inputs = inputs.to_vec();
    }

    /// Last output data received from the master.
    pub fn outputs(&self) -> &[u8] {
        &self.outputs
    }

    pub fn is_data_exchange(&self) -> bool {
        self.state == SimulatedState::DataExchange && self.remaining_not_ready == 0
    }

    pub fn data_exchange_count(&self) -> usize {
        self.data_exchange_count
    }

    pub fn last_control(&self) -> Option<ControlCommand> {
        self.last_control
    }

    /// Stop answering telegrams, as if disconnected from the bus.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Report new extended diagnostics with the next data exchange.
    pub fn raise_diagnostics(&mut self, ext_diag: &[u8]) {
        self.ext_diag = ext_diag.to_vec();
        self.diag_pending = true;
    }

    /// Drop parameterization and configuration, like a slave restarting.
    pub fn restart(&mut self) {
        log::debug!("Simulated slave #{} restarts", self.address);
        self.state = SimulatedState::WaitPrm;
        self.master_address = None;
        self.watchdog = None;
        self.faults = DiagnosticFlags::empty();
        self.outputs.clear();
    }

    fn diagnostics(&mut self) -> DiagnosticStatus {
        let mut flags = self.faults | DiagnosticFlags::PERMANENT_BIT;
        match self.state {
            SimulatedState::WaitPrm => {
                flags |= DiagnosticFlags::STATION_NOT_READY | DiagnosticFlags::PARAMETER_REQUIRED
            }
            SimulatedState::WaitCfg => flags |= DiagnosticFlags::STATION_NOT_READY,
            SimulatedState::DataExchange if self.remaining_not_ready > 0 => {
                self.remaining_not_ready -= 1;
                flags |= DiagnosticFlags::STATION_NOT_READY;
            }
            SimulatedState::DataExchange => (),
        }
        if self.watchdog.is_some() {
            flags |= DiagnosticFlags::WATCHDOG_ON;
        }
        self.diag_pending = false;
        DiagnosticStatus::new(flags, self.master_address, self.ident_number)
            .with_extended(&self.ext_diag)
    }

    fn reply(&self, h: &DpHeader, status: ResponseStatus) -> DpHeader {
        DpHeader {
            da: h.sa,
            sa: self.address,
            fc: FunctionCode::new_slave_response(status),
        }
    }
}

fn encode(telegram: &DpTelegram) -> Vec<u8> {
    let mut buffer = vec![0u8; crate::consts::MAX_TELEGRAM_LENGTH];
    let length = telegram.encode(&mut buffer);
    buffer.truncate(length);
    buffer
}

fn short_confirmation() -> Vec<u8> {
    let mut buffer = [0u8; 1];
    let length = crate::fdl::TelegramTx::new(&mut buffer)
        .send_short_confirmation()
        .bytes_sent();
    buffer[..length].to_vec()
}

impl Responder for SimulatedSlave {
    fn respond(&mut self, now: Instant, request: &[u8]) -> Option<Vec<u8>> {
        let telegram = DpTelegram::decode(request).ok()?;
        let h = *telegram.header();
        let unacknowledged = matches!(
            h.fc,
            FunctionCode::Request { req, .. } if req.is_unacknowledged()
        );
        let broadcast = h.da == crate::consts::ADDRESS_BROADCAST;
        if h.da != self.address && !broadcast {
            return None;
        }
        if self.silent {
            return if broadcast { None } else { Some(Vec::new()) };
        }

        if let (SimulatedState::DataExchange, Some(watchdog)) = (self.state, self.watchdog) {
            if now - self.last_telegram > watchdog {
                log::debug!("Simulated slave #{} watchdog expired", self.address);
                self.restart();
            }
        }
        self.last_telegram = now;

        let reply = match telegram {
            DpTelegram::SetPrm { prm, .. } => {
                if prm.ident_number != self.ident_number {
                    self.faults |= DiagnosticFlags::PARAMETER_FAULT;
                    self.state = SimulatedState::WaitPrm;
                } else {
                    self.faults = DiagnosticFlags::empty();
                    self.state = SimulatedState::WaitCfg;
                    self.master_address = Some(h.sa);
                    self.watchdog = prm
                        .station_status
                        .contains(StationStatus::WD_ON)
                        .then(|| {
                            let base = match prm.user_parameters.first() {
                                Some(b) if b & 0x04 != 0 => Duration::from_millis(1),
                                _ => Duration::from_millis(10),
                            };
                            base * u32::from(prm.watchdog_factors.0)
                                * u32::from(prm.watchdog_factors.1)
                        });
                }
                short_confirmation()
            }
            DpTelegram::ChkCfg { config, .. } => {
                if self.state != SimulatedState::WaitPrm {
                    if config == self.config.as_slice() {
                        self.state = SimulatedState::DataExchange;
                        self.remaining_not_ready = self.not_ready_polls;
                    } else {
                        self.faults |= DiagnosticFlags::CONFIGURATION_FAULT;
                        self.state = SimulatedState::WaitPrm;
                    }
                }
                short_confirmation()
            }
            DpTelegram::SlaveDiag { .. } => {
                let diag = self.diagnostics().to_bytes();
                encode(&DpTelegram::SlaveDiag {
                    h: self.reply(&h, ResponseStatus::DataLow),
                    diag: &diag,
                })
            }
            DpTelegram::DataExchange { data, .. } => {
                if !self.is_data_exchange() {
                    let mut buffer = [0u8; 8];
                    let length = crate::fdl::TelegramTx::new(&mut buffer)
                        .send_status_response(h.sa, self.address, ResponseStatus::SapNotEnabled)
                        .bytes_sent();
                    buffer[..length].to_vec()
                } else {
                    self.outputs = data.to_vec();
                    self.data_exchange_count += 1;
                    let status = if self.diag_pending {
                        ResponseStatus::DataHigh
                    } else {
                        ResponseStatus::DataLow
                    };
                    if self.inputs.is_empty() && status == ResponseStatus::DataLow {
                        short_confirmation()
                    } else {
                        encode(&DpTelegram::DataExchange {
                            h: self.reply(&h, status),
                            data: &self.inputs,
                        })
                    }
                }
            }
            DpTelegram::GlobalControl { gc, .. } => {
                self.last_control = Some(gc.command);
                if gc.command.contains(ControlCommand::CLEAR_DATA) {
                    self.outputs.iter_mut().for_each(|b| *b = 0);
                }
                Vec::new()
            }
        };
        if unacknowledged {
            // No reply, and other stations get to see the telegram as well
            return None;
        }
        Some(reply)
    }
}

struct SimulatorBus {
    baudrate: crate::Baudrate,
    bus_time: Instant,
    telegrams: Vec<CapturedTelegram>,
    responders: Vec<Box<dyn Responder>>,
    slaves: Vec<SimulatedSlave>,
    /// Reply in transmission: time of its first byte and its bytes
    response: Option<(Instant, Vec<u8>)>,
    closed: bool,
}

impl SimulatorBus {
    fn new(baudrate: crate::Baudrate) -> Self {
        Self {
            baudrate,
            bus_time: Instant::ZERO,
            telegrams: Vec::new(),
            responders: Vec::new(),
            slaves: Vec::new(),
            response: None,
            closed: false,
        }
    }

    fn transmission_time(&self, length: usize) -> Duration {
        let bits = u32::try_from(length * 11).unwrap_or(u32::MAX);
        self.baudrate.bits_to_time(bits)
    }

    fn capture(&mut self, sender: &'static str, timestamp: Instant, data: Vec<u8>) {
        if let Ok(decoded) = crate::fdl::Telegram::decode(&data) {
            log::trace!("{:8} {}: {:?}", timestamp.total_micros(), sender, decoded);
        } else {
            log::trace!("{:8} {}: {:02x?}", timestamp.total_micros(), sender, data);
        }
        self.telegrams.push(CapturedTelegram {
            sender,
            timestamp,
            data,
        });
    }

    fn transmit(&mut self, data: &[u8]) {
        if let Some((start, reply)) = &self.response {
            if *start + self.transmission_time(reply.len()) > self.bus_time {
                log::debug!("Master transmits while a reply is still on the bus");
            }
        }
        self.response = None;

        let start = self.bus_time;
        self.capture("master", start, data.to_vec());
        self.bus_time += self.transmission_time(data.len());

        let now = self.bus_time;
        let mut reply = None;
        for responder in self.responders.iter_mut() {
            reply = responder.respond(now, data);
            if reply.is_some() {
                break;
            }
        }
        if reply.is_none() {
            for slave in self.slaves.iter_mut() {
                reply = slave.respond(now, data);
                if reply.is_some() {
                    break;
                }
            }
        }

        if let Some(reply) = reply.filter(|r| !r.is_empty()) {
            // Minimum station delay of the responder
            let start = self.bus_time + self.baudrate.bits_to_time(11);
            self.capture("slave", start, reply.clone());
            self.response = Some((start, reply));
        }
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, super::PhyError> {
        let deadline = self.bus_time + timeout;
        match self.response.take() {
            Some((start, mut reply)) if start <= deadline => {
                let end = start + self.transmission_time(reply.len());
                if end > self.bus_time {
                    self.bus_time = end;
                }
                let length = reply.len().min(buffer.len());
                buffer[..length].copy_from_slice(&reply[..length]);
                if length < reply.len() {
                    reply.drain(..length);
                    self.response = Some((self.bus_time, reply));
                }
                Ok(length)
            }
            pending => {
                self.response = pending;
                self.bus_time = deadline;
                Err(super::PhyError::Timeout)
            }
        }
    }
}

/// Simulated bus with simulated time, for testing
///
/// Time only advances through bus activity: transmitting a telegram takes 11 bit times per byte
/// at the configured baudrate and waiting for a reply that never comes takes the full timeout.
/// Idle time is added with [`SimulatorPhy::advance_bus_time()`].
/// Slave stations are modelled by [`SimulatedSlave`]s and custom [`Responder`]s, with custom
/// responders being asked first.
///
/// Handles created with [`SimulatorPhy::duplicate()`] observe the same bus, so a test can keep
/// one for inspection while the DP master owns the other.
pub struct SimulatorPhy {
    bus: sync::Arc<sync::Mutex<SimulatorBus>>,
}

impl SimulatorPhy {
    pub fn new(baudrate: crate::Baudrate) -> Self {
        Self {
            bus: sync::Arc::new(sync::Mutex::new(SimulatorBus::new(baudrate))),
        }
    }

    pub fn duplicate(&self) -> Self {
        Self {
            bus: self.bus.clone(),
        }
    }

    fn bus(&self) -> sync::MutexGuard<'_, SimulatorBus> {
        self.bus.lock().unwrap()
    }

    pub fn add_slave(&self, slave: SimulatedSlave) {
        self.bus().slaves.push(slave);
    }

    pub fn add_responder<R: Responder + 'static>(&self, responder: R) {
        self.bus().responders.push(Box::new(responder));
    }

    /// Access the simulated slave with the given address.
    pub fn with_slave<F, R>(&self, address: crate::Address, f: F) -> Option<R>
    where
        F: FnOnce(&mut SimulatedSlave) -> R,
    {
        self.bus()
            .slaves
            .iter_mut()
            .find(|s| s.address == address)
            .map(f)
    }

    pub fn advance_bus_time(&self, dur: Duration) {
        self.bus().bus_time += dur;
    }

    pub fn bus_time(&self) -> Instant {
        self.bus().bus_time
    }

    /// All telegrams seen on the bus so far.
    pub fn telegrams(&self) -> Vec<CapturedTelegram> {
        self.bus().telegrams.clone()
    }

    /// Number of telegrams the master has transmitted.
    pub fn master_telegram_count(&self) -> usize {
        self.bus()
            .telegrams
            .iter()
            .filter(|t| t.sender == "master")
            .count()
    }

    pub fn clear_log(&self) {
        self.bus().telegrams.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.bus().closed
    }
}

impl super::ProfibusPhy for SimulatorPhy {
    fn send(&mut self, data: &[u8]) -> Result<(), super::PhyError> {
        let mut bus = self.bus();
        if bus.closed {
            return Err(super::PhyError::Closed);
        }
        bus.transmit(data);
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize, super::PhyError> {
        let mut bus = self.bus();
        if bus.closed {
            return Err(super::PhyError::Closed);
        }
        bus.receive(buffer, timeout)
    }

    fn now(&mut self) -> Instant {
        self.bus().bus_time
    }

    fn close(&mut self) {
        self.bus().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::SetPrm;
    use crate::fdl::FrameCountBit;
    use crate::phy::ProfibusPhy;

    fn request(da: u8) -> DpHeader {
        DpHeader {
            da,
            sa: 2,
            fc: FunctionCode::new_srd_low(FrameCountBit::First),
        }
    }

    fn exchange(phy: &mut SimulatorPhy, telegram: DpTelegram) -> Option<Vec<u8>> {
        let request = encode(&telegram);
        phy.send(&request).unwrap();
        let mut buffer = [0u8; 256];
        match phy.receive(&mut buffer, Duration::from_millis(10)) {
            Ok(n) => Some(buffer[..n].to_vec()),
            Err(e) => {
                assert!(e.is_timeout());
                None
            }
        }
    }

    #[test]
    fn silent_bus_times_out() {
        crate::test_utils::prepare_test_logger();
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        let start = phy.now();
        let reply = exchange(
            &mut phy,
            DpTelegram::SlaveDiag {
                h: request(8),
                diag: &[],
            },
        );
        assert_eq!(reply, None);
        // 11 bytes at 19.2 kBaud plus the timeout
        assert_eq!((phy.now() - start).total_micros(), 6302 + 10_000);
    }

    #[test]
    fn closure_responder() {
        crate::test_utils::prepare_test_logger();
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        phy.add_responder(|_: &[u8]| Some(vec![crate::consts::SC]));
        let reply = exchange(
            &mut phy,
            DpTelegram::ChkCfg {
                h: request(8),
                config: &[0x10],
            },
        );
        assert_eq!(reply, Some(vec![crate::consts::SC]));
        assert_eq!(phy.telegrams().len(), 2);
        assert_eq!(phy.master_telegram_count(), 1);
    }

    #[test]
    fn simulated_slave_setup() {
        crate::test_utils::prepare_test_logger();
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        phy.add_slave(SimulatedSlave::new(8, 0x1234, &[0x10, 0x21]).with_inputs(&[0x05]));

        let reply = exchange(
            &mut phy,
            DpTelegram::SetPrm {
                h: request(8),
                prm: SetPrm {
                    station_status: StationStatus::LOCK_REQ,
                    watchdog_factors: (1, 1),
                    min_tsdr: 11,
                    ident_number: 0x1234,
                    groups: 0,
                    user_parameters: &[],
                },
            },
        );
        assert_eq!(reply, Some(vec![crate::consts::SC]));

        let reply = exchange(
            &mut phy,
            DpTelegram::ChkCfg {
                h: request(8),
                config: &[0x10, 0x21],
            },
        );
        assert_eq!(reply, Some(vec![crate::consts::SC]));
        assert_eq!(phy.with_slave(8, |s| s.is_data_exchange()), Some(true));

        let reply = exchange(
            &mut phy,
            DpTelegram::DataExchange {
                h: request(8),
                data: &[0x03, 0x00],
            },
        )
        .unwrap();
        match DpTelegram::decode(&reply).unwrap() {
            DpTelegram::DataExchange { data, .. } => assert_eq!(data, &[0x05]),
            t => panic!("unexpected reply {:?}", t),
        }
        assert_eq!(
            phy.with_slave(8, |s| s.outputs().to_vec()),
            Some(vec![0x03, 0x00])
        );
    }

    #[test]
    fn simulated_slave_reports_config_fault() {
        crate::test_utils::prepare_test_logger();
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        phy.add_slave(SimulatedSlave::new(8, 0x1234, &[0x10]));
        phy.with_slave(8, |s| s.state = SimulatedState::WaitCfg);

        exchange(
            &mut phy,
            DpTelegram::ChkCfg {
                h: request(8),
                config: &[0x20],
            },
        );
        let reply = exchange(
            &mut phy,
            DpTelegram::SlaveDiag {
                h: request(8),
                diag: &[],
            },
        )
        .unwrap();
        let DpTelegram::SlaveDiag { diag, .. } = DpTelegram::decode(&reply).unwrap() else {
            panic!("not a diagnostics reply");
        };
        let diag = crate::dp::interpret(diag).unwrap();
        assert!(diag.flags.contains(DiagnosticFlags::CONFIGURATION_FAULT));
    }

    fn set_prm(h: DpHeader, station_status: StationStatus) -> DpTelegram<'static> {
        DpTelegram::SetPrm {
            h,
            prm: SetPrm {
                station_status,
                watchdog_factors: (1, 30),
                min_tsdr: 11,
                ident_number: 0x1234,
                groups: 0,
                user_parameters: &[],
            },
        }
    }

    #[test]
    fn unacknowledged_request_gets_no_reply() {
        crate::test_utils::prepare_test_logger();
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        phy.add_slave(SimulatedSlave::new(8, 0x1234, &[0x10]));

        let h = DpHeader {
            da: 8,
            sa: 2,
            fc: FunctionCode::new_sdn_low(),
        };
        let reply = exchange(&mut phy, set_prm(h, StationStatus::LOCK_REQ));
        assert_eq!(reply, None);
        assert_eq!(
            phy.with_slave(8, |s| s.state),
            Some(SimulatedState::WaitCfg)
        );
        assert_eq!(phy.telegrams().len(), 1);
    }

    #[test]
    fn simulated_watchdog_expires_while_idle() {
        crate::test_utils::prepare_test_logger();
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        phy.add_slave(SimulatedSlave::new(8, 0x1234, &[0x10]).with_inputs(&[0x05]));

        let reply = exchange(
            &mut phy,
            set_prm(request(8), StationStatus::LOCK_REQ | StationStatus::WD_ON),
        );
        assert_eq!(reply, Some(vec![crate::consts::SC]));
        exchange(
            &mut phy,
            DpTelegram::ChkCfg {
                h: request(8),
                config: &[0x10],
            },
        );
        assert_eq!(phy.with_slave(8, |s| s.is_data_exchange()), Some(true));

        phy.advance_bus_time(Duration::from_millis(200));
        let data_exchange = DpTelegram::DataExchange {
            h: request(8),
            data: &[],
        };
        assert!(exchange(&mut phy, data_exchange.clone()).is_some());
        assert_eq!(phy.with_slave(8, |s| s.is_data_exchange()), Some(true));

        // 10 ms base, factors 1 and 30
        phy.advance_bus_time(Duration::from_millis(301));
        let reply = exchange(&mut phy, data_exchange).unwrap();
        let Ok(crate::fdl::Telegram::Data(t)) = crate::fdl::Telegram::decode(&reply) else {
            panic!("not a data telegram");
        };
        assert_eq!(
            t.h.fc,
            FunctionCode::new_slave_response(ResponseStatus::SapNotEnabled)
        );
        assert_eq!(phy.with_slave(8, |s| s.is_data_exchange()), Some(false));
    }

    #[test]
    fn closed_phy_refuses_access() {
        let mut phy = SimulatorPhy::new(crate::Baudrate::B19200);
        let monitor = phy.duplicate();
        phy.close();
        assert!(monitor.is_closed());
        assert!(matches!(phy.send(&[0xE5]), Err(crate::phy::PhyError::Closed)));
        assert_eq!(monitor.master_telegram_count(), 0);
    }
}
