//! DP service telegrams
//!
//! The DP services a class-1 master uses are all carried in FDL data telegrams.  Which service a
//! telegram belongs to is determined by its pair of service access points (SAPs).  [`DpTelegram`]
//! is the closed set of these services; all telegrams the master sends are constructed as a
//! `DpTelegram` and serialized through [`DpTelegram::encode()`].
use crate::fdl::{DataTelegram, DataTelegramHeader, DecodeError, FunctionCode};

bitflags::bitflags! {
    /// Station status byte of a Set_Prm telegram
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct StationStatus: u8 {
        const WD_ON =       0b00001000;
        const FREEZE_REQ =  0b00010000;
        const SYNC_REQ =    0b00100000;
        const UNLOCK_REQ =  0b01000000;
        const LOCK_REQ =    0b10000000;
    }
}

bitflags::bitflags! {
    /// Control command of a Global_Control telegram
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ControlCommand: u8 {
        const CLEAR_DATA =  0b00000010;
        const UNFREEZE =    0b00000100;
        const FREEZE =      0b00001000;
        const UNSYNC =      0b00010000;
        const SYNC =        0b00100000;
    }
}

/// Payload of a Set_Prm (parameterization) telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPrm<'a> {
    pub station_status: StationStatus,
    /// Watchdog factors, the watchdog timeout is `f1 * f2 * time base`.
    pub watchdog_factors: (u8, u8),
    /// Minimum station delay of the responder (in bit times)
    pub min_tsdr: u8,
    pub ident_number: u16,
    /// Group membership mask
    pub groups: u8,
    pub user_parameters: &'a [u8],
}

impl SetPrm<'_> {
    /// Length of the fixed part of the Set_Prm payload.
    pub const HEADER_LENGTH: usize = 7;
}

/// Payload of a Global_Control telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalControl {
    pub command: ControlCommand,
    /// Group select, `0` addresses all slaves
    pub groups: u8,
}

impl GlobalControl {
    pub fn new(command: ControlCommand) -> Self {
        Self { command, groups: 0 }
    }

    pub fn with_groups(mut self, groups: u8) -> Self {
        self.groups = groups;
        self
    }
}

/// Header shared by all DP telegrams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DpHeader {
    /// Destination Address
    pub da: u8,
    /// Source Address
    pub sa: u8,
    /// Function Code
    pub fc: FunctionCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpTelegram<'a> {
    /// Set_Prm request
    SetPrm { h: DpHeader, prm: SetPrm<'a> },
    /// Chk_Cfg request carrying the configuration bytes
    ChkCfg { h: DpHeader, config: &'a [u8] },
    /// Slave_Diag request (empty) or response (diagnostics bytes)
    SlaveDiag { h: DpHeader, diag: &'a [u8] },
    /// Data_Exchange request (outputs) or response (inputs)
    DataExchange { h: DpHeader, data: &'a [u8] },
    /// Global_Control request
    GlobalControl { h: DpHeader, gc: GlobalControl },
}

impl<'a> DpTelegram<'a> {
    pub fn header(&self) -> &DpHeader {
        match self {
            DpTelegram::SetPrm { h, .. }
            | DpTelegram::ChkCfg { h, .. }
            | DpTelegram::SlaveDiag { h, .. }
            | DpTelegram::DataExchange { h, .. }
            | DpTelegram::GlobalControl { h, .. } => h,
        }
    }

    fn saps(&self) -> (Option<u8>, Option<u8>) {
        use crate::consts::*;
        match self {
            DpTelegram::SetPrm { .. } => (SAP_SLAVE_SET_PRM, SAP_MASTER_MS0),
            DpTelegram::ChkCfg { .. } => (SAP_SLAVE_CHK_CFG, SAP_MASTER_MS0),
            DpTelegram::SlaveDiag { h, .. } if h.fc.is_request() => {
                (SAP_SLAVE_DIAGNOSIS, SAP_MASTER_MS0)
            }
            DpTelegram::SlaveDiag { .. } => (SAP_MASTER_MS0, SAP_SLAVE_DIAGNOSIS),
            DpTelegram::DataExchange { .. } => {
                (SAP_SLAVE_DATA_EXCHANGE, SAP_MASTER_DATA_EXCHANGE)
            }
            DpTelegram::GlobalControl { .. } => (SAP_SLAVE_GLOBAL_CONTROL, SAP_MASTER_MS0),
        }
    }

    /// Length of the PDU excluding SAPs.
    pub fn pdu_length(&self) -> usize {
        match self {
            DpTelegram::SetPrm { prm, .. } => SetPrm::HEADER_LENGTH + prm.user_parameters.len(),
            DpTelegram::ChkCfg { config, .. } => config.len(),
            DpTelegram::SlaveDiag { diag, .. } => diag.len(),
            DpTelegram::DataExchange { data, .. } => data.len(),
            DpTelegram::GlobalControl { .. } => 2,
        }
    }

    fn fdl_header(&self) -> DataTelegramHeader {
        let h = self.header();
        let (dsap, ssap) = self.saps();
        DataTelegramHeader {
            da: h.da,
            sa: h.sa,
            dsap,
            ssap,
            fc: h.fc,
        }
    }

    /// Serialize into `buffer` and return the telegram length.
    ///
    /// # Panics
    /// Panics when the payload exceeds the maximum telegram size or `buffer` is too small.
    pub fn encode(&self, buffer: &mut [u8]) -> usize {
        let tx = crate::fdl::TelegramTx::new(buffer);
        tx.send_data_telegram(self.fdl_header(), self.pdu_length(), |buf| match self {
            DpTelegram::SetPrm { prm, .. } => {
                buf[0] = prm.station_status.bits();
                buf[1] = prm.watchdog_factors.0;
                buf[2] = prm.watchdog_factors.1;
                buf[3] = prm.min_tsdr;
                buf[4..6].copy_from_slice(&prm.ident_number.to_be_bytes());
                buf[6] = prm.groups;
                buf[SetPrm::HEADER_LENGTH..].copy_from_slice(prm.user_parameters);
            }
            DpTelegram::ChkCfg { config: data, .. }
            | DpTelegram::SlaveDiag { diag: data, .. }
            | DpTelegram::DataExchange { data, .. } => buf.copy_from_slice(data),
            DpTelegram::GlobalControl { gc, .. } => {
                buf[0] = gc.command.bits();
                buf[1] = gc.groups;
            }
        })
        .bytes_sent()
    }

    /// Interpret an FDL data telegram as a DP telegram.
    pub fn from_fdl(t: &DataTelegram<'a>) -> Result<Self, DecodeError> {
        use crate::consts::*;

        let h = DpHeader {
            da: t.h.da,
            sa: t.h.sa,
            fc: t.h.fc,
        };
        let is_request = t.h.fc.is_request();
        let pdu = t.pdu;

        match (t.h.dsap, t.h.ssap) {
            (SAP_SLAVE_SET_PRM, SAP_MASTER_MS0) if is_request => {
                if pdu.len() < SetPrm::HEADER_LENGTH {
                    return Err(DecodeError::BadLength);
                }
                Ok(DpTelegram::SetPrm {
                    h,
                    prm: SetPrm {
                        station_status: StationStatus::from_bits_retain(pdu[0]),
                        watchdog_factors: (pdu[1], pdu[2]),
                        min_tsdr: pdu[3],
                        ident_number: u16::from_be_bytes([pdu[4], pdu[5]]),
                        groups: pdu[6],
                        user_parameters: &pdu[SetPrm::HEADER_LENGTH..],
                    },
                })
            }
            (SAP_SLAVE_CHK_CFG, SAP_MASTER_MS0) if is_request => {
                Ok(DpTelegram::ChkCfg { h, config: pdu })
            }
            (SAP_SLAVE_DIAGNOSIS, SAP_MASTER_MS0) if is_request => {
                Ok(DpTelegram::SlaveDiag { h, diag: pdu })
            }
            (SAP_MASTER_MS0, SAP_SLAVE_DIAGNOSIS) if !is_request => {
                Ok(DpTelegram::SlaveDiag { h, diag: pdu })
            }
            (SAP_SLAVE_GLOBAL_CONTROL, SAP_MASTER_MS0) if is_request => {
                let [command, groups] = pdu else {
                    return Err(DecodeError::BadLength);
                };
                Ok(DpTelegram::GlobalControl {
                    h,
                    gc: GlobalControl {
                        command: ControlCommand::from_bits_retain(*command),
                        groups: *groups,
                    },
                })
            }
            (SAP_SLAVE_DATA_EXCHANGE, SAP_MASTER_DATA_EXCHANGE) => {
                Ok(DpTelegram::DataExchange { h, data: pdu })
            }
            (dsap, ssap) => {
                log::debug!(
                    "Unknown DP service: DSAP {:?}, SSAP {:?}, {:?}",
                    dsap,
                    ssap,
                    t.h.fc
                );
                Err(DecodeError::UnknownFunction)
            }
        }
    }

    /// Decode a DP telegram from raw bytes.
    ///
    /// A short confirmation carries no DP service and is rejected as
    /// [`DecodeError::UnknownFunction`].
    pub fn decode(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        match crate::fdl::Telegram::decode(buffer)? {
            crate::fdl::Telegram::Data(t) => Self::from_fdl(&t),
            crate::fdl::Telegram::ShortConfirmation(_) => Err(DecodeError::UnknownFunction),
        }
    }
}
