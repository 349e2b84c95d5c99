//! DP - Decentralized Peripherals
//!
//! The [`DpMaster`] sets up each slave with Set_Prm, Chk_Cfg and Slave_Diag and then performs
//! cyclic data exchange with it.  Slaves are described by a [`SlaveDescriptor`], which may be
//! derived from a [`SlaveCatalog`].
mod catalog;
mod descriptor;
mod diagnostics;
mod error;
mod master;
mod parameters;
mod slave;
mod slave_set;
mod telegram;


pub use catalog::{
    CatalogError, Dpv1Parameters, Dpv1Status1, Dpv1Status2, Dpv1Status3, Module, ModuleCatalog,
    SlaveCatalog,
};
pub use descriptor::{
    io_lengths, watchdog_factors, SlaveDescriptor, SlaveDescriptorBuilder, TruncatedIdentifier,
    MAX_CONFIG_LENGTH, MAX_IO_LENGTH, MAX_USER_PARAMETERS_LENGTH,
};
pub use diagnostics::{
    interpret, ChannelDataType, ChannelDiagnostics, ChannelError, DiagnosticFlags,
    DiagnosticStatus, ExtDiagBlock, ExtDiagBlockIter, DIAGNOSTICS_HEADER_LENGTH,
};
pub use error::{DpError, SetupError, SetupFailure, SlaveFault};
pub use master::DpMaster;
pub use parameters::{Parameters, ParametersBuilder};
pub use slave::{Slave, SlaveState};
pub use slave_set::{SlaveHandle, SlaveStorage};
pub use telegram::{ControlCommand, DpHeader, DpTelegram, GlobalControl, SetPrm, StationStatus};
