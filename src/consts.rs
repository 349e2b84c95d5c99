//! PROFIBUS Constants

/// Start Delimiter 1
pub const SD1: u8 = 0x10;
/// Start Delimiter 2
pub const SD2: u8 = 0x68;
/// Start Delimiter 3
pub const SD3: u8 = 0xA2;
/// End Delimiter
pub const ED: u8 = 0x16;
/// Short Confirmation
pub const SC: u8 = 0xE5;

/// Broadcast/multicast destination address
pub const ADDRESS_BROADCAST: u8 = 127;
/// Highest address a DP slave may use
pub const ADDRESS_SLAVE_MAX: u8 = 125;
/// Master address reported by a slave that is not parameterized
pub const ADDRESS_NONE: u8 = 255;

pub const SAP_SLAVE_GLOBAL_CONTROL: Option<u8> = Some(58);
pub const SAP_SLAVE_DIAGNOSIS: Option<u8> = Some(60);
pub const SAP_SLAVE_SET_PRM: Option<u8> = Some(61);
pub const SAP_SLAVE_CHK_CFG: Option<u8> = Some(62);
pub const SAP_SLAVE_DATA_EXCHANGE: Option<u8> = None;

pub const SAP_MASTER_MS0: Option<u8> = Some(62);
pub const SAP_MASTER_DATA_EXCHANGE: Option<u8> = None;

/// Largest value of the LE field of an SD2 telegram
pub const MAX_TELEGRAM_LE: usize = 249;
/// Largest complete telegram on the wire
pub const MAX_TELEGRAM_LENGTH: usize = MAX_TELEGRAM_LE + 6;
