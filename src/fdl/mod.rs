//! FDL - Fieldbus Data Link
//!
//! Telegram framing for PROFIBUS layer 2.  The DP master is the only active station on the bus,
//! so this module only deals with the telegram formats used between a master and its slaves:
//! data telegrams (SD1, SD2, SD3) and the short confirmation.
mod telegram;

pub use telegram::{
    checksum, DataTelegram, DataTelegramHeader, DecodeError, FrameCountBit, FunctionCode,
    RequestType, ResponseState, ResponseStatus, ShortConfirmation, Telegram, TelegramTx,
    TelegramTxResponse,
};
