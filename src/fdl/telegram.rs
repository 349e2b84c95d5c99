#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum RequestType {
    /// Clock Value
    ClockValue = 1 << 7,
    /// Time Event
    TimeEvent = 0,
    /// SDA (Send Data Acknowledged) with low priority
    SdaLow = 3,
    /// SDN (Send Data Not acknowledged) with low priority
    SdnLow = 4,
    /// SDA (Send Data Acknowledged) with high priority
    SdaHigh = 5,
    /// SDN (Send Data Not acknowledged) with high priority
    SdnHigh = 6,
    /// SRD (Send Request Data) with multicast reply
    MulticastSrd = 7,
    /// Request FDL status
    FdlStatus = 9,
    /// SRD (Send Request Data) with low priority
    SrdLow = 12,
    /// SRD (Send Request Data) with high priority
    SrdHigh = 13,
    /// Request ident
    Ident = 14,
    /// Request LSAP status (deprecated)
    LsapStatus = 15,
}

impl RequestType {
    pub fn from_u8(b: u8) -> Option<RequestType> {
        match b {
            0x80 => Some(Self::ClockValue),
            0 => Some(Self::TimeEvent),
            3 => Some(Self::SdaLow),
            4 => Some(Self::SdnLow),
            5 => Some(Self::SdaHigh),
            6 => Some(Self::SdnHigh),
            7 => Some(Self::MulticastSrd),
            9 => Some(Self::FdlStatus),
            12 => Some(Self::SrdLow),
            13 => Some(Self::SrdHigh),
            14 => Some(Self::Ident),
            15 => Some(Self::LsapStatus),
            _ => None,
        }
    }

    /// Whether the responder must not reply to this request.
    pub fn is_unacknowledged(self) -> bool {
        matches!(self, Self::SdnLow | Self::SdnHigh | Self::TimeEvent | Self::ClockValue)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum ResponseState {
    /// Slave
    Slave = 0,
    /// Master is not ready
    MasterNotReady = 1,
    /// Master is ready but has no token
    MasterWithoutToken = 2,
    /// Master is ready and in token ring
    MasterInRing = 3,
}

impl ResponseState {
    pub fn from_u8(b: u8) -> Option<ResponseState> {
        match b {
            0 => Some(Self::Slave),
            1 => Some(Self::MasterNotReady),
            2 => Some(Self::MasterWithoutToken),
            3 => Some(Self::MasterInRing),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum ResponseStatus {
    /// OK
    Ok = 0,
    /// UE = User error
    UserError = 1,
    /// RR = No resources
    NoResources = 2,
    /// RS = SAP not enabled
    SapNotEnabled = 3,
    /// DL = Data Low
    DataLow = 8,
    /// NR = No response data ready
    NoDataReady = 9,
    /// DH = Data High
    DataHigh = 10,
    /// RDL = Data not received and data low
    NotReceivedDataLow = 12,
    /// RDH = Data not received and data high
    NotReceivedDataHigh = 13,
}

impl ResponseStatus {
    pub fn from_u8(b: u8) -> Option<ResponseStatus> {
        match b {
            0 => Some(Self::Ok),
            1 => Some(Self::UserError),
            2 => Some(Self::NoResources),
            3 => Some(Self::SapNotEnabled),
            8 => Some(Self::DataLow),
            9 => Some(Self::NoDataReady),
            10 => Some(Self::DataHigh),
            12 => Some(Self::NotReceivedDataLow),
            13 => Some(Self::NotReceivedDataHigh),
            _ => None,
        }
    }

    /// Whether the responder accepted the request.
    ///
    /// `UE`, `RR`, `RS`, `RDL` and `RDH` report that the request was refused or not received by
    /// the responder's user.
    pub fn is_positive(self) -> bool {
        matches!(
            self,
            Self::Ok | Self::DataLow | Self::DataHigh | Self::NoDataReady
        )
    }
}

/// Frame Count Bit
///
/// The FCB (Frame Count Bit) is used to detect lost messages and prevent duplication on either
/// side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum FrameCountBit {
    #[default]
    First,
    High,
    Low,
    Inactive,
}

impl FrameCountBit {
    pub fn reset(&mut self) {
        *self = FrameCountBit::First;
    }

    /// Toggle the FCB after a completed message cycle.
    ///
    /// An inactive FCB stays inactive.
    pub fn cycle(&mut self) {
        *self = match self {
            FrameCountBit::First => FrameCountBit::Low,
            FrameCountBit::High => FrameCountBit::Low,
            FrameCountBit::Low => FrameCountBit::High,
            FrameCountBit::Inactive => FrameCountBit::Inactive,
        }
    }

    pub fn fcb(self) -> bool {
        match self {
            FrameCountBit::First => true,
            FrameCountBit::High => true,
            FrameCountBit::Low => false,
            FrameCountBit::Inactive => false,
        }
    }

    pub fn fcv(self) -> bool {
        match self {
            FrameCountBit::First => false,
            FrameCountBit::High => true,
            FrameCountBit::Low => true,
            FrameCountBit::Inactive => false,
        }
    }

    pub fn from_fcv_fcb(fcv: bool, fcb: bool) -> FrameCountBit {
        match (fcv, fcb) {
            (false, false) => FrameCountBit::Inactive,
            (false, true) => FrameCountBit::First,
            (true, true) => FrameCountBit::High,
            (true, false) => FrameCountBit::Low,
        }
    }
}

/// Reasons for rejecting a received byte sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than the telegram needs (so far).
    #[error("telegram is truncated")]
    Truncated,
    /// Length fields are inconsistent or do not match the received bytes.
    #[error("telegram length is invalid")]
    BadLength,
    /// The frame check sequence does not match.
    #[error("telegram checksum mismatch")]
    BadChecksum,
    /// Start or end delimiter is not what the frame type requires.
    #[error("telegram delimiter is invalid")]
    BadDelimiter,
    /// The function code or service access points do not name a known service.
    #[error("telegram function is unknown")]
    UnknownFunction,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum FunctionCode {
    /// This marks a request telegram
    Request {
        fcb: FrameCountBit,
        req: RequestType,
    },
    /// This marks a response telegram
    Response {
        state: ResponseState,
        status: ResponseStatus,
    },
}

impl FunctionCode {
    pub fn to_byte(self) -> u8 {
        match self {
            FunctionCode::Request { fcb, req } => {
                (1 << 6) | req as u8 | ((fcb.fcv() as u8) << 4) | ((fcb.fcb() as u8) << 5)
            }
            FunctionCode::Response { state, status } => ((state as u8) << 4) | status as u8,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, DecodeError> {
        if b & (1 << 6) != 0 {
            let fcv = b & (1 << 4) != 0;
            let fcb = b & (1 << 5) != 0;
            let req = RequestType::from_u8(b & 0x8F).ok_or(DecodeError::UnknownFunction)?;
            Ok(Self::Request {
                fcb: FrameCountBit::from_fcv_fcb(fcv, fcb),
                req,
            })
        } else if b & (1 << 7) != 0 {
            // Reserved in responses
            Err(DecodeError::UnknownFunction)
        } else {
            let state =
                ResponseState::from_u8((b & 0x30) >> 4).ok_or(DecodeError::UnknownFunction)?;
            let status = ResponseStatus::from_u8(b & 0x0F).ok_or(DecodeError::UnknownFunction)?;
            Ok(Self::Response { state, status })
        }
    }

    pub fn new_srd_low(fcb: FrameCountBit) -> Self {
        Self::Request {
            fcb,
            req: RequestType::SrdLow,
        }
    }

    pub fn new_srd_high(fcb: FrameCountBit) -> Self {
        Self::Request {
            fcb,
            req: RequestType::SrdHigh,
        }
    }

    pub fn new_sdn_low() -> Self {
        Self::Request {
            fcb: FrameCountBit::Inactive,
            req: RequestType::SdnLow,
        }
    }

    pub fn new_slave_response(status: ResponseStatus) -> Self {
        Self::Response {
            state: ResponseState::Slave,
            status,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(self, FunctionCode::Request { .. })
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataTelegramHeader {
    /// Destination Address
    pub da: u8,
    /// Source Address
    pub sa: u8,
    /// Destination "Service Access Point"
    pub dsap: Option<u8>,
    /// Source "Service Access Point"
    pub ssap: Option<u8>,
    /// Function Code
    pub fc: FunctionCode,
}

impl DataTelegramHeader {
    /// Length of the complete telegram, with a PDU of `pdu_len` bytes, on the wire.
    pub fn telegram_length(&self, pdu_len: usize) -> usize {
        match self.length_byte(pdu_len) {
            3 => 6,
            11 => 14,
            le => le + 6,
        }
    }

    fn length_byte(&self, pdu_len: usize) -> usize {
        pdu_len + usize::from(self.dsap.is_some()) + usize::from(self.ssap.is_some()) + 3
    }

    /// Write the telegram into `buffer` and return its length.
    ///
    /// `write_pdu` receives a zeroed PDU buffer of `pdu_len` bytes.
    ///
    /// # Panics
    /// Panics when the PDU does not fit a PROFIBUS telegram or `buffer` is too small.
    pub fn serialize<F>(&self, buffer: &mut [u8], pdu_len: usize, write_pdu: F) -> usize
    where
        F: FnOnce(&mut [u8]),
    {
        let length_byte = self.length_byte(pdu_len);
        assert!(length_byte <= crate::consts::MAX_TELEGRAM_LE);
        debug_assert!(self.da < 0x80 && self.sa < 0x80);

        let mut cursor = 0;

        let sc = match length_byte {
            // no PDU
            3 => crate::consts::SD1,
            // exactly 8 bytes content (3 + 8)
            11 => crate::consts::SD3,
            // all other lengths
            _ => crate::consts::SD2,
        };
        buffer[cursor] = sc;
        cursor += 1;
        if sc == crate::consts::SD2 {
            let le = length_byte as u8;
            buffer[cursor] = le;
            buffer[cursor + 1] = le;
            buffer[cursor + 2] = sc;
            cursor += 3;
        }

        let checksum_start = cursor;

        let da_ext = if self.dsap.is_some() { 0x80 } else { 0x00 };
        buffer[cursor] = self.da | da_ext;
        let sa_ext = if self.ssap.is_some() { 0x80 } else { 0x00 };
        buffer[cursor + 1] = self.sa | sa_ext;
        buffer[cursor + 2] = self.fc.to_byte();
        cursor += 3;

        if let Some(dsap) = self.dsap {
            buffer[cursor] = dsap;
            cursor += 1;
        }
        if let Some(ssap) = self.ssap {
            buffer[cursor] = ssap;
            cursor += 1;
        }

        let pdu_buffer = &mut buffer[cursor..cursor + pdu_len];
        pdu_buffer.fill(0x00);
        write_pdu(pdu_buffer);
        cursor += pdu_len;

        buffer[cursor] = checksum(&buffer[checksum_start..cursor]);
        buffer[cursor + 1] = crate::consts::ED;
        cursor += 2;

        cursor
    }
}

/// Frame check sequence: arithmetic sum of all bytes, modulo 256.
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().copied().fold(0, u8::wrapping_add)
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataTelegram<'a> {
    /// Telegram Header Information
    pub h: DataTelegramHeader,
    /// Protocol Data Unit - Payload of the telegram
    pub pdu: &'a [u8],
}

impl<'a> DataTelegram<'a> {
    /// Decode a data telegram (SD1, SD2 or SD3).
    ///
    /// The buffer must hold exactly one telegram.  Only the canonical encoding of a telegram is
    /// accepted, e.g. an SD2 frame carrying exactly 8 data bytes is rejected because it must be
    /// sent as SD3.
    pub fn deserialize(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        let (header_len, du_len) = match buffer.first().copied() {
            None => return Err(DecodeError::Truncated),
            Some(crate::consts::SD1) => (1, 0),
            Some(crate::consts::SD3) => (1, 8),
            Some(crate::consts::SD2) => {
                if buffer.len() < 4 {
                    return Err(DecodeError::Truncated);
                }
                let l1 = buffer[1];
                let l2 = buffer[2];
                if l1 != l2 {
                    log::debug!("Length fields differ: {} != {}", l1, l2);
                    return Err(DecodeError::BadLength);
                }
                if buffer[3] != crate::consts::SD2 {
                    return Err(DecodeError::BadDelimiter);
                }
                let le = usize::from(l1);
                if !(4..=crate::consts::MAX_TELEGRAM_LE).contains(&le) || le == 11 {
                    log::debug!("Non-canonical or invalid length field: {}", le);
                    return Err(DecodeError::BadLength);
                }
                (4, le - 3)
            }
            Some(_) => return Err(DecodeError::BadDelimiter),
        };

        let total_length = header_len + 3 + du_len + 2;
        if buffer.len() < total_length {
            return Err(DecodeError::Truncated);
        } else if buffer.len() > total_length {
            log::debug!("Trailing bytes after telegram");
            return Err(DecodeError::BadLength);
        }

        let (checked, trailer) = buffer[header_len..].split_at(3 + du_len);
        if trailer[0] != checksum(checked) {
            log::debug!("Checksum mismatch");
            return Err(DecodeError::BadChecksum);
        }
        if trailer[1] != crate::consts::ED {
            log::debug!("No end delimiter");
            return Err(DecodeError::BadDelimiter);
        }

        let da = checked[0];
        let sa = checked[1];
        let fc = FunctionCode::from_byte(checked[2]).inspect_err(|_| {
            log::debug!("Unparseable function code 0x{:02x}", checked[2]);
        })?;

        let mut du = &checked[3..];
        let dsap = if da & 0x80 != 0 {
            let (dsap, rest) = du.split_first().ok_or(DecodeError::BadLength)?;
            du = rest;
            Some(*dsap)
        } else {
            None
        };
        let ssap = if sa & 0x80 != 0 {
            let (ssap, rest) = du.split_first().ok_or(DecodeError::BadLength)?;
            du = rest;
            Some(*ssap)
        } else {
            None
        };

        Ok(DataTelegram {
            h: DataTelegramHeader {
                da: da & !0x80,
                sa: sa & !0x80,
                dsap,
                ssap,
                fc,
            },
            pdu: du,
        })
    }

    pub fn serialize(&self, buffer: &mut [u8]) -> usize {
        self.h
            .serialize(buffer, self.pdu.len(), |buf| buf.copy_from_slice(self.pdu))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ShortConfirmation;

impl ShortConfirmation {
    pub fn serialize(&self, buffer: &mut [u8]) -> usize {
        buffer[0] = crate::consts::SC;
        1
    }
}

#[derive(PartialEq, Eq, Clone)]
pub enum Telegram<'a> {
    Data(DataTelegram<'a>),
    ShortConfirmation(ShortConfirmation),
}

impl core::fmt::Debug for Telegram<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Telegram::Data(d) => core::fmt::Debug::fmt(d, f),
            Telegram::ShortConfirmation(s) => core::fmt::Debug::fmt(s, f),
        }
    }
}

impl<'a> From<DataTelegram<'a>> for Telegram<'a> {
    fn from(value: DataTelegram<'a>) -> Self {
        Self::Data(value)
    }
}

impl From<ShortConfirmation> for Telegram<'_> {
    fn from(value: ShortConfirmation) -> Self {
        Self::ShortConfirmation(value)
    }
}

impl<'a> Telegram<'a> {
    /// Decode exactly one telegram from `buffer`.
    ///
    /// Returns [`DecodeError::Truncated`] while `buffer` holds only the beginning of a telegram.
    pub fn decode(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        match buffer.first().copied() {
            None => Err(DecodeError::Truncated),
            Some(crate::consts::SC) if buffer.len() == 1 => Ok(ShortConfirmation.into()),
            Some(crate::consts::SC) => Err(DecodeError::BadLength),
            Some(crate::consts::SD1 | crate::consts::SD2 | crate::consts::SD3) => {
                DataTelegram::deserialize(buffer).map(Telegram::from)
            }
            Some(_) => Err(DecodeError::BadDelimiter),
        }
    }

    /// Write this telegram into `buffer` and return the number of bytes written.
    pub fn encode(&self, buffer: &mut [u8]) -> usize {
        match self {
            Telegram::Data(d) => d.serialize(buffer),
            Telegram::ShortConfirmation(sc) => sc.serialize(buffer),
        }
    }
}

pub struct TelegramTx<'a> {
    buf: &'a mut [u8],
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TelegramTxResponse {
    bytes_sent: usize,
}

impl<'a> TelegramTx<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn send_short_confirmation(self) -> TelegramTxResponse {
        let sc_telegram = ShortConfirmation;
        TelegramTxResponse::new(sc_telegram.serialize(self.buf))
    }

    pub fn send_data_telegram<F: FnOnce(&mut [u8])>(
        self,
        header: DataTelegramHeader,
        pdu_len: usize,
        write_pdu: F,
    ) -> TelegramTxResponse {
        TelegramTxResponse::new(header.serialize(self.buf, pdu_len, write_pdu))
    }

    /// Send a response without data, e.g. to refuse a request.
    pub fn send_status_response(self, da: u8, sa: u8, status: ResponseStatus) -> TelegramTxResponse {
        self.send_data_telegram(
            DataTelegramHeader {
                da,
                sa,
                dsap: None,
                ssap: None,
                fc: FunctionCode::new_slave_response(status),
            },
            0,
            |_| (),
        )
    }
}

impl TelegramTxResponse {
    pub fn new(bytes_sent: usize) -> Self {
        Self { bytes_sent }
    }
    pub fn bytes_sent(self) -> usize {
        self.bytes_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fdl_status_header() -> DataTelegramHeader {
        DataTelegramHeader {
            da: 34,
            sa: 2,
            dsap: None,
            ssap: None,
            fc: FunctionCode::Request {
                fcb: FrameCountBit::Inactive,
                req: RequestType::FdlStatus,
            },
        }
    }

    #[test]
    fn generate_fdl_status_telegram() {
        let mut buffer = vec![0x00; 256];
        let tx = TelegramTx::new(&mut buffer);
        let length = tx
            .send_data_telegram(fdl_status_header(), 0, |_| ())
            .bytes_sent();
        let msg = &buffer[..length];
        let expected = &[0x10, 0x22, 0x02, 0x49, 0x6D, 0x16];
        assert_eq!(msg, expected);
    }

    #[test]
    fn parse_fdl_status_telegram() {
        crate::test_utils::prepare_test_logger();
        let msg = &[0x10, 0x22, 0x02, 0x49, 0x6D, 0x16];
        let telegram = Telegram::decode(msg).unwrap();
        assert_eq!(
            telegram,
            Telegram::Data(DataTelegram {
                h: fdl_status_header(),
                pdu: &[],
            })
        );
    }

    #[test]
    fn parse_fdl_response_telegram() {
        crate::test_utils::prepare_test_logger();
        let msg = &[0x10, 0x02, 0x22, 0x00, 0x24, 0x16];
        let telegram = Telegram::decode(msg).unwrap();
        assert_eq!(
            telegram,
            Telegram::Data(DataTelegram {
                h: DataTelegramHeader {
                    da: 2,
                    sa: 34,
                    dsap: None,
                    ssap: None,
                    fc: FunctionCode::Response {
                        state: ResponseState::Slave,
                        status: ResponseStatus::Ok
                    }
                },
                pdu: &[],
            })
        )
    }

    #[test]
    fn parse_slave_diag_request() {
        // Slave_Diag request from master #2 to slave #8
        let msg = &[0x68, 0x05, 0x05, 0x68, 0x88, 0x82, 0x6C, 0x3C, 0x3E, 0xF0, 0x16];
        let telegram = Telegram::decode(msg).unwrap();
        let Telegram::Data(t) = telegram else {
            panic!("not a data telegram: {telegram:?}");
        };
        assert_eq!(t.h.da, 8);
        assert_eq!(t.h.sa, 2);
        assert_eq!(t.h.dsap, Some(60));
        assert_eq!(t.h.ssap, Some(62));
        assert_eq!(t.h.fc, FunctionCode::new_srd_low(FrameCountBit::First));
        assert_eq!(t.pdu, &[]);
    }

    #[test]
    fn short_confirmation() {
        assert_eq!(
            Telegram::decode(&[0xE5]),
            Ok(Telegram::ShortConfirmation(ShortConfirmation))
        );
        assert_eq!(Telegram::decode(&[0xE5, 0xE5]), Err(DecodeError::BadLength));
    }

    #[rstest::rstest]
    #[case::empty(&[], DecodeError::Truncated)]
    #[case::sd1_short(&[0x10, 0x22, 0x02], DecodeError::Truncated)]
    #[case::sd2_short(&[0x68, 0x05], DecodeError::Truncated)]
    #[case::unknown_sd(&[0x42, 0x22, 0x02, 0x49, 0x6D, 0x16], DecodeError::BadDelimiter)]
    #[case::bad_ed(&[0x10, 0x22, 0x02, 0x49, 0x6D, 0x17], DecodeError::BadDelimiter)]
    #[case::bad_fcs(&[0x10, 0x22, 0x02, 0x49, 0x6E, 0x16], DecodeError::BadChecksum)]
    #[case::trailing(&[0x10, 0x22, 0x02, 0x49, 0x6D, 0x16, 0x00], DecodeError::BadLength)]
    #[case::le_mismatch(&[0x68, 0x05, 0x06, 0x68, 0x88, 0x82, 0x6C, 0x3C, 0x3E, 0xF0, 0x16], DecodeError::BadLength)]
    #[case::le_sd3_length(&[0x68, 0x0B, 0x0B, 0x68], DecodeError::BadLength)]
    #[case::sd2_repeat(&[0x68, 0x05, 0x05, 0x10, 0x88, 0x82, 0x6C, 0x3C, 0x3E, 0xF0, 0x16], DecodeError::BadDelimiter)]
    #[case::sap_missing(&[0x10, 0xA2, 0x02, 0x49, 0xED, 0x16], DecodeError::BadLength)]
    #[case::unknown_fc(&[0x10, 0x22, 0x02, 0x41, 0x65, 0x16], DecodeError::UnknownFunction)]
    #[case::reserved_fc(&[0x10, 0x22, 0x02, 0x80, 0xA4, 0x16], DecodeError::UnknownFunction)]
    fn reject_invalid_telegrams(#[case] msg: &[u8], #[case] expected: DecodeError) {
        crate::test_utils::prepare_test_logger();
        assert_eq!(Telegram::decode(msg), Err(expected));
    }

    #[test]
    fn truncated_prefixes() {
        let mut buffer = [0u8; 64];
        let len = DataTelegramHeader {
            da: 8,
            sa: 2,
            dsap: None,
            ssap: None,
            fc: FunctionCode::new_srd_high(FrameCountBit::High),
        }
        .serialize(&mut buffer, 5, |pdu| pdu.copy_from_slice(&[1, 2, 3, 4, 5]));

        for prefix in 0..len {
            assert_eq!(
                Telegram::decode(&buffer[..prefix]),
                Err(DecodeError::Truncated),
                "prefix of length {prefix}"
            );
        }
        assert!(Telegram::decode(&buffer[..len]).is_ok());
    }

    #[test]
    fn telegram_length_matches_serialized() {
        let mut buffer = [0u8; 256];
        for pdu_len in [0, 1, 6, 8, 9, 240] {
            let h = DataTelegramHeader {
                da: 8,
                sa: 2,
                dsap: Some(61),
                ssap: Some(62),
                fc: FunctionCode::new_srd_low(FrameCountBit::First),
            };
            let len = h.serialize(&mut buffer, pdu_len, |_| ());
            assert_eq!(h.telegram_length(pdu_len), len);
        }
    }

    fn data_telegram_parts() -> impl Strategy<
        Value = (u8, u8, Option<u8>, Option<u8>, FunctionCode, Vec<u8>),
    > {
        (
            0u8..0x80,
            0u8..0x80,
            any::<Option<u8>>(),
            any::<Option<u8>>(),
            any::<FunctionCode>(),
            proptest::collection::vec(any::<u8>(), 0..=244),
        )
    }

    proptest! {
        #[test]
        fn function_code_serdes(fc in any::<FunctionCode>()) {
            let fc_byte = fc.to_byte();
            let fc_again = FunctionCode::from_byte(fc_byte);
            prop_assert_eq!(Ok(fc), fc_again);
        }

        #[test]
        fn function_code_canonical(b in any::<u8>()) {
            if let Ok(fc) = FunctionCode::from_byte(b) {
                prop_assert_eq!(fc.to_byte(), b);
            }
        }

        #[test]
        fn data_telegram_roundtrip((da, sa, dsap, ssap, fc, pdu) in data_telegram_parts()) {
            let telegram = Telegram::Data(DataTelegram {
                h: DataTelegramHeader { da, sa, dsap, ssap, fc },
                pdu: &pdu,
            });
            let mut buffer = [0u8; 256];
            let length = telegram.encode(&mut buffer);
            prop_assert_eq!(Telegram::decode(&buffer[..length]), Ok(telegram));
        }

        #[test]
        fn single_byte_corruption_is_rejected(
            (da, sa, dsap, ssap, fc, pdu) in data_telegram_parts(),
            position in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let telegram = Telegram::Data(DataTelegram {
                h: DataTelegramHeader { da, sa, dsap, ssap, fc },
                pdu: &pdu,
            });
            let mut buffer = [0u8; 256];
            let length = telegram.encode(&mut buffer);
            let original = buffer;

            let position = position.index(length);
            buffer[position] ^= flip;
            let result = Telegram::decode(&buffer[..length]);
            prop_assert!(
                result.is_err(),
                "corruption at {} of {:02x?} accepted as {:?}",
                position,
                &original[..length],
                result,
            );
        }
    }
}
