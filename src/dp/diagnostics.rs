//! Slave diagnostics
//!
//! [`interpret()`] decodes the payload of a Slave_Diag response into a [`DiagnosticStatus`].
use crate::fdl::DecodeError;

bitflags::bitflags! {
    /// Station status bytes 1 and 2 of a diagnostics response
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DiagnosticFlags: u16 {
        const STATION_NON_EXISTENT =    0b00000001;
        const STATION_NOT_READY =       0b00000010;
        const CONFIGURATION_FAULT =     0b00000100;
        const EXT_DIAG =                0b00001000;
        const NOT_SUPPORTED =           0b00010000;
        const INVALID_RESPONSE =        0b00100000;
        const PARAMETER_FAULT =         0b01000000;
        const MASTER_LOCK =             0b10000000;

        const PARAMETER_REQUIRED =      0b00000001_00000000;
        const STATUS_DIAGNOSTICS =      0b00000010_00000000;
        const PERMANENT_BIT =           0b00000100_00000000;
        const WATCHDOG_ON =             0b00001000_00000000;
        const FREEZE_MODE =             0b00010000_00000000;
        const SYNC_MODE =               0b00100000_00000000;
        // const RESERVED =             0b01000000_00000000;
        const DEACTIVATED =             0b10000000_00000000;
    }
}

/// Length of the mandatory part of a diagnostics response.
pub const DIAGNOSTICS_HEADER_LENGTH: usize = 6;

/// Decoded diagnostics of a slave
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiagnosticStatus {
    pub flags: DiagnosticFlags,
    /// The slave had more extended diagnostics than it could report.
    pub ext_diag_overflow: bool,
    /// Address of the master which parameterized this slave, if any.
    pub master_address: Option<crate::Address>,
    pub ident_number: u16,
    extended: Vec<u8>,
}

impl DiagnosticStatus {
    pub fn new(
        flags: DiagnosticFlags,
        master_address: Option<crate::Address>,
        ident_number: u16,
    ) -> Self {
        Self {
            flags,
            ext_diag_overflow: false,
            master_address,
            ident_number,
            extended: Vec::new(),
        }
    }

    /// Attach raw extended diagnostics and set the [`DiagnosticFlags::EXT_DIAG`] flag.
    pub fn with_extended(mut self, extended: &[u8]) -> Self {
        self.extended = extended.to_vec();
        self.flags.set(DiagnosticFlags::EXT_DIAG, !extended.is_empty());
        self
    }

    /// Raw extended diagnostics bytes.
    pub fn extended_diagnostics(&self) -> &[u8] {
        &self.extended
    }

    pub fn iter_diag_blocks(&self) -> ExtDiagBlockIter<'_> {
        ExtDiagBlockIter {
            buffer: &self.extended,
            cursor: 0,
        }
    }

    /// Slave is not (yet) ready for data exchange.
    pub fn is_not_ready(&self) -> bool {
        self.flags
            .intersects(DiagnosticFlags::STATION_NOT_READY | DiagnosticFlags::PARAMETER_REQUIRED)
    }

    /// Serialize into the wire layout of a Slave_Diag response.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(DIAGNOSTICS_HEADER_LENGTH + self.extended.len());
        bytes.extend_from_slice(&self.flags.bits().to_le_bytes());
        bytes.push(if self.ext_diag_overflow { 0x80 } else { 0x00 });
        bytes.push(self.master_address.unwrap_or(crate::consts::ADDRESS_NONE));
        bytes.extend_from_slice(&self.ident_number.to_be_bytes());
        bytes.extend_from_slice(&self.extended);
        bytes
    }
}

/// Decode the payload of a Slave_Diag response.
///
/// The extended diagnostics blocks are validated: a block whose length is zero or exceeds the
/// remaining bytes is rejected with [`DecodeError::BadLength`].  A reserved block header ends
/// block parsing.
pub fn interpret(bytes: &[u8]) -> Result<DiagnosticStatus, DecodeError> {
    if bytes.len() < DIAGNOSTICS_HEADER_LENGTH {
        return Err(DecodeError::Truncated);
    }

    let flags = DiagnosticFlags::from_bits_retain(u16::from_le_bytes([bytes[0], bytes[1]]));
    let extended = &bytes[DIAGNOSTICS_HEADER_LENGTH..];
    validate_blocks(extended)?;

    if !flags.contains(DiagnosticFlags::PERMANENT_BIT) {
        log::warn!("Inconsistent diagnostics: permanent bit is not set ({:?})", flags);
    }

    Ok(DiagnosticStatus {
        flags,
        ext_diag_overflow: bytes[2] & 0x80 != 0,
        master_address: match bytes[3] {
            crate::consts::ADDRESS_NONE => None,
            a => Some(a),
        },
        ident_number: u16::from_be_bytes([bytes[4], bytes[5]]),
        extended: extended.to_vec(),
    })
}

fn validate_blocks(buffer: &[u8]) -> Result<(), DecodeError> {
    let mut cursor = 0;
    while let Some(&header) = buffer.get(cursor) {
        let length = match header >> 6 {
            0b10 => 3,
            0b11 => break,
            _ => usize::from(header & 0x3f),
        };
        if length == 0 || length > buffer.len() - cursor {
            log::debug!("Invalid ext. diagnostics block at {}: {:?}", cursor, buffer);
            return Err(DecodeError::BadLength);
        }
        cursor += length;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChannelDataType {
    Bit = 0b001,
    Bit2 = 0b010,
    Bit4 = 0b011,
    Byte = 0b100,
    Word = 0b101,
    DWord = 0b110,
    Invalid = 0b111,
}

impl ChannelDataType {
    fn from_diag_byte2(b: u8) -> Self {
        match b >> 5 {
            0b001 => ChannelDataType::Bit,
            0b010 => ChannelDataType::Bit2,
            0b011 => ChannelDataType::Bit4,
            0b100 => ChannelDataType::Byte,
            0b101 => ChannelDataType::Word,
            0b110 => ChannelDataType::DWord,
            _ => ChannelDataType::Invalid,
        }
    }

    fn into_diag_byte2(self) -> u8 {
        (self as u8) << 5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelError {
    ShortCircuit,
    UnderVoltage,
    OverVoltage,
    OverLoad,
    OverTemperature,
    LineBreak,
    UpperLimitOvershoot,
    LowerLimitUndershoot,
    Error,
    Reserved(u8),
    Vendor(u8),
}

impl ChannelError {
    fn from_diag_byte2(b: u8) -> Self {
        match b & 0x1f {
            1 => ChannelError::ShortCircuit,
            2 => ChannelError::UnderVoltage,
            3 => ChannelError::OverVoltage,
            4 => ChannelError::OverLoad,
            5 => ChannelError::OverTemperature,
            6 => ChannelError::LineBreak,
            7 => ChannelError::UpperLimitOvershoot,
            8 => ChannelError::LowerLimitUndershoot,
            9 => ChannelError::Error,
            v @ 16..=31 => ChannelError::Vendor(v),
            r => ChannelError::Reserved(r),
        }
    }

    fn into_diag_byte2(self) -> u8 {
        match self {
            ChannelError::ShortCircuit => 1,
            ChannelError::UnderVoltage => 2,
            ChannelError::OverVoltage => 3,
            ChannelError::OverLoad => 4,
            ChannelError::OverTemperature => 5,
            ChannelError::LineBreak => 6,
            ChannelError::UpperLimitOvershoot => 7,
            ChannelError::LowerLimitUndershoot => 8,
            ChannelError::Error => 9,
            ChannelError::Vendor(v) => v,
            ChannelError::Reserved(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDiagnostics {
    pub module: u8,
    pub channel: u8,
    pub input: bool,
    pub output: bool,
    pub dtype: ChannelDataType,
    pub error: ChannelError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtDiagBlock<'a> {
    /// One bit per configured module, set for modules reporting a problem
    Identifier(&'a bitvec::slice::BitSlice<u8>),
    Channel(ChannelDiagnostics),
    /// Manufacturer-specific device diagnostics
    Device(&'a [u8]),
}

pub struct ExtDiagBlockIter<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

impl<'a> Iterator for ExtDiagBlockIter<'a> {
    type Item = ExtDiagBlock<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let remainder = self.buffer.get(self.cursor..)?;
        let header = *remainder.first()?;
        match header >> 6 {
            // Identifier-based Diagnostics
            0b01 => {
                let length = usize::from(header & 0x3f);
                let block = remainder.get(1..length)?;
                self.cursor += length;
                Some(ExtDiagBlock::Identifier(
                    bitvec::slice::BitSlice::from_slice(block),
                ))
            }
            // Channel-based Diagnostics
            0b10 => {
                let block = remainder.get(..3)?;
                self.cursor += 3;
                Some(ExtDiagBlock::Channel(ChannelDiagnostics {
                    module: block[0] & 0x3f,
                    channel: block[1] & 0x3f,
                    input: block[1] & 0x40 != 0,
                    output: block[1] & 0x80 != 0,
                    dtype: ChannelDataType::from_diag_byte2(block[2]),
                    error: ChannelError::from_diag_byte2(block[2]),
                }))
            }
            // Device-based Diagnostics
            0b00 => {
                let length = usize::from(header & 0x3f);
                let block = remainder.get(1..length)?;
                self.cursor += length;
                Some(ExtDiagBlock::Device(block))
            }
            // Reserved
            _ => {
                log::warn!("Unexpected ext diag block: {:?}", remainder);
                self.cursor = self.buffer.len();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_header(ext: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x08, 0x04, 0x00, 0x02, 0x80, 0x6a];
        bytes.extend_from_slice(ext);
        bytes
    }

    #[test]
    fn test_diag_byte2() {
        for b in 0..=255u8 {
            // Filter edge cases
            if b & 0xe0 == 0 {
                continue;
            }

            let err = ChannelError::from_diag_byte2(b);
            let dtype = ChannelDataType::from_diag_byte2(b);

            let b_again = err.into_diag_byte2() | dtype.into_diag_byte2();
            assert_eq!(b, b_again);
        }
    }

    #[test]
    fn interpret_station_status() {
        crate::test_utils::prepare_test_logger();
        let diag = interpret(&[0x02, 0x05, 0x00, 0xff, 0x80, 0x6a]).unwrap();
        assert_eq!(
            diag.flags,
            DiagnosticFlags::STATION_NOT_READY
                | DiagnosticFlags::PARAMETER_REQUIRED
                | DiagnosticFlags::PERMANENT_BIT
        );
        assert_eq!(diag.master_address, None);
        assert_eq!(diag.ident_number, 0x806a);
        assert!(!diag.ext_diag_overflow);
        assert!(diag.is_not_ready());
        assert_eq!(diag.iter_diag_blocks().count(), 0);
    }

    #[test]
    fn interpret_ext_diag_overflow_and_master() {
        crate::test_utils::prepare_test_logger();
        let diag = interpret(&[0x08, 0x0c, 0x80, 0x02, 0x12, 0x34]).unwrap();
        assert!(diag.ext_diag_overflow);
        assert_eq!(diag.master_address, Some(2));
        assert!(diag.flags.contains(DiagnosticFlags::WATCHDOG_ON));
        assert!(!diag.is_not_ready());
    }

    #[test]
    fn interpret_truncated() {
        assert_eq!(interpret(&[]), Err(DecodeError::Truncated));
        assert_eq!(
            interpret(&[0x00, 0x04, 0x00, 0x02, 0x80]),
            Err(DecodeError::Truncated)
        );
    }

    #[test]
    fn to_bytes_matches_interpret() {
        crate::test_utils::prepare_test_logger();
        let bytes = with_header(&[0x44, 0x00, 0x01, 0x00]);
        let diag = interpret(&bytes).unwrap();
        assert_eq!(diag.to_bytes(), bytes);
    }

    #[test]
    fn test_diag_iter() {
        crate::test_utils::prepare_test_logger();
        let bytes = with_header(&[
            0x44, 0x00, 0x01, 0x00, 0x88, 0x41, 0x21, 0x04, 0x10, 0x20, 0x30,
        ]);
        let diag = interpret(&bytes).unwrap();

        let blocks: Vec<ExtDiagBlock> = diag.iter_diag_blocks().collect();

        if let ExtDiagBlock::Identifier(i) = &blocks[0] {
            assert!(i.get(8).unwrap());
            assert!(i.count_ones() == 1);
            assert_eq!(i.len(), 24);
        } else {
            panic!("wrong diag block 0 {:?}", blocks[0]);
        }

        if let ExtDiagBlock::Channel(c) = &blocks[1] {
            assert_eq!(
                c,
                &ChannelDiagnostics {
                    module: 8,
                    channel: 1,
                    input: true,
                    output: false,
                    dtype: ChannelDataType::Bit,
                    error: ChannelError::ShortCircuit
                }
            );
        } else {
            panic!("wrong diag block 1 {:?}", blocks[1]);
        }

        if let ExtDiagBlock::Device(d) = &blocks[2] {
            assert_eq!(d, &[0x10, 0x20, 0x30]);
        } else {
            panic!("wrong diag block 2 {:?}", blocks[2]);
        }

        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn test_diag_iter_reserved() {
        crate::test_utils::prepare_test_logger();
        let bytes = with_header(&[0x44, 0x00, 0x01, 0x00, 0xff, 0x12, 0x34]);
        let diag = interpret(&bytes).unwrap();

        let blocks: Vec<ExtDiagBlock> = diag.iter_diag_blocks().collect();

        if let ExtDiagBlock::Identifier(i) = &blocks[0] {
            assert!(i.get(8).unwrap());
            assert!(i.count_ones() == 1);
            assert_eq!(i.len(), 24);
        } else {
            panic!("wrong diag block 0 {:?}", blocks[0]);
        }

        assert_eq!(blocks.len(), 1);
        // Raw bytes are kept even though block parsing stopped
        assert_eq!(diag.extended_diagnostics().len(), 7);
    }

    #[rstest::rstest]
    #[case::identifier_cut_off(&[0x48, 0x00, 0x01, 0x00])]
    #[case::channel_cut_off(&[0x88, 0x00])]
    #[case::device_cut_off(&[0x08, 0x00, 0x01, 0x00])]
    #[case::zero_length(&[0x00, 0x01])]
    #[case::second_block_cut_off(&[0x02, 0xaa, 0x43, 0x00])]
    fn reject_short_blocks(#[case] ext: &[u8]) {
        crate::test_utils::prepare_test_logger();
        assert_eq!(interpret(&with_header(ext)), Err(DecodeError::BadLength));
    }
}
