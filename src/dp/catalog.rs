//! Slave catalog interface
//!
//! A catalog describes a slave model: its ident number, the configuration bytes of the plugged
//! modules and the user parameters.  Usually this information is extracted from the vendor's GSD
//! file.  [`ModuleCatalog`] is a simple in-memory catalog for when the relevant values are
//! already known.

bitflags::bitflags! {
    /// DPV1 status byte 1 (first byte of the user parameters)
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Dpv1Status1: u8 {
        /// Watchdog time base is 1 ms instead of 10 ms
        const WD_BASE_1MS =     0b00000100;
        const PUBLISHER =       0b00100000;
        const FAIL_SAFE =       0b01000000;
        const DPV1_ENABLE =     0b10000000;
    }
}

bitflags::bitflags! {
    /// DPV1 status byte 2
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Dpv1Status2: u8 {
        /// Reduced configuration check
        const CHK_CFG_MODE =                0b00000001;
        const UPDATE_ALARM =                0b00000100;
        const STATUS_ALARM =                0b00001000;
        const MANUFACTURER_ALARM =          0b00010000;
        const DIAGNOSTIC_ALARM =            0b00100000;
        const PROCESS_ALARM =               0b01000000;
        const PULL_PLUG_ALARM =             0b10000000;
    }
}

bitflags::bitflags! {
    /// DPV1 status byte 3
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Dpv1Status3: u8 {
        /// User parameters are structured into blocks
        const PRM_STRUCTURE =       0b00001000;
        const ISOCHRONOUS_MODE =    0b00010000;
        const PRM_CMD =             0b10000000;
    }
}

/// Overrides for the DPV1 status bytes at the start of the user parameters
///
/// Every bit set in the mask is replaced by the corresponding bit of the set value.
///
/// # Example
/// ```
/// use profirust_dpm1::dp::{Dpv1Parameters, Dpv1Status1, Dpv1Status2};
///
/// let dpv1 = Dpv1Parameters::new()
///     .status1(Dpv1Status1::FAIL_SAFE, Dpv1Status1::FAIL_SAFE)
///     .status2(Dpv1Status2::CHK_CFG_MODE, Dpv1Status2::CHK_CFG_MODE);
///
/// let mut prm = vec![0x00, 0x00, 0x08, 0x42];
/// dpv1.apply(&mut prm);
/// assert_eq!(prm, [0x40, 0x01, 0x08, 0x42]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dpv1Parameters {
    pub mask: [u8; 3],
    pub set: [u8; 3],
}

impl Dpv1Parameters {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn status1(mut self, mask: Dpv1Status1, set: Dpv1Status1) -> Self {
        self.mask[0] = mask.bits();
        self.set[0] = set.bits();
        self
    }

    pub fn status2(mut self, mask: Dpv1Status2, set: Dpv1Status2) -> Self {
        self.mask[1] = mask.bits();
        self.set[1] = set.bits();
        self
    }

    pub fn status3(mut self, mask: Dpv1Status3, set: Dpv1Status3) -> Self {
        self.mask[2] = mask.bits();
        self.set[2] = set.bits();
        self
    }

    /// Patch the DPV1 status bytes of `user_parameters`.
    ///
    /// User parameters shorter than three bytes are padded with zeros.  Nothing is changed when
    /// the mask is empty.
    pub fn apply(&self, user_parameters: &mut Vec<u8>) {
        if self.mask == [0; 3] {
            return;
        }
        if user_parameters.len() < 3 {
            user_parameters.resize(3, 0x00);
        }
        for ((b, mask), set) in user_parameters.iter_mut().zip(self.mask).zip(self.set) {
            *b = (*b & !mask) | (set & mask);
        }
    }
}

/// Source of the slave model information a DP master needs
pub trait SlaveCatalog {
    fn ident_number(&self) -> u16;

    /// Configuration bytes of all selected modules, in slot order.
    fn cfg_data_elements(&self) -> Vec<u8>;

    /// User parameters with the DPV1 status bytes patched according to `dpv1`.
    fn user_prm_data(&self, dpv1: &Dpv1Parameters) -> Vec<u8>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown module \"{0}\"")]
    UnknownModule(String),
}

/// A module that can be plugged into a modular slave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub config: Vec<u8>,
    /// Module-specific user parameters
    pub parameters: Vec<u8>,
}

/// In-memory catalog of a modular slave
///
/// # Example
/// ```
/// use profirust_dpm1::dp::{Dpv1Parameters, ModuleCatalog, SlaveCatalog};
///
/// let mut catalog = ModuleCatalog::new(0x806a)
///     .with_user_parameters(&[0x00, 0x00, 0x00])
///     .with_module("PM-E DC24V", &[0x00], &[])
///     .with_module("2DO DC24V", &[0x20], &[0x00]);
///
/// catalog.select_module("PM-E DC24V").unwrap();
/// catalog.select_module("2DO DC24V").unwrap();
/// catalog.select_module("2DO DC24V").unwrap();
/// assert!(catalog.select_module("8AI").is_err());
///
/// assert_eq!(catalog.cfg_data_elements(), [0x00, 0x20, 0x20]);
/// assert_eq!(
///     catalog.user_prm_data(&Dpv1Parameters::new()),
///     [0x00, 0x00, 0x00, 0x00, 0x00]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleCatalog {
    ident_number: u16,
    user_parameters: Vec<u8>,
    modules: Vec<Module>,
    selected: Vec<usize>,
}

impl ModuleCatalog {
    pub fn new(ident_number: u16) -> Self {
        Self {
            ident_number,
            ..Default::default()
        }
    }

    /// Global user parameters, preceding the module parameters.
    pub fn with_user_parameters(mut self, user_parameters: &[u8]) -> Self {
        self.user_parameters = user_parameters.to_vec();
        self
    }

    pub fn with_module(mut self, name: &str, config: &[u8], parameters: &[u8]) -> Self {
        self.modules.push(Module {
            name: name.to_string(),
            config: config.to_vec(),
            parameters: parameters.to_vec(),
        });
        self
    }

    /// Plug the module with the given name into the next slot.
    pub fn select_module(&mut self, name: &str) -> Result<(), CatalogError> {
        let index = self
            .modules
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| CatalogError::UnknownModule(name.to_string()))?;
        log::debug!("Selected module \"{}\" for slot {}", name, self.selected.len());
        self.selected.push(index);
        Ok(())
    }

    pub fn selected_modules(&self) -> impl Iterator<Item = &Module> {
        self.selected.iter().map(|i| &self.modules[*i])
    }
}

impl SlaveCatalog for ModuleCatalog {
    fn ident_number(&self) -> u16 {
        self.ident_number
    }

    fn cfg_data_elements(&self) -> Vec<u8> {
        self.selected_modules()
            .flat_map(|m| m.config.iter().copied())
            .collect()
    }

    fn user_prm_data(&self, dpv1: &Dpv1Parameters) -> Vec<u8> {
        let mut prm = self.user_parameters.clone();
        for module in self.selected_modules() {
            prm.extend_from_slice(&module.parameters);
        }
        dpv1.apply(&mut prm);
        prm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case::empty_mask(Dpv1Parameters::new(), &[0xff], &[0xff])]
    #[case::pad_short(
        Dpv1Parameters::new().status1(Dpv1Status1::WD_BASE_1MS, Dpv1Status1::WD_BASE_1MS),
        &[],
        &[0x04, 0x00, 0x00]
    )]
    #[case::clear_bits(
        Dpv1Parameters::new().status1(Dpv1Status1::DPV1_ENABLE, Dpv1Status1::empty()),
        &[0x84, 0x01, 0x00, 0x17],
        &[0x04, 0x01, 0x00, 0x17]
    )]
    #[case::only_masked_bits(
        Dpv1Parameters {
            mask: [0x00, 0x01, 0x08],
            set: [0xff, 0xff, 0xff],
        },
        &[0x00, 0x00, 0x00],
        &[0x00, 0x01, 0x08]
    )]
    #[case::status2_and_status3(
        Dpv1Parameters::new()
            .status2(Dpv1Status2::CHK_CFG_MODE, Dpv1Status2::CHK_CFG_MODE)
            .status3(
                Dpv1Status3::PRM_STRUCTURE | Dpv1Status3::PRM_CMD,
                Dpv1Status3::PRM_STRUCTURE
            ),
        &[0x00, 0x00, 0x80, 0x17],
        &[0x00, 0x01, 0x08, 0x17]
    )]
    fn dpv1_patching(
        #[case] dpv1: Dpv1Parameters,
        #[case] prm: &[u8],
        #[case] expected: &[u8],
    ) {
        let mut prm = prm.to_vec();
        dpv1.apply(&mut prm);
        assert_eq!(prm, expected);
    }

    #[test]
    fn unknown_module_is_rejected() {
        crate::test_utils::prepare_test_logger();
        let mut catalog = ModuleCatalog::new(0x1234).with_module("4DI", &[0x10], &[]);
        assert_eq!(
            catalog.select_module("4DO"),
            Err(CatalogError::UnknownModule("4DO".to_string()))
        );
        assert_eq!(catalog.selected_modules().count(), 0);
        assert_eq!(
            catalog.select_module("4DO").unwrap_err().to_string(),
            "unknown module \"4DO\""
        );
    }

    #[test]
    fn module_parameters_follow_global_parameters() {
        crate::test_utils::prepare_test_logger();
        let mut catalog = ModuleCatalog::new(0x1234)
            .with_user_parameters(&[0x00, 0x00])
            .with_module("4DI", &[0x10], &[0xa0, 0xa1])
            .with_module("2AO", &[0x61], &[0xb0]);
        catalog.select_module("2AO").unwrap();
        catalog.select_module("4DI").unwrap();

        assert_eq!(catalog.ident_number(), 0x1234);
        assert_eq!(catalog.cfg_data_elements(), [0x61, 0x10]);
        let dpv1 = Dpv1Parameters::new().status1(Dpv1Status1::FAIL_SAFE, Dpv1Status1::FAIL_SAFE);
        assert_eq!(
            catalog.user_prm_data(&dpv1),
            [0x40, 0x00, 0xb0, 0xa0, 0xa1]
        );
    }
}
