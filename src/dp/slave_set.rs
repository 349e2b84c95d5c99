use crate::dp::{DpError, Slave};
use core::fmt;

/// Storage type that can hold one slave.
#[derive(Debug, Default)]
pub struct SlaveStorage {
    inner: Option<Slave>,
}

/// Handle that can be used to refer to a slave of the DP master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlaveHandle {
    index: usize,
    address: crate::Address,
}

impl SlaveHandle {
    #[inline(always)]
    pub fn address(self) -> u8 {
        self.address
    }
}

impl fmt::Display for SlaveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Station {}", self.address)
    }
}

pub(crate) struct SlaveSet<'a> {
    slaves: managed::ManagedSlice<'a, SlaveStorage>,
}

impl<'a> SlaveSet<'a> {
    pub fn new<S>(storage: S) -> Self
    where
        S: Into<managed::ManagedSlice<'a, SlaveStorage>>,
    {
        Self {
            slaves: storage.into(),
        }
    }

    /// Add a slave to the set, and return its handle.
    ///
    /// Fails with [`DpError::StorageFull`] if the storage is fixed-size (not a `Vec`) and full.
    pub fn add(&mut self, slave: Slave) -> Result<SlaveHandle, DpError> {
        let address = slave.address();
        for (index, slot) in self.slaves.iter_mut().enumerate() {
            if slot.inner.is_none() {
                slot.inner = Some(slave);
                return Ok(SlaveHandle { index, address });
            }
        }

        match &mut self.slaves {
            managed::ManagedSlice::Borrowed(_) => Err(DpError::StorageFull),
            managed::ManagedSlice::Owned(slaves) => {
                slaves.push(SlaveStorage { inner: Some(slave) });
                Ok(SlaveHandle {
                    index: slaves.len() - 1,
                    address,
                })
            }
        }
    }

    pub fn find(&self, address: crate::Address) -> Option<SlaveHandle> {
        self.iter()
            .find(|(_, s)| s.address() == address)
            .map(|(h, _)| h)
    }

    /// Get a slave by its handle.
    ///
    /// Returns `None` if the handle does not belong to this set.
    pub fn get(&self, handle: SlaveHandle) -> Option<&Slave> {
        self.slaves
            .get(handle.index)
            .and_then(|s| s.inner.as_ref())
            .filter(|s| s.address() == handle.address)
    }

    pub fn get_mut(&mut self, handle: SlaveHandle) -> Option<&mut Slave> {
        self.slaves
            .get_mut(handle.index)
            .and_then(|s| s.inner.as_mut())
            .filter(|s| s.address() == handle.address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlaveHandle, &Slave)> {
        self.slaves.iter().enumerate().filter_map(|(index, s)| {
            s.inner.as_ref().map(|s| {
                (
                    SlaveHandle {
                        index,
                        address: s.address(),
                    },
                    s,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlaveHandle, &mut Slave)> {
        self.slaves.iter_mut().enumerate().filter_map(|(index, s)| {
            s.inner.as_mut().map(|s| {
                (
                    SlaveHandle {
                        index,
                        address: s.address(),
                    },
                    s,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dp::SlaveDescriptor;

    fn slave(address: u8) -> Slave {
        Slave::new(
            SlaveDescriptor::builder(address, 0x1234)
                .config(&[0x10])
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn fixed_storage_runs_full() {
        let mut storage: [SlaveStorage; 2] = Default::default();
        let mut set = SlaveSet::new(&mut storage[..]);
        let a = set.add(slave(5)).unwrap();
        let b = set.add(slave(6)).unwrap();
        assert!(matches!(set.add(slave(7)), Err(DpError::StorageFull)));

        assert_eq!(set.get(a).map(|s| s.address()), Some(5));
        assert_eq!(set.find(6), Some(b));
        assert_eq!(set.find(7), None);
        assert_eq!(a.to_string(), "Station 5");
    }

    #[test]
    fn foreign_handle_is_not_resolved() {
        let mut set = SlaveSet::new(Vec::new());
        let handle = set.add(slave(5)).unwrap();

        let mut other = SlaveSet::new(Vec::new());
        other.add(slave(9)).unwrap();
        assert!(other.get(handle).is_none());
        assert!(set.get_mut(handle).is_some());
        assert_eq!(set.iter_mut().count(), 1);
    }
}
