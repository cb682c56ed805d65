//! The shared bus handle passed to every session
use std::sync::{Arc, Mutex, PoisonError};

use lmcan_common::{traits::CanSessionMux, DeviceNumber};

use crate::{
    clock::{Clock, SystemClock},
    error::{AllocationSnafu, MotorControllerError},
};

/// Tracks which device numbers have an open session on a bus
///
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct BusRegistry {
    allocated: Arc<Mutex<u64>>,
}

impl BusRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a device number
    ///
    /// The number is released when the returned [`DeviceAllocation`] is dropped.
    pub fn allocate(
        &self,
        device_number: DeviceNumber,
    ) -> Result<DeviceAllocation, MotorControllerError> {
        let bit = 1u64 << device_number.raw();
        let mut allocated = self.allocated.lock().unwrap_or_else(PoisonError::into_inner);
        if *allocated & bit != 0 {
            return AllocationSnafu {
                device_number: device_number.raw(),
            }
            .fail();
        }
        *allocated |= bit;
        Ok(DeviceAllocation {
            registry: self.clone(),
            device_number,
        })
    }

    /// Returns true if a session currently owns `device_number`
    pub fn is_allocated(&self, device_number: DeviceNumber) -> bool {
        let allocated = self.allocated.lock().unwrap_or_else(PoisonError::into_inner);
        *allocated & (1u64 << device_number.raw()) != 0
    }

    fn release(&self, device_number: DeviceNumber) {
        let mut allocated = self.allocated.lock().unwrap_or_else(PoisonError::into_inner);
        *allocated &= !(1u64 << device_number.raw());
    }
}

/// Ownership of a device number in a [`BusRegistry`]
#[derive(Debug)]
pub struct DeviceAllocation {
    registry: BusRegistry,
    device_number: DeviceNumber,
}

impl DeviceAllocation {
    /// The allocated device number
    pub fn device_number(&self) -> DeviceNumber {
        self.device_number
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        self.registry.release(self.device_number);
    }
}

/// A handle to a CAN bus shared by motor controller sessions
///
/// Bundles the transport, the device number registry, and the clock. Clones refer to the same
/// bus.
#[derive(Debug)]
pub struct Bus<M: CanSessionMux> {
    mux: Arc<M>,
    registry: BusRegistry,
    clock: Arc<dyn Clock>,
}

impl<M: CanSessionMux> Clone for Bus<M> {
    fn clone(&self) -> Self {
        Self {
            mux: self.mux.clone(),
            registry: self.registry.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<M: CanSessionMux> Bus<M> {
    /// Create a bus using the system clock
    pub fn new(mux: M) -> Self {
        Self::with_clock(mux, SystemClock::new())
    }

    /// Create a bus with a specific clock
    pub fn with_clock(mux: M, clock: impl Clock + 'static) -> Self {
        Self::from_parts(Arc::new(mux), BusRegistry::new(), Arc::new(clock))
    }

    /// Create a bus from an already shared transport and registry
    pub fn from_parts(mux: Arc<M>, registry: BusRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            mux,
            registry,
            clock,
        }
    }

    /// The transport
    pub fn mux(&self) -> &M {
        &self.mux
    }

    /// The device number registry
    pub fn registry(&self) -> &BusRegistry {
        &self.registry
    }

    /// The clock
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation() {
        let registry = BusRegistry::new();
        let dn = DeviceNumber::new(63).unwrap();
        let lease = registry.allocate(dn).unwrap();
        assert!(registry.is_allocated(dn));
        assert_eq!(
            Err(MotorControllerError::Allocation { device_number: 63 }),
            registry.allocate(dn).map(|_| ())
        );

        // Other numbers are independent
        let other = registry.allocate(DeviceNumber::new(1).unwrap()).unwrap();
        assert_eq!(1, other.device_number().raw());

        drop(lease);
        assert!(!registry.is_allocated(dn));
        assert!(registry.allocate(dn).is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = BusRegistry::new();
        let clone = registry.clone();
        let dn = DeviceNumber::new(5).unwrap();
        let _lease = registry.allocate(dn).unwrap();
        assert!(clone.allocate(dn).is_err());
    }
}
