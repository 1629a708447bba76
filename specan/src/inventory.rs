use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::anyhow;

use crate::address::{BusAddress, HandleId};
use crate::transport::{Bus, Handle};
use crate::Error;

pub type SharedHandle = Arc<Mutex<Box<dyn Handle>>>;

/// Locks `x`, ignoring poisoning: a panic in another user of a handle does not
/// make the handle itself unusable.
pub(crate) fn lock<T: ?Sized>(x: &Mutex<T>) -> MutexGuard<'_, T> {
    x.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InventoryShared {
    buses: HashMap<String, Box<dyn Bus>>,
    handles: HashMap<HandleId, Weak<Mutex<Box<dyn Handle>>>>,
}

/// Registry of transports and of the connection handles currently in use.
///
/// Handles are tracked weakly. Once every session released a handle it is
/// dropped and a later lookup for its address comes up empty.
#[derive(Clone)]
pub struct Inventory(Arc<Mutex<InventoryShared>>);

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    pub fn new() -> Self {
        let inner = InventoryShared {
            buses: Default::default(),
            handles: Default::default(),
        };
        Self(Arc::new(Mutex::new(inner)))
    }

    pub fn register<T: Into<String>, B: Bus + 'static>(&self, driver: T, bus: B) {
        let driver = driver.into().to_lowercase();
        log::debug!("Registering transport for driver `{}`", driver);
        lock(&self.0).buses.insert(driver, Box::new(bus));
    }

    pub fn drivers(&self) -> Vec<String> {
        let mut ret: Vec<String> = lock(&self.0).buses.keys().cloned().collect();
        ret.sort();
        ret
    }

    /// Looks up a live handle for `addr`.
    pub fn discover(&self, addr: &BusAddress) -> Option<SharedHandle> {
        let id = addr.handle_id();
        let mut inner = lock(&self.0);
        let ret = inner.handles.get(&id).and_then(Weak::upgrade);
        if ret.is_none() {
            inner.handles.remove(&id);
        } else {
            log::debug!("Reusing handle for {}", id);
        }
        ret
    }

    /// Creates a handle for `addr` with the transport registered for its driver.
    ///
    /// If a live handle for the same address exists it is returned instead, so
    /// there is never more than one handle per address.
    pub fn create(&self, addr: &BusAddress) -> crate::Result<SharedHandle> {
        let id = addr.handle_id();
        let mut inner = lock(&self.0);
        if let Some(ret) = inner.handles.get(&id).and_then(Weak::upgrade) {
            return Ok(ret);
        }
        let bus = inner.buses.get_mut(addr.driver()).ok_or_else(|| {
            Error::connection(anyhow!("No transport registered for driver `{}`", addr.driver()))
        })?;
        log::debug!("Creating handle for {}", id);
        let handle: SharedHandle = Arc::new(Mutex::new(bus.create(addr)?));
        inner.handles.insert(id, Arc::downgrade(&handle));
        Ok(handle)
    }

    /// Ids of all handles that are still in use.
    pub fn list(&self) -> Vec<String> {
        let mut inner = lock(&self.0);
        inner.handles.retain(|_, x| x.strong_count() > 0);
        let mut ret: Vec<String> = inner.handles.keys().map(|x| x.to_string()).collect();
        ret.sort();
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::SimBus;

    fn inventory() -> (Inventory, SimBus) {
        let bus = SimBus::new(11);
        let inventory = Inventory::new();
        inventory.register("sim", bus.clone());
        (inventory, bus)
    }

    #[test]
    fn create_then_discover() {
        let (inventory, bus) = inventory();
        let addr = BusAddress::with_driver("sim", 0, 18).unwrap();
        assert!(inventory.discover(&addr).is_none());
        let handle = inventory.create(&addr).unwrap();
        let found = inventory.discover(&addr).unwrap();
        assert!(Arc::ptr_eq(&handle, &found));
        assert_eq!(bus.created(), 1);
        assert_eq!(inventory.list(), vec!["sim::0::18".to_string()]);
    }

    #[test]
    fn create_does_not_duplicate() {
        let (inventory, bus) = inventory();
        let addr = BusAddress::with_driver("sim", 0, 18).unwrap();
        let a = inventory.create(&addr).unwrap();
        let b = inventory.create(&addr).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(bus.created(), 1);

        let other = BusAddress::with_driver("sim", 0, 19).unwrap();
        let c = inventory.create(&other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(bus.created(), 2);
    }

    #[test]
    fn released_handles_are_forgotten() {
        let (inventory, bus) = inventory();
        let addr = BusAddress::with_driver("sim", 0, 18).unwrap();
        let handle = inventory.create(&addr).unwrap();
        drop(handle);
        assert!(inventory.list().is_empty());
        assert!(inventory.discover(&addr).is_none());
        let _handle = inventory.create(&addr).unwrap();
        assert_eq!(bus.created(), 2);
    }

    #[test]
    fn unknown_driver() {
        let (inventory, _) = inventory();
        let addr = BusAddress::with_driver("visa", 0, 18).unwrap();
        assert!(matches!(inventory.create(&addr), Err(Error::Connection(_))));
        assert_eq!(inventory.drivers(), vec!["sim".to_string()]);
    }
}
