//! Per-device exclusive-access leases.
//!
//! A camera may be opened by at most one component at a time. Holding a
//! `DeviceLease` is a precondition for opening the device; the lease is
//! released when the guard drops, which happens together with the handle
//! release in `FrameSource`.
//!
//! The lease table only arbitrates opens within this process. A device held
//! by another process still fails the open itself and surfaces as
//! `DeviceUnavailable`.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{Camera, EngineError};

/// Table of currently leased cameras. Shared via `Arc`.
#[derive(Debug, Default)]
pub struct DeviceLeases {
    held: Mutex<BTreeSet<Camera>>,
}

impl DeviceLeases {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the exclusive lease for `camera`.
    ///
    /// Fails fast with `DeviceBusy` when the lease is already held; callers
    /// must not retry this (the holder releases on its own schedule).
    pub fn acquire(self: &Arc<Self>, camera: Camera) -> Result<DeviceLease> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| anyhow!("lease table lock poisoned"))?;
        if !held.insert(camera) {
            return Err(EngineError::DeviceBusy { camera }.into());
        }
        log::debug!("leased {}", camera);
        Ok(DeviceLease {
            camera,
            table: Arc::clone(self),
        })
    }

    pub fn is_leased(&self, camera: Camera) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&camera)
    }

    // Runs on guard drop; recovers the table even when poisoned so a lease
    // is never leaked.
    fn release(&self, camera: Camera) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&camera);
        log::debug!("released lease on {}", camera);
    }
}

/// Guard proving exclusive access to one camera. Released on drop.
#[derive(Debug)]
pub struct DeviceLease {
    camera: Camera,
    table: Arc<DeviceLeases>,
}

impl DeviceLease {
    pub fn camera(&self) -> Camera {
        self.camera
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.table.release(self.camera);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy() -> Result<()> {
        let leases = DeviceLeases::new();
        let cam = Camera::Synthetic(0);

        let guard = leases.acquire(cam)?;
        let err = leases.acquire(cam).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::DeviceBusy { .. })
        ));

        drop(guard);
        let _again = leases.acquire(cam)?;
        Ok(())
    }

    #[test]
    fn poisoned_table_errors_on_acquire_but_still_answers() {
        let leases = DeviceLeases::new();
        let cam = Camera::Synthetic(0);

        let table = Arc::clone(&leases);
        let _ = std::thread::spawn(move || {
            let _held = table.held.lock().unwrap();
            panic!("poison the lease table");
        })
        .join();

        assert!(leases.acquire(cam).is_err());
        assert!(!leases.is_leased(cam));
    }

    #[test]
    fn distinct_cameras_lease_independently() -> Result<()> {
        let leases = DeviceLeases::new();
        let _a = leases.acquire(Camera::Synthetic(0))?;
        let _b = leases.acquire(Camera::Synthetic(1))?;
        assert!(leases.is_leased(Camera::Synthetic(0)));
        assert!(leases.is_leased(Camera::Synthetic(1)));
        Ok(())
    }
}
