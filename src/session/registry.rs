//! Process-wide record of which devices have a live session.

use crate::errors::SyncError;
use std::collections::HashSet;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref CLAIMED_DEVICES: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Exclusive in-process claim on a device id. Released on drop.
#[derive(Debug)]
pub struct DeviceClaim {
    device_id: String,
}

impl DeviceClaim {
    pub fn acquire(device_id: &str) -> Result<Self, SyncError> {
        let mut claimed = CLAIMED_DEVICES.lock().unwrap_or_else(|e| e.into_inner());
        if !claimed.insert(device_id.to_string()) {
            return Err(SyncError::DeviceUnavailable(format!(
                "device {} already has a session in this process",
                device_id
            )));
        }
        Ok(Self {
            device_id: device_id.to_string(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claimed = CLAIMED_DEVICES.lock().unwrap_or_else(|e| e.into_inner());
        claimed.remove(&self.device_id);
    }
}

pub fn is_claimed(device_id: &str) -> bool {
    CLAIMED_DEVICES
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .contains(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_rejected() {
        let id = format!("registry-test-{}", uuid::Uuid::new_v4());
        let first = DeviceClaim::acquire(&id).unwrap();
        assert!(is_claimed(&id));

        let second = DeviceClaim::acquire(&id);
        assert!(matches!(second, Err(SyncError::DeviceUnavailable(_))));

        drop(first);
        assert!(!is_claimed(&id));
        assert!(DeviceClaim::acquire(&id).is_ok());
    }
}
