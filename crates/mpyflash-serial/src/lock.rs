//! Process-wide port ownership
//!
//! A port may be owned by at most one in-flight operation. Claims are
//! checked before the OS device is opened, so contention inside this
//! process is reported without touching the hardware.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{Result, SerialError};

static CLAIMED_PORTS: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn claimed() -> std::sync::MutexGuard<'static, HashSet<String>> {
    // A panic while holding the lock cannot leave the set half-updated.
    CLAIMED_PORTS.lock().unwrap_or_else(|e| e.into_inner())
}

/// Claim on a port name, released on drop
#[derive(Debug)]
pub struct PortGuard {
    port: String,
}

impl PortGuard {
    /// Claim `port`, failing if another operation holds it
    pub fn acquire(port: &str) -> Result<Self> {
        if !claimed().insert(port.to_string()) {
            return Err(SerialError::PortUnavailable {
                port: port.to_string(),
                reason: "already in use by another operation".into(),
            });
        }
        log::trace!("Claimed port {}", port);
        Ok(Self {
            port: port.to_string(),
        })
    }

    /// The claimed port name
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Whether `port` is currently claimed
    pub fn is_claimed(port: &str) -> bool {
        claimed().contains(port)
    }
}

impl Drop for PortGuard {
    fn drop(&mut self) {
        claimed().remove(&self.port);
        log::trace!("Released port {}", self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_fails_fast() {
        let guard = PortGuard::acquire("/dev/lock-test-0").unwrap();
        assert!(PortGuard::is_claimed("/dev/lock-test-0"));
        assert!(matches!(
            PortGuard::acquire("/dev/lock-test-0"),
            Err(SerialError::PortUnavailable { .. })
        ));

        // Different ports do not interfere.
        let other = PortGuard::acquire("/dev/lock-test-1").unwrap();
        assert_eq!(other.port(), "/dev/lock-test-1");

        drop(guard);
        assert!(!PortGuard::is_claimed("/dev/lock-test-0"));
        assert!(PortGuard::acquire("/dev/lock-test-0").is_ok());
    }
}
