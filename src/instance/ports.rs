//! Port allocation and reservation tracking

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use crate::common::{Error, Result};

use super::probe::PortProbe;

/// Hands out debugging ports and remembers which ones this engine claimed
///
/// A reservation is independent of any running instance: it is taken before
/// a process is spawned and released explicitly by the caller.
pub struct PortAllocator {
    reserved: Mutex<HashSet<u16>>,
    probe: PortProbe,
}

impl PortAllocator {
    pub fn new(probe: PortProbe) -> Self {
        Self {
            reserved: Mutex::new(HashSet::new()),
            probe,
        }
    }

    /// The probe used to detect occupied ports
    pub fn probe(&self) -> &PortProbe {
        &self.probe
    }

    /// Find, reserve and return a free port scanning from `base_port`
    ///
    /// Candidates already reserved are skipped without probing. A candidate
    /// is claimed before it is probed so two concurrent allocations can never
    /// return the same port; the claim is dropped again if something answers.
    pub async fn allocate(&self, base_port: u16, max_attempts: u16) -> Result<u16> {
        for offset in 0..max_attempts {
            let Some(port) = base_port.checked_add(offset) else {
                break;
            };

            if !self.reserve(port) {
                continue;
            }

            if self.probe.is_reachable(port).await {
                tracing::debug!("Port {} is answering, skipping", port);
                self.release(port);
                continue;
            }

            tracing::debug!("Allocated port {}", port);
            return Ok(port);
        }

        Err(Error::NoPortAvailable {
            base: base_port,
            attempts: max_attempts,
        })
    }

    /// Mark a port as reserved, returning false if it already was
    pub fn reserve(&self, port: u16) -> bool {
        self.lock().insert(port)
    }

    /// Release a reservation; releasing an unreserved port is a no-op
    pub fn release(&self, port: u16) {
        if self.lock().remove(&port) {
            tracing::trace!("Released port {}", port);
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    /// Currently reserved ports in ascending order
    pub fn reserved(&self) -> Vec<u16> {
        self.lock()
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u16>> {
        // The set holds plain integers; a poisoned guard is still consistent
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }
}
