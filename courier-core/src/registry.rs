use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing;

use crate::config::RegistryConfig;
use crate::types::RegistryEntry;

/// Tracks which server instance currently owns a live connection for each
/// (recipient, device). Entries expire when their heartbeat goes stale, so
/// a wedged socket that stopped heartbeating counts as offline without any
/// distributed liveness protocol.
pub struct ConnectionRegistry {
    entries: DashMap<String, Vec<RegistryEntry>>,
    ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        ConnectionRegistry {
            entries: DashMap::new(),
            ttl: Duration::seconds(config.heartbeat_ttl_secs as i64),
        }
    }

    /// Registers (or re-registers) a device connection. Last write wins for
    /// the same (recipient, device).
    pub fn register(
        &self,
        recipient_id: &str,
        device_id: &str,
        server_instance_id: &str,
    ) -> RegistryEntry {
        let entry = RegistryEntry {
            recipient_id: recipient_id.to_string(),
            device_id: device_id.to_string(),
            server_instance_id: server_instance_id.to_string(),
            last_heartbeat: Utc::now(),
        };

        let mut devices = self.entries.entry(recipient_id.to_string()).or_default();
        devices.retain(|e| e.device_id != device_id);
        devices.push(entry.clone());

        tracing::info!(
            recipient_id = %recipient_id,
            device_id = %device_id,
            server_instance_id = %server_instance_id,
            "connection registered"
        );

        entry
    }

    /// Refreshes the TTL. Returns false when the entry expired or was never
    /// registered, in which case the caller should re-register.
    pub fn heartbeat(&self, recipient_id: &str, device_id: &str) -> bool {
        match self.entries.get_mut(recipient_id) {
            Some(mut devices) => match devices.iter_mut().find(|e| e.device_id == device_id) {
                Some(entry) => {
                    entry.last_heartbeat = Utc::now();
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// All live entries for a recipient (zero, one or many devices).
    pub fn lookup(&self, recipient_id: &str) -> Vec<RegistryEntry> {
        self.lookup_at(recipient_id, Utc::now())
    }

    /// Lookup against an explicit clock; expired entries are purged as a
    /// side effect.
    pub fn lookup_at(&self, recipient_id: &str, now: DateTime<Utc>) -> Vec<RegistryEntry> {
        let expired_cutoff = now - self.ttl;

        let live = match self.entries.get_mut(recipient_id) {
            Some(mut devices) => {
                devices.retain(|e| e.last_heartbeat >= expired_cutoff);
                devices.clone()
            }
            None => return Vec::new(),
        };

        if live.is_empty() {
            self.entries
                .remove_if(recipient_id, |_, devices| devices.is_empty());
        }

        live
    }

    pub fn unregister(&self, recipient_id: &str, device_id: &str) -> bool {
        let removed = match self.entries.get_mut(recipient_id) {
            Some(mut devices) => {
                let before = devices.len();
                devices.retain(|e| e.device_id != device_id);
                before != devices.len()
            }
            None => false,
        };

        self.entries
            .remove_if(recipient_id, |_, devices| devices.is_empty());

        if removed {
            tracing::info!(
                recipient_id = %recipient_id,
                device_id = %device_id,
                "connection unregistered"
            );
        }

        removed
    }

    pub fn is_online(&self, recipient_id: &str) -> bool {
        !self.lookup(recipient_id).is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ttl_secs: u64) -> ConnectionRegistry {
        ConnectionRegistry::new(&RegistryConfig {
            heartbeat_ttl_secs: ttl_secs,
        })
    }

    #[test]
    fn register_and_lookup_multi_device() {
        let reg = registry(45);
        reg.register("u1", "d1", "srv-a");
        reg.register("u1", "d2", "srv-b");
        reg.register("u2", "d1", "srv-a");

        let entries = reg.lookup("u1");
        assert_eq!(entries.len(), 2);
        assert_eq!(reg.connection_count(), 3);
    }

    #[test]
    fn reregister_same_device_is_last_write_wins() {
        let reg = registry(45);
        reg.register("u1", "d1", "srv-a");
        reg.register("u1", "d1", "srv-b");

        let entries = reg.lookup("u1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server_instance_id, "srv-b");
    }

    #[test]
    fn stale_entries_expire_on_lookup() {
        let reg = registry(45);
        reg.register("u1", "d1", "srv-a");

        let future = Utc::now() + Duration::seconds(46);
        assert!(reg.lookup_at("u1", future).is_empty());
        // The purge is permanent, not just filtered from the result.
        assert_eq!(reg.connection_count(), 0);
    }

    #[test]
    fn heartbeat_keeps_entry_alive() {
        let reg = registry(45);
        reg.register("u1", "d1", "srv-a");
        assert!(reg.heartbeat("u1", "d1"));

        let soon = Utc::now() + Duration::seconds(30);
        assert_eq!(reg.lookup_at("u1", soon).len(), 1);
    }

    #[test]
    fn heartbeat_after_unregister_reports_gone() {
        let reg = registry(45);
        reg.register("u1", "d1", "srv-a");
        assert!(reg.unregister("u1", "d1"));
        assert!(!reg.heartbeat("u1", "d1"));
        assert!(!reg.is_online("u1"));
    }

    #[test]
    fn unregister_unknown_device_is_noop() {
        let reg = registry(45);
        reg.register("u1", "d1", "srv-a");
        assert!(!reg.unregister("u1", "d9"));
        assert!(reg.is_online("u1"));
    }
}
