use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{client::TransferClient, TransferError, TransferResult};

/// Registry mapping owner ids to the live client allowed to run their transfers
#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<dyn TransferClient>>>,
}

impl ClientRegistry {
    /// Create a new client registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under `owner_id`.
    ///
    /// A client with the same fingerprint replaces the previous one (for
    /// example after a credential refresh). A different fingerprint under an
    /// owner id that is already taken is rejected.
    pub fn register(&self, owner_id: &str, client: Arc<dyn TransferClient>) -> TransferResult<()> {
        if owner_id.is_empty() {
            return Err(TransferError::invalid("owner id must not be empty"));
        }

        let mut clients = self.clients.write();
        if let Some(existing) = clients.get(owner_id) {
            if existing.fingerprint() != client.fingerprint() {
                return Err(TransferError::OwnerConflict {
                    owner_id: owner_id.to_string(),
                });
            }
            debug!("Replacing client for owner: {}", owner_id);
        } else {
            info!("Registered client for owner: {}", owner_id);
        }
        clients.insert(owner_id.to_string(), client);
        Ok(())
    }

    /// Remove the client for `owner_id`, returning it if present
    pub fn unregister(&self, owner_id: &str) -> Option<Arc<dyn TransferClient>> {
        let removed = self.clients.write().remove(owner_id);
        if removed.is_some() {
            info!("Unregistered client for owner: {}", owner_id);
        }
        removed
    }

    pub fn get(&self, owner_id: &str) -> Option<Arc<dyn TransferClient>> {
        self.clients.read().get(owner_id).cloned()
    }

    pub fn contains(&self, owner_id: &str) -> bool {
        self.clients.read().contains_key(owner_id)
    }

    /// Registered owner ids, sorted
    pub fn owners(&self) -> Vec<String> {
        let mut owners: Vec<String> = self.clients.read().keys().cloned().collect();
        owners.sort();
        owners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBlobService;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn same_fingerprint_replaces() {
        let registry = ClientRegistry::new();
        registry
            .register("acct", Arc::new(MemoryBlobService::new("account-1")))
            .unwrap();
        registry
            .register("acct", Arc::new(MemoryBlobService::new("account-1")))
            .unwrap();
        assert_eq!(registry.owners(), vec!["acct".to_string()]);
    }

    #[test]
    fn different_fingerprint_conflicts() {
        let registry = ClientRegistry::new();
        registry
            .register("acct", Arc::new(MemoryBlobService::new("account-1")))
            .unwrap();
        let err = registry
            .register("acct", Arc::new(MemoryBlobService::new("account-2")))
            .unwrap_err();
        assert!(matches!(err, TransferError::OwnerConflict { .. }));
        assert_eq!(registry.get("acct").unwrap().fingerprint(), "account-1");
    }

    #[test]
    fn unregister_frees_the_owner_id() {
        let registry = ClientRegistry::new();
        assert_ok!(registry.register("acct", Arc::new(MemoryBlobService::new("account-1"))));
        assert_err!(registry.register("acct", Arc::new(MemoryBlobService::new("account-2"))));

        assert!(registry.unregister("acct").is_some());
        assert!(registry.unregister("acct").is_none());
        assert!(!registry.contains("acct"));
        assert_ok!(registry.register("acct", Arc::new(MemoryBlobService::new("account-2"))));
    }

    #[test]
    fn empty_owner_is_rejected() {
        let registry = ClientRegistry::new();
        let err = registry
            .register("", Arc::new(MemoryBlobService::new("account-1")))
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest { .. }));
    }
}
