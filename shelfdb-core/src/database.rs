// shelfdb-core/src/database.rs
// Database handle: owns named collections

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::collection::Collection;
use crate::config::DatabaseConfig;
use crate::log_debug;

/// In-memory database
///
/// There is no global connection; every caller holds its own handle and
/// shares collections as `Arc<Collection>`.
pub struct Database {
    config: DatabaseConfig,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Open with default configuration
    pub fn open() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    /// Open with explicit configuration, applying its log level
    pub fn with_config(config: DatabaseConfig) -> Self {
        config.apply_logging();
        log_debug!("Opening database (id strategy: {:?})", config.id_strategy);
        Database {
            config,
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get or create a collection
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(existing) = self.collections.read().get(name) {
            return Arc::clone(existing);
        }

        let mut collections = self.collections.write();
        Arc::clone(collections.entry(name.to_string()).or_insert_with(|| {
            log_debug!("Creating collection '{}'", name);
            Arc::new(Collection::new(name, self.config.id_strategy))
        }))
    }

    /// Existing collection only
    pub fn get_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Collection names in sorted order
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns whether the collection existed
    pub fn drop_collection(&self, name: &str) -> bool {
        self.collections.write().remove(name).is_some()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStrategy;
    use crate::document::DocumentId;
    use serde_json::json;

    #[test]
    fn test_collection_is_shared() {
        let db = Database::open();
        let a = db.collection("products");
        let b = db.collection("products");
        a.insert_one(json!({"name": "Desk"})).unwrap();
        assert_eq!(b.count_documents(), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_list_and_drop() {
        let db = Database::open();
        db.collection("orders");
        db.collection("customers");
        assert_eq!(db.list_collections(), vec!["customers", "orders"]);
        assert!(db.get_collection("missing").is_none());

        assert!(db.drop_collection("orders"));
        assert!(!db.drop_collection("orders"));
        assert_eq!(db.list_collections(), vec!["customers"]);
    }

    #[test]
    fn test_config_id_strategy_reaches_collections() {
        let db = Database::with_config(DatabaseConfig::new().with_id_strategy(IdStrategy::ObjectId));
        let id = db.collection("c").insert_one(json!({})).unwrap();
        assert!(matches!(id, DocumentId::String(_)));
    }

    #[test]
    fn test_database_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Database>();
    }
}
