// shelfdb-core/src/lib.rs
//! Embedded in-memory document store
//!
//! Collections of schemaless JSON documents with predicate queries,
//! projections, point updates, an aggregation pipeline and an idempotent
//! bulk loader.
//!
//! ```
//! use serde_json::json;
//! use shelfdb_core::Database;
//!
//! let db = Database::open();
//! let products = db.collection("products");
//! products.insert_many(vec![
//!     json!({"product_id": "E1", "category": "Electronics", "price": 899}),
//!     json!({"product_id": "F1", "category": "Furniture", "price": 250}),
//! ]).unwrap();
//!
//! let cheap: Vec<_> = products
//!     .find(&json!({"price": {"$lt": 500}}), &json!({"_id": 0, "product_id": 1}))
//!     .unwrap()
//!     .collect();
//! assert_eq!(cheap, vec![json!({"product_id": "F1"})]);
//! ```

pub mod aggregation;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod loader;
pub mod logging;
pub mod query;
pub mod update;
pub mod value_utils;

// Public exports
pub use aggregation::{Accumulator, GroupId, Pipeline, ProjectField, Stage, SumExpression};
pub use collection::{Collection, FindCursor, InsertManyResult};
pub use config::{DatabaseConfig, IdStrategy};
pub use database::Database;
pub use document::{Document, DocumentId};
pub use error::{Result, ShelfError};
pub use find_options::{FindOptions, Projection, SortDirection};
pub use loader::{BulkLoader, LoadOptions, LoadOutcome};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use query::Query;
pub use update::Update;
