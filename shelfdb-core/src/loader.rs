// shelfdb-core/src/loader.rs
// Idempotent bulk import of a JSON array into a collection

use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::collection::Collection;
use crate::error::{Result, ShelfError};
use crate::{log_debug, log_info};

/// Loader settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    /// Top-level fields every record must carry; empty tolerates anything
    pub required_fields: Vec<String>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }
}

/// Which branch a load took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted { count: usize },
    Skipped { existing: usize },
}

/// Populates an empty collection once
///
/// The source is always read and parsed; documents are only inserted when
/// the collection holds none, so running a load twice is harmless.
///
/// ```
/// use shelfdb_core::{BulkLoader, Database, LoadOutcome};
///
/// let db = Database::open();
/// let products = db.collection("products");
/// let source = br#"[{"product_id": "E1"}, {"product_id": "F1"}]"#;
///
/// let loader = BulkLoader::new(&products);
/// assert_eq!(loader.load_reader(&source[..], "inline").unwrap(), LoadOutcome::Inserted { count: 2 });
/// assert_eq!(loader.load_reader(&source[..], "inline").unwrap(), LoadOutcome::Skipped { existing: 2 });
/// ```
pub struct BulkLoader<'a> {
    collection: &'a Collection,
    options: LoadOptions,
}

impl<'a> BulkLoader<'a> {
    pub fn new(collection: &'a Collection) -> Self {
        BulkLoader {
            collection,
            options: LoadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Load from a file; the handle is closed before returning
    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<LoadOutcome> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ShelfError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_reader(BufReader::new(file), &path.display().to_string())
    }

    /// Load from any reader; `source_name` labels parse errors
    pub fn load_reader<R: Read>(&self, reader: R, source_name: &str) -> Result<LoadOutcome> {
        let documents: Vec<Value> =
            serde_json::from_reader(reader).map_err(|source| ShelfError::Parse {
                source_name: source_name.to_string(),
                source,
            })?;
        log_debug!("Parsed {} records from {}", documents.len(), source_name);
        self.load_documents(documents)
    }

    /// Guarded insert of already parsed records
    pub fn load_documents(&self, documents: Vec<Value>) -> Result<LoadOutcome> {
        self.check_required_fields(&documents)?;

        let Some(result) = self.collection.insert_many_if_empty(documents)? else {
            let existing = self.collection.count_documents();
            log_info!(
                "Collection '{}' already holds {} documents, skipping load",
                self.collection.name(),
                existing
            );
            return Ok(LoadOutcome::Skipped { existing });
        };

        log_info!(
            "Loaded {} documents into '{}'",
            result.inserted_count,
            self.collection.name()
        );
        Ok(LoadOutcome::Inserted {
            count: result.inserted_count,
        })
    }

    fn check_required_fields(&self, documents: &[Value]) -> Result<()> {
        for (index, doc) in documents.iter().enumerate() {
            for field in &self.options.required_fields {
                if doc.get(field).is_none() {
                    return Err(ShelfError::Validation(format!(
                        "record {} is missing required field '{}'",
                        index, field
                    )));
                }
            }
        }
        Ok(())
    }
}
