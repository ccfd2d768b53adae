// shelfdb-core/src/collection.rs
// In-memory collection: insert, scan, point update, aggregate
//
// ├── Insert Operations: insert_many, insert_many_if_empty, insert_one
// ├── Query Operations: count_documents, count_matching, find,
// │   find_with_options, find_one, require_one
// ├── Update Operations: update_one, update_many
// └── Aggregation: aggregate, aggregate_with

use ahash::AHashSet;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use crate::aggregation::Pipeline;
use crate::config::IdStrategy;
use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{Result, ShelfError};
use crate::find_options::{apply_limit_skip, apply_sort, FindOptions, Projection};
use crate::query::Query;
use crate::update::Update;
use crate::{log_debug, log_trace};

/// Result of insert_many operation
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub inserted_count: usize,
}

struct CollectionState {
    /// Shared with open cursors; writers go through `Arc::make_mut`
    documents: Arc<Vec<Document>>,
    ids: AHashSet<DocumentId>,
    last_id: u64,
}

/// A named, insertion-ordered set of documents
///
/// Readers take a snapshot of the document list and release the lock
/// immediately, so cursors and aggregations never block writers.
pub struct Collection {
    name: String,
    id_strategy: IdStrategy,
    state: RwLock<CollectionState>,
}

impl Collection {
    pub fn new(name: impl Into<String>, id_strategy: IdStrategy) -> Self {
        Collection {
            name: name.into(),
            id_strategy,
            state: RwLock::new(CollectionState {
                documents: Arc::new(Vec::new()),
                ids: AHashSet::new(),
                last_id: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn snapshot(&self) -> Arc<Vec<Document>> {
        Arc::clone(&self.state.read().documents)
    }

    // ========== INSERT OPERATIONS ==========

    /// Append documents, all or nothing
    ///
    /// Each entry must be a JSON object. A caller-supplied `_id` must be an
    /// integer or string and unique; otherwise one is assigned by the
    /// collection's [`IdStrategy`].
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        if documents.is_empty() {
            return Ok(InsertManyResult {
                inserted_ids: Vec::new(),
                inserted_count: 0,
            });
        }

        let mut state = self.state.write();
        self.insert_locked(&mut state, documents)
    }

    /// Like [`insert_many`](Self::insert_many), but only into an empty collection
    ///
    /// The emptiness check and the insert share one write lock, so of several
    /// concurrent callers exactly one populates the collection. Returns `None`
    /// when documents were already present.
    pub fn insert_many_if_empty(&self, documents: Vec<Value>) -> Result<Option<InsertManyResult>> {
        let mut state = self.state.write();
        if !state.documents.is_empty() {
            return Ok(None);
        }
        self.insert_locked(&mut state, documents).map(Some)
    }

    fn insert_locked(
        &self,
        state: &mut CollectionState,
        documents: Vec<Value>,
    ) -> Result<InsertManyResult> {
        let mut last_id = state.last_id;
        let mut batch_ids = AHashSet::with_capacity(documents.len());
        let mut prepared = Vec::with_capacity(documents.len());

        for (index, value) in documents.into_iter().enumerate() {
            let Value::Object(fields) = value else {
                return Err(ShelfError::InvalidDocument {
                    index,
                    reason: "expected a JSON object".to_string(),
                });
            };

            let doc_id = match fields.get(ID_FIELD) {
                Some(raw) => {
                    let id = DocumentId::from_value(raw).ok_or_else(|| {
                        ShelfError::InvalidDocument {
                            index,
                            reason: format!("_id must be an integer or string, got {}", raw),
                        }
                    })?;
                    // keep auto-increment ids clear of explicit integer ids
                    if let DocumentId::Int(n) = id {
                        last_id = last_id.max(u64::try_from(n).unwrap_or(0));
                    }
                    id
                }
                None => {
                    let id = self.id_strategy.next_id(last_id).ok_or_else(|| {
                        ShelfError::InvalidDocument {
                            index,
                            reason: "auto-increment id space exhausted".to_string(),
                        }
                    })?;
                    if let DocumentId::Int(_) = id {
                        last_id += 1;
                    }
                    id
                }
            };

            if state.ids.contains(&doc_id) || !batch_ids.insert(doc_id.clone()) {
                return Err(ShelfError::InvalidDocument {
                    index,
                    reason: format!("duplicate _id {}", doc_id),
                });
            }

            prepared.push(Document::new(doc_id, fields));
        }

        let inserted_ids: Vec<DocumentId> = prepared.iter().map(|d| d.id().clone()).collect();
        state.ids.extend(batch_ids);
        state.last_id = last_id;
        Arc::make_mut(&mut state.documents).extend(prepared);

        log_debug!(
            "Collection '{}' - inserted {} documents ({} total)",
            self.name,
            inserted_ids.len(),
            state.documents.len()
        );

        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    /// Insert a single document, returning its id
    pub fn insert_one(&self, document: Value) -> Result<DocumentId> {
        let result = self.insert_many(vec![document])?;
        result
            .inserted_ids
            .into_iter()
            .next()
            .ok_or_else(|| ShelfError::Validation("insert_one produced no id".to_string()))
    }

    // ========== QUERY OPERATIONS ==========

    /// Total number of documents held
    pub fn count_documents(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Number of documents matching `filter`
    pub fn count_matching(&self, filter: &Value) -> Result<usize> {
        let query = Query::from_json(filter)?;
        Ok(self
            .snapshot()
            .iter()
            .filter(|doc| query.matches_document(doc))
            .count())
    }

    /// Lazily scan documents matching `filter`, projected by `projection`
    ///
    /// Both arguments are compiled up front; `null` means "everything" for
    /// either. The cursor reads the collection as it was at this call.
    pub fn find(&self, filter: &Value, projection: &Value) -> Result<FindCursor> {
        log_debug!("find() called with filter: {}", filter);
        let query = Query::from_json(filter)?;
        let projection = Projection::from_json(projection)?;
        Ok(FindCursor::new(self.snapshot(), query, projection))
    }

    /// Find with sort, skip and limit
    ///
    /// Sorting happens before projection, so sort keys need not be projected.
    pub fn find_with_options(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        let query = Query::from_json(filter)?;
        let mut matched: Vec<Value> = self
            .snapshot()
            .iter()
            .filter(|doc| query.matches_document(doc))
            .map(|doc| doc.as_value().clone())
            .collect();
        log_trace!("find_with_options matched {} documents", matched.len());

        apply_sort(&mut matched, &options.sort);
        let page = apply_limit_skip(matched, options.limit, options.skip);
        Ok(page.iter().map(|doc| options.projection.apply(doc)).collect())
    }

    /// First matching document in collection order
    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        let query = Query::from_json(filter)?;
        Ok(self
            .snapshot()
            .iter()
            .find(|doc| query.matches_document(doc))
            .map(|doc| doc.as_value().clone()))
    }

    /// Like [`find_one`](Self::find_one) but a miss is an error
    pub fn require_one(&self, filter: &Value) -> Result<Value> {
        self.find_one(filter)?.ok_or_else(|| {
            ShelfError::NotFound(format!(
                "no document in '{}' matches {}",
                self.name, filter
            ))
        })
    }

    // ========== UPDATE OPERATIONS ==========

    /// Mutate the first document matching `filter`
    ///
    /// Returns whether a document matched; no match is not an error. A
    /// failing update leaves the document untouched.
    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<bool> {
        let query = Query::from_json(filter)?;
        let update = Update::from_json(update)?;

        let mut state = self.state.write();
        let Some(position) = state
            .documents
            .iter()
            .position(|doc| query.matches_document(doc))
        else {
            log_debug!("update_one on '{}' matched nothing", self.name);
            return Ok(false);
        };

        let mut updated = state.documents[position].clone();
        let modified = update.apply(&mut updated)?;
        if modified {
            Arc::make_mut(&mut state.documents)[position] = updated;
        }
        log_debug!(
            "update_one on '{}' matched _id {} (modified: {})",
            self.name,
            state.documents[position].id(),
            modified
        );
        Ok(true)
    }

    /// Mutate every matching document; returns how many matched
    ///
    /// Either all matches are updated or, on error, none are.
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<usize> {
        let query = Query::from_json(filter)?;
        let update = Update::from_json(update)?;

        let mut state = self.state.write();
        let mut changes = Vec::new();
        let mut matched = 0;
        for (position, doc) in state.documents.iter().enumerate() {
            if !query.matches_document(doc) {
                continue;
            }
            matched += 1;
            let mut updated = doc.clone();
            if update.apply(&mut updated)? {
                changes.push((position, updated));
            }
        }

        if !changes.is_empty() {
            let documents = Arc::make_mut(&mut state.documents);
            for (position, updated) in changes {
                documents[position] = updated;
            }
        }
        log_debug!("update_many on '{}' matched {} documents", self.name, matched);
        Ok(matched)
    }

    // ========== AGGREGATION ==========

    /// Compile and run an aggregation pipeline
    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline)?;
        Ok(self.aggregate_with(&pipeline))
    }

    /// Run an already compiled pipeline over the current documents
    pub fn aggregate_with(&self, pipeline: &Pipeline) -> Vec<Value> {
        let docs = self
            .snapshot()
            .iter()
            .map(|doc| doc.as_value().clone())
            .collect();
        pipeline.execute(docs)
    }
}

/// Lazy, restartable result of [`Collection::find`]
///
/// Yields projected copies; cloning or [`rewind`](FindCursor::rewind)ing
/// replays the same snapshot from the start.
#[derive(Debug, Clone)]
pub struct FindCursor {
    documents: Arc<Vec<Document>>,
    query: Query,
    projection: Projection,
    position: usize,
}

impl FindCursor {
    fn new(documents: Arc<Vec<Document>>, query: Query, projection: Projection) -> Self {
        FindCursor {
            documents,
            query,
            projection,
            position: 0,
        }
    }

    /// Restart from the first document of the snapshot
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Fetch the next chunk of documents (up to `chunk_size`)
    pub fn next_chunk(&mut self, chunk_size: usize) -> Vec<Value> {
        self.by_ref().take(chunk_size).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.documents.len()
    }
}

impl Iterator for FindCursor {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        while let Some(doc) = self.documents.get(self.position) {
            self.position += 1;
            if self.query.matches_document(doc) {
                return Some(self.projection.apply(doc.as_value()));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products() -> Collection {
        let collection = Collection::new("products", IdStrategy::AutoIncrement);
        collection
            .insert_many(vec![
                json!({"product_id": "E1", "name": "Laptop", "category": "Electronics", "price": 899, "stock": 5}),
                json!({"product_id": "F1", "name": "Desk", "category": "Furniture", "price": 250, "stock": 2}),
                json!({"product_id": "E2", "name": "Phone", "category": "Electronics", "price": 60000, "stock": 9}),
            ])
            .unwrap();
        collection
    }

    #[test]
    fn test_insert_many_assigns_ids_first() {
        let collection = products();
        let doc = collection.find_one(&json!({"product_id": "F1"})).unwrap().unwrap();
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(keys[0], "_id");
        assert_eq!(doc["_id"], json!(2));
        assert_eq!(collection.count_documents(), 3);
    }

    #[test]
    fn test_insert_many_is_all_or_nothing() {
        let collection = products();
        let err = collection
            .insert_many(vec![json!({"name": "ok"}), json!("not a document")])
            .unwrap_err();
        assert!(matches!(err, ShelfError::InvalidDocument { index: 1, .. }));
        assert_eq!(collection.count_documents(), 3);

        let err = collection.insert_many(vec![json!({"_id": 2})]).unwrap_err();
        assert!(err.to_string().contains("duplicate _id 2"));

        let err = collection.insert_many(vec![json!({"_id": [1]})]).unwrap_err();
        assert!(matches!(err, ShelfError::InvalidDocument { index: 0, .. }));
    }

    #[test]
    fn test_auto_ids_skip_explicit_ids() {
        let collection = Collection::new("c", IdStrategy::AutoIncrement);
        collection.insert_one(json!({"_id": 10})).unwrap();
        assert_eq!(collection.insert_one(json!({})).unwrap(), DocumentId::Int(11));
        assert_eq!(
            collection.insert_one(json!({"_id": "sku-1"})).unwrap(),
            DocumentId::String("sku-1".to_string())
        );
    }

    #[test]
    fn test_auto_ids_exhausted_is_error() {
        let collection = Collection::new("c", IdStrategy::AutoIncrement);
        collection.insert_one(json!({"_id": i64::MAX})).unwrap();

        let err = collection.insert_many(vec![json!({"_id": "ok"}), json!({})]).unwrap_err();
        assert!(matches!(
            err,
            ShelfError::InvalidDocument { index: 1, ref reason } if reason.contains("exhausted")
        ));
        assert_eq!(collection.count_documents(), 1);
        assert_eq!(
            collection.insert_one(json!({"_id": "sku-1"})).unwrap(),
            DocumentId::String("sku-1".to_string())
        );
    }

    #[test]
    fn test_insert_many_if_empty() {
        let collection = Collection::new("c", IdStrategy::AutoIncrement);
        let first = collection.insert_many_if_empty(vec![json!({"a": 1}), json!({"a": 2})]).unwrap();
        assert_eq!(first.map(|r| r.inserted_count), Some(2));
        assert_eq!(collection.insert_many_if_empty(vec![json!({"a": 3})]).unwrap(), None);
        assert_eq!(collection.count_documents(), 2);
    }

    #[test]
    fn test_insert_many_if_empty_concurrent_callers() {
        let collection = Arc::new(Collection::new("c", IdStrategy::AutoIncrement));
        let batch: Vec<Value> = (0..50).map(|i| json!({"n": i})).collect();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collection = Arc::clone(&collection);
                let batch = batch.clone();
                std::thread::spawn(move || collection.insert_many_if_empty(batch).unwrap().is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|inserted| *inserted)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(collection.count_documents(), 50);
    }

    #[test]
    fn test_object_id_strategy() {
        let collection = Collection::new("c", IdStrategy::ObjectId);
        let result = collection.insert_many(vec![json!({}), json!({})]).unwrap();
        assert_eq!(result.inserted_count, 2);
        assert_ne!(result.inserted_ids[0], result.inserted_ids[1]);
        assert!(matches!(result.inserted_ids[0], DocumentId::String(_)));
    }

    #[test]
    fn test_find_projection_and_rewind() {
        let collection = products();
        let mut cursor = collection
            .find(
                &json!({"category": "Electronics", "price": {"$lt": 50000}}),
                &json!({"_id": 0, "name": 1, "price": 1, "stock": 1}),
            )
            .unwrap();

        let first: Vec<Value> = cursor.by_ref().collect();
        assert_eq!(first, vec![json!({"name": "Laptop", "price": 899, "stock": 5})]);
        assert!(cursor.is_finished());

        cursor.rewind();
        assert_eq!(cursor.collect::<Vec<_>>(), first);
    }

    #[test]
    fn test_cursor_snapshot_ignores_later_writes() {
        let collection = products();
        let cursor = collection.find(&Value::Null, &Value::Null).unwrap();
        collection.insert_one(json!({"name": "late"})).unwrap();
        collection
            .update_one(&json!({"product_id": "E1"}), &json!({"$set": {"stock": 0}}))
            .unwrap();

        let seen: Vec<Value> = cursor.collect();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0]["stock"], 5);
        assert_eq!(collection.count_documents(), 4);
    }

    #[test]
    fn test_next_chunk() {
        let collection = products();
        let mut cursor = collection.find(&json!({}), &json!({"name": 1})).unwrap();
        assert_eq!(cursor.next_chunk(2).len(), 2);
        assert_eq!(cursor.next_chunk(2).len(), 1);
        assert!(cursor.next_chunk(2).is_empty());
    }

    #[test]
    fn test_find_rejects_mixed_projection() {
        let collection = products();
        let err = collection
            .find(&json!({}), &json!({"name": 1, "stock": 0}))
            .unwrap_err();
        assert!(matches!(err, ShelfError::Validation(_)));
    }

    #[test]
    fn test_find_with_options_sorts_before_projecting() {
        let collection = products();
        let options = FindOptions::new()
            .with_projection(Projection::from_json(&json!({"_id": 0, "name": 1})).unwrap())
            .with_sort("price", crate::find_options::SortDirection::Descending)
            .with_skip(1)
            .with_limit(1);
        let docs = collection.find_with_options(&json!({}), &options).unwrap();
        assert_eq!(docs, vec![json!({"name": "Laptop"})]);
    }

    #[test]
    fn test_require_one_not_found() {
        let collection = products();
        let err = collection.require_one(&json!({"product_id": "ZZZ"})).unwrap_err();
        assert!(matches!(err, ShelfError::NotFound(_)));
        assert!(collection.require_one(&json!({"product_id": "E2"})).is_ok());
    }

    #[test]
    fn test_update_one_first_match_only() {
        let collection = products();
        let matched = collection
            .update_one(&json!({"category": "Electronics"}), &json!({"$set": {"sale": true}}))
            .unwrap();
        assert!(matched);
        assert_eq!(collection.count_matching(&json!({"sale": true})).unwrap(), 1);
        assert_eq!(
            collection.find_one(&json!({"sale": true})).unwrap().unwrap()["product_id"],
            "E1"
        );
    }

    #[test]
    fn test_update_one_no_match_is_false() {
        let collection = products();
        let matched = collection
            .update_one(&json!({"product_id": "NOPE"}), &json!({"$set": {"x": 1}}))
            .unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_update_failure_leaves_document_untouched() {
        let collection = products();
        let err = collection
            .update_one(
                &json!({"product_id": "E1"}),
                &json!({"$set": {"stock": 1}, "$push": {"name": "x"}}),
            )
            .unwrap_err();
        assert!(err.to_string().contains("not an array"));
        assert_eq!(collection.require_one(&json!({"product_id": "E1"})).unwrap()["stock"], 5);
    }

    #[test]
    fn test_update_many() {
        let collection = products();
        let matched = collection
            .update_many(&json!({"category": "Electronics"}), &json!({"$inc": {"stock": 1}}))
            .unwrap();
        assert_eq!(matched, 2);
        assert_eq!(collection.count_matching(&json!({"stock": {"$in": [6, 10]}})).unwrap(), 2);
    }

    #[test]
    fn test_aggregate_category_average() {
        let collection = products();
        let out = collection
            .aggregate(&json!([
                {"$group": {"_id": "$category", "avg_price": {"$avg": "$price"}, "product_count": {"$sum": 1}}},
                {"$sort": {"avg_price": -1}}
            ]))
            .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"_id": "Electronics", "avg_price": 30449.5, "product_count": 2}),
                json!({"_id": "Furniture", "avg_price": 250.0, "product_count": 1})
            ]
        );
    }
}
