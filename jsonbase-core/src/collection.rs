// jsonbase-core/src/collection.rs
//! Lazy-loaded document container
//!
//! A collection lives in one blob: `{ "documents": { "<id>": doc, ... },
//! "metadata": {...} }`. Nothing is read until the first operation touches
//! the collection; from then on the in-memory map is the working copy and
//! a dirty flag tracks divergence from the blob.
//!
//! Reads serve from the loaded snapshot. Mutations run through the
//! coordinator, which handles locking, token conflicts and persistence.
//! Filters of the form `{ "_id": "<string>" }` bypass the query engine for
//! a direct map lookup.

use crate::coordinator::{Coordinated, Coordinator, CoordinatorConfig};
use crate::error::{JsonBaseError, Result};
use crate::field_path;
use crate::lock_service::LockService;
use crate::master_index::MasterIndex;
use crate::metadata::CollectionMetadata;
use crate::query::QueryEngine;
use crate::storage::BlobStore;
use crate::update::UpdateEngine;
use crate::value_compare;
use crate::{log_debug, log_warn};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Result of `insert_one`
#[derive(Debug, Clone)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: String,
}

/// Result of `insert_many`
#[derive(Debug, Clone)]
pub struct InsertManyResult {
    pub acknowledged: bool,
    pub inserted_ids: Vec<String>,
}

/// Result of `update_one` / `update_many` / `replace_one`
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Result of `delete_one` / `delete_many`
#[derive(Debug, Clone)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

struct CollectionState {
    documents: HashMap<String, Value>,
    metadata: CollectionMetadata,
    loaded: bool,
    dirty: bool,
}

/// A named set of documents persisted as a single blob
pub struct Collection {
    name: String,
    file_id: String,
    blob_store: Arc<dyn BlobStore>,
    master_index: Arc<MasterIndex>,
    coordinator: Coordinator,
    query_engine: QueryEngine,
    update_engine: UpdateEngine,
    state: RwLock<CollectionState>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("file_id", &self.file_id)
            .finish_non_exhaustive()
    }
}

impl Collection {
    pub fn new(
        name: &str,
        file_id: &str,
        blob_store: Arc<dyn BlobStore>,
        master_index: Arc<MasterIndex>,
        lock_service: Arc<LockService>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let metadata = CollectionMetadata::new(name, file_id)?;
        let coordinator = Coordinator::new(master_index.clone(), lock_service, config);

        Ok(Collection {
            name: name.to_string(),
            file_id: file_id.to_string(),
            blob_store,
            master_index,
            coordinator,
            query_engine: QueryEngine::new(),
            update_engine: UpdateEngine::new(),
            state: RwLock::new(CollectionState {
                documents: HashMap::new(),
                metadata,
                loaded: false,
                dirty: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Snapshot of the collection's metadata
    pub fn metadata(&self) -> CollectionMetadata {
        self.state.read().metadata.clone()
    }

    // ========================================================================
    // WRITE OPERATIONS (coordinated)
    // ========================================================================

    /// Insert a single document, assigning a UUID `_id` when missing
    pub fn insert_one(&self, document: Value) -> Result<InsertOneResult> {
        if !document.is_object() {
            return Err(JsonBaseError::InvalidArgument(
                "Document must be a JSON object".to_string(),
            ));
        }

        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "insertOne", || {
            let mut st = self.state.write();
            let (id, doc) = prepare_insert(document, &st.documents, &self.name)?;

            st.documents.insert(id.clone(), doc);
            st.metadata.increment_document_count();
            st.metadata.touch();
            st.dirty = true;

            Ok(InsertOneResult {
                acknowledged: true,
                inserted_id: id,
            })
        })
    }

    /// Insert several documents in one coordinated operation
    ///
    /// Validation (shape and duplicate ids, including duplicates within the
    /// batch) happens before any document lands, so a failure inserts
    /// nothing.
    pub fn insert_many(&self, documents: Vec<Value>) -> Result<InsertManyResult> {
        if documents.iter().any(|d| !d.is_object()) {
            return Err(JsonBaseError::InvalidArgument(
                "Documents must be JSON objects".to_string(),
            ));
        }

        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "insertMany", || {
            let mut st = self.state.write();

            let mut prepared: Vec<(String, Value)> = Vec::with_capacity(documents.len());
            let mut batch_ids: HashSet<String> = HashSet::new();
            for document in documents {
                let (id, doc) = prepare_insert(document, &st.documents, &self.name)?;
                if !batch_ids.insert(id.clone()) {
                    return Err(JsonBaseError::DuplicateKey(format!(
                        "_id '{}' appears twice in the batch",
                        id
                    )));
                }
                prepared.push((id, doc));
            }

            let mut inserted_ids = Vec::with_capacity(prepared.len());
            for (id, doc) in prepared {
                st.documents.insert(id.clone(), doc);
                st.metadata.increment_document_count();
                inserted_ids.push(id);
            }
            st.metadata.touch();
            st.dirty = true;

            Ok(InsertManyResult {
                acknowledged: true,
                inserted_ids,
            })
        })
    }

    /// Update the first document matching the filter
    ///
    /// `update` is either an operator document (`{"$set": ...}`) or a
    /// replacement document; mixing the two is rejected. Replacement keeps
    /// the matched document's `_id`.
    pub fn update_one(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "updateOne", || {
            let mut st = self.state.write();

            let target = self.find_first_matching_id(&st.documents, filter)?;
            let id = match target {
                Some(id) => id,
                None => {
                    return Ok(UpdateResult {
                        acknowledged: true,
                        matched_count: 0,
                        modified_count: 0,
                    });
                }
            };

            let original = st.documents.get(&id).cloned().ok_or_else(|| {
                JsonBaseError::DocumentNotFound(format!("Document '{}' vanished", id))
            })?;
            let updated = self.compute_update(&original, update)?;
            let modified = !value_compare::values_equal(&original, &updated, false);

            if modified {
                st.documents.insert(id, updated);
                st.metadata.touch();
                st.dirty = true;
            }

            Ok(UpdateResult {
                acknowledged: true,
                matched_count: 1,
                modified_count: modified as u64,
            })
        })
    }

    /// Update every document matching the filter
    pub fn update_many(&self, filter: &Value, update: &Value) -> Result<UpdateResult> {
        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "updateMany", || {
            let mut st = self.state.write();

            let ids = self.find_matching_ids(&st.documents, filter)?;

            // Compute every replacement first so a bad update leaves the
            // collection untouched
            let mut changes: Vec<(String, Value)> = Vec::new();
            for id in &ids {
                let original = st.documents.get(id).cloned().ok_or_else(|| {
                    JsonBaseError::DocumentNotFound(format!("Document '{}' vanished", id))
                })?;
                let updated = self.compute_update(&original, update)?;
                if !value_compare::values_equal(&original, &updated, false) {
                    changes.push((id.clone(), updated));
                }
            }

            let modified_count = changes.len() as u64;
            for (id, updated) in changes {
                st.documents.insert(id, updated);
            }
            if modified_count > 0 {
                st.metadata.touch();
                st.dirty = true;
            }

            Ok(UpdateResult {
                acknowledged: true,
                matched_count: ids.len() as u64,
                modified_count,
            })
        })
    }

    /// Replace the first matching document wholesale, preserving `_id`
    pub fn replace_one(&self, filter: &Value, replacement: &Value) -> Result<UpdateResult> {
        let map = replacement.as_object().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Replacement must be a JSON object".to_string())
        })?;
        if map.keys().any(|k| k.starts_with('$')) {
            return Err(JsonBaseError::InvalidArgument(
                "Replacement document cannot contain update operators".to_string(),
            ));
        }

        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "replaceOne", || {
            let mut st = self.state.write();

            let target = self.find_first_matching_id(&st.documents, filter)?;
            let id = match target {
                Some(id) => id,
                None => {
                    return Ok(UpdateResult {
                        acknowledged: true,
                        matched_count: 0,
                        modified_count: 0,
                    });
                }
            };

            let original = st.documents.get(&id).cloned().unwrap_or(Value::Null);
            let replaced = replacement_document(&original, map);
            let modified = !value_compare::values_equal(&original, &replaced, false);

            if modified {
                st.documents.insert(id, replaced);
                st.metadata.touch();
                st.dirty = true;
            }

            Ok(UpdateResult {
                acknowledged: true,
                matched_count: 1,
                modified_count: modified as u64,
            })
        })
    }

    /// Delete the first document matching the filter
    pub fn delete_one(&self, filter: &Value) -> Result<DeleteResult> {
        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "deleteOne", || {
            let mut st = self.state.write();

            let target = self.find_first_matching_id(&st.documents, filter)?;
            let deleted = match target {
                Some(id) => {
                    st.documents.remove(&id);
                    st.metadata.decrement_document_count()?;
                    st.metadata.touch();
                    st.dirty = true;
                    1
                }
                None => 0,
            };

            Ok(DeleteResult {
                acknowledged: true,
                deleted_count: deleted,
            })
        })
    }

    /// Delete every document matching the filter
    pub fn delete_many(&self, filter: &Value) -> Result<DeleteResult> {
        self.ensure_loaded()?;
        self.coordinator.coordinate(self, "deleteMany", || {
            let mut st = self.state.write();

            let ids = self.find_matching_ids(&st.documents, filter)?;
            for id in &ids {
                st.documents.remove(id);
                st.metadata.decrement_document_count()?;
            }
            if !ids.is_empty() {
                st.metadata.touch();
                st.dirty = true;
            }

            Ok(DeleteResult {
                acknowledged: true,
                deleted_count: ids.len() as u64,
            })
        })
    }

    /// Write the blob if the in-memory state has diverged from it
    pub fn save(&self) -> Result<()> {
        let mut st = self.state.write();
        if !st.dirty {
            return Ok(());
        }

        let count = st.documents.len() as u64;
        st.metadata.set_document_count(count);
        let blob = json!({
            "documents": &st.documents,
            "metadata": st.metadata.to_value(),
        });

        self.blob_store.write_file(&self.file_id, &blob)?;
        st.dirty = false;
        log_debug!("Saved collection '{}' ({} documents)", self.name, count);
        Ok(())
    }

    // ========================================================================
    // READ OPERATIONS (snapshot-consistent)
    // ========================================================================

    /// All documents matching the filter; an empty filter returns everything
    pub fn find(&self, filter: &Value) -> Result<Vec<Value>> {
        if !filter.is_object() {
            return Err(JsonBaseError::InvalidArgument(
                "Query must be a JSON object".to_string(),
            ));
        }

        self.ensure_loaded()?;
        let st = self.state.read();

        if let Some(id) = id_filter(filter) {
            return Ok(st.documents.get(&id).cloned().into_iter().collect());
        }

        let docs: Vec<Value> = st.documents.values().cloned().collect();
        drop(st);
        self.query_engine.execute(&docs, filter)
    }

    /// First document matching the filter
    pub fn find_one(&self, filter: &Value) -> Result<Option<Value>> {
        Ok(self.find(filter)?.into_iter().next())
    }

    pub fn count_documents(&self, filter: &Value) -> Result<u64> {
        let map = filter.as_object().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Query must be a JSON object".to_string())
        })?;

        if map.is_empty() {
            self.ensure_loaded()?;
            return Ok(self.state.read().documents.len() as u64);
        }

        Ok(self.find(filter)?.len() as u64)
    }

    /// Distinct values of a field across matching documents
    pub fn distinct(&self, field: &str, filter: &Value) -> Result<Vec<Value>> {
        let matching = self.find(filter)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut values = Vec::new();
        for doc in &matching {
            if let Some(value) = field_path::get_path(doc, field) {
                let key = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
                if seen.insert(key) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    /// Minimal aggregation: a pipeline of at most one `$match` stage
    pub fn aggregate(&self, pipeline: &Value) -> Result<Vec<Value>> {
        let stages = pipeline.as_array().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Pipeline must be an array of stages".to_string())
        })?;

        match stages.len() {
            0 => self.find(&json!({})),
            1 => {
                let stage = stages[0].as_object().ok_or_else(|| {
                    JsonBaseError::InvalidQuery("Aggregation stages must be objects".to_string())
                })?;
                match stage.get("$match") {
                    Some(filter) if stage.len() == 1 => self.find(filter),
                    _ => {
                        let name = stage
                            .keys()
                            .next()
                            .cloned()
                            .unwrap_or_else(|| "<empty>".to_string());
                        Err(JsonBaseError::InvalidQuery(format!(
                            "Unsupported aggregation stage: {}",
                            name
                        )))
                    }
                }
            }
            _ => Err(JsonBaseError::InvalidQuery(
                "Only a single $match stage is supported".to_string(),
            )),
        }
    }

    /// Discard in-memory state and re-read the blob and index metadata
    pub fn reload(&self) -> Result<()> {
        let blob = self.blob_store.read_file(&self.file_id)?;
        let (documents, blob_metadata) = self.parse_blob(&blob)?;

        // The master index record is authoritative where present
        let metadata = match self.master_index.get_collection(&self.name)? {
            Some(meta) => meta,
            None => blob_metadata,
        };

        let mut st = self.state.write();
        st.documents = documents;
        st.metadata = metadata;
        let doc_count = st.documents.len() as u64;
        st.metadata.set_document_count(doc_count);
        st.loaded = true;
        st.dirty = false;
        log_debug!("Reloaded collection '{}'", self.name);
        Ok(())
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn ensure_loaded(&self) -> Result<()> {
        if self.state.read().loaded {
            return Ok(());
        }

        let blob = self.blob_store.read_file(&self.file_id)?;
        let (documents, metadata) = self.parse_blob(&blob)?;

        let mut st = self.state.write();
        if st.loaded {
            return Ok(());
        }
        st.documents = documents;
        st.metadata = metadata;
        st.loaded = true;
        st.dirty = false;
        log_debug!(
            "Loaded collection '{}' ({} documents)",
            self.name,
            st.documents.len()
        );
        Ok(())
    }

    /// Parse a collection blob into documents + metadata
    ///
    /// The parent collection's name and fileId override whatever the blob
    /// metadata claims.
    fn parse_blob(&self, blob: &Value) -> Result<(HashMap<String, Value>, CollectionMetadata)> {
        let root = blob.as_object().ok_or_else(|| {
            JsonBaseError::InvalidFileFormat(format!(
                "Collection blob '{}' must be a JSON object",
                self.file_id
            ))
        })?;

        let mut documents = HashMap::new();
        match root.get("documents") {
            None | Some(Value::Null) => {}
            Some(Value::Object(docs)) => {
                for (id, doc) in docs {
                    if !doc.is_object() {
                        return Err(JsonBaseError::InvalidFileFormat(format!(
                            "Document '{}' in blob '{}' is not an object",
                            id, self.file_id
                        )));
                    }
                    let mut doc = doc.clone();
                    if doc.get("_id").is_none() {
                        if let Some(map) = doc.as_object_mut() {
                            map.insert("_id".to_string(), Value::String(id.clone()));
                        }
                    }
                    documents.insert(id.clone(), doc);
                }
            }
            Some(_) => {
                return Err(JsonBaseError::InvalidFileFormat(format!(
                    "'documents' in blob '{}' must be an object",
                    self.file_id
                )));
            }
        }

        let metadata = match root.get("metadata") {
            None | Some(Value::Null) => CollectionMetadata::new(&self.name, &self.file_id)?,
            Some(raw) => CollectionMetadata::with_initial(&self.name, &self.file_id, raw)?,
        };

        let mut metadata = metadata;
        if metadata.document_count() != documents.len() as u64 {
            log_warn!(
                "Collection '{}' metadata count {} != {} documents; resyncing",
                self.name,
                metadata.document_count(),
                documents.len()
            );
            metadata.set_document_count(documents.len() as u64);
        }

        Ok((documents, metadata))
    }

    /// Operator update vs replacement dispatch
    fn compute_update(&self, original: &Value, update: &Value) -> Result<Value> {
        let map = update.as_object().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Update must be a JSON object".to_string())
        })?;

        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys > 0 {
            if operator_keys != map.len() {
                return Err(JsonBaseError::InvalidQuery(
                    "Update cannot mix operators and replacement fields".to_string(),
                ));
            }
            self.update_engine.apply(original, update)
        } else {
            Ok(replacement_document(original, map))
        }
    }

    fn find_first_matching_id(
        &self,
        documents: &HashMap<String, Value>,
        filter: &Value,
    ) -> Result<Option<String>> {
        if !filter.is_object() {
            return Err(JsonBaseError::InvalidArgument(
                "Query must be a JSON object".to_string(),
            ));
        }

        if let Some(id) = id_filter(filter) {
            return Ok(documents.contains_key(&id).then_some(id));
        }

        for (id, doc) in documents {
            if self.query_engine.matches(doc, filter)? {
                return Ok(Some(id.clone()));
            }
        }
        Ok(None)
    }

    fn find_matching_ids(
        &self,
        documents: &HashMap<String, Value>,
        filter: &Value,
    ) -> Result<Vec<String>> {
        if !filter.is_object() {
            return Err(JsonBaseError::InvalidArgument(
                "Query must be a JSON object".to_string(),
            ));
        }

        if let Some(id) = id_filter(filter) {
            return Ok(documents
                .contains_key(&id)
                .then_some(id)
                .into_iter()
                .collect());
        }

        let mut ids = Vec::new();
        for (id, doc) in documents {
            if self.query_engine.matches(doc, filter)? {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }
}

impl Coordinated for Collection {
    fn collection_name(&self) -> String {
        self.name.clone()
    }

    fn modification_token(&self) -> Option<String> {
        self.state
            .read()
            .metadata
            .modification_token()
            .map(String::from)
    }

    fn set_modification_token(&self, token: Option<String>) -> Result<()> {
        let mut st = self.state.write();
        st.metadata.set_modification_token(token)?;
        // The token lives in the blob metadata too, so it must be written out
        st.dirty = true;
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        Collection::reload(self)
    }

    fn persist(&self) -> Result<()> {
        self.save()
    }

    fn document_count(&self) -> u64 {
        self.state.read().documents.len() as u64
    }
}

/// Extract the id from a `{ "_id": "<string>" }` filter
fn id_filter(filter: &Value) -> Option<String> {
    let map = filter.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.get("_id")?.as_str().map(String::from)
}

/// Validate a document for insertion, assigning an id when missing
fn prepare_insert(
    mut document: Value,
    existing: &HashMap<String, Value>,
    collection: &str,
) -> Result<(String, Value)> {
    let id = match document.get("_id") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(_) => {
            return Err(JsonBaseError::InvalidArgument(
                "_id must be a non-empty string".to_string(),
            ));
        }
        None => {
            let id = Uuid::new_v4().to_string();
            if let Some(map) = document.as_object_mut() {
                map.insert("_id".to_string(), Value::String(id.clone()));
            }
            id
        }
    };

    if existing.contains_key(&id) {
        return Err(JsonBaseError::DuplicateKey(format!(
            "_id '{}' already exists in '{}'",
            id, collection
        )));
    }

    Ok((id, document))
}

/// Build a replacement document carrying the original `_id`
fn replacement_document(original: &Value, replacement: &Map<String, Value>) -> Value {
    let mut doc = replacement.clone();
    if let Some(id) = original.get("_id") {
        doc.insert("_id".to_string(), id.clone());
    }
    Value::Object(doc)
}
