//! Schema-validated JSON documents layered on top of the page store, with a
//! B+Tree maintained per top-level field so queries can be answered by
//! intersecting indexed lookups instead of scanning every record.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use log::{debug, info};
use serde_json::{json, Map, Value};

use crate::btree::{compare_values, BPlusTree, Condition};
use crate::error::{Result, StoreError};
use crate::setops;
use crate::storage::{FileEngine, MemEngine, StorageEngine};
use crate::store::Store;
use crate::tree_store::TreeStore;

/// Stamped into the root record's `verify` field so `open` can tell a
/// document table from a plain page store (or a foreign one).
pub const DOC_MAGIC: &str = "klaf-document-table-v1";

pub type DefaultFn = Box<dyn Fn() -> Value + Send + Sync>;
pub type ValidateFn = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// One declared field of a table schema: a name, a default value producer,
/// and an optional validator. Order matters only for readability; lookups
/// are by name.
pub struct FieldSchema {
    pub name: String,
    pub default: DefaultFn,
    pub validate: Option<ValidateFn>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, default: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            default: Box::new(default),
            validate: None,
        }
    }

    pub fn with_validate(mut self, validate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.validate = Some(Box::new(validate));
        self
    }
}

/// A table's declared shape. There is no dynamic `ALTER TABLE`: opening a
/// table always means opening it against a schema.
pub struct Schema {
    pub fields: Vec<FieldSchema>,
    pub table_version: u32,
}

impl Schema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self {
            fields,
            table_version: 1,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.table_version = version;
        self
    }
}

/// A query: a conjunction of field → condition pairs. `documentIndex > 0`
/// is always implicitly added as the "all live documents" predicate.
#[derive(Default, Clone)]
pub struct Query(Vec<(String, Condition)>);

impl Query {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, field: &str, condition: Condition) -> Self {
        self.0.push((field.to_string(), condition));
        self
    }

    pub fn field_eq(self, field: &str, value: Value) -> Self {
        self.with(field, Condition::Equal(value))
    }
}

#[derive(Default, Clone)]
pub struct PickOption {
    pub order: Option<String>,
    pub desc: bool,
}

/// A schema-validated, indexed JSON document table persisted in a single
/// page store file. Record 1 is a root document holding the table's
/// `verify` magic, `tableVersion`, and a `head` map from field name to that
/// field's B+Tree root node id.
pub struct Documents<E: StorageEngine> {
    store: Store<E>,
    schema: Schema,
    root_id: String,
}

impl Documents<FileEngine> {
    pub fn create(path: impl AsRef<Path>, schema: Schema, overwrite: bool) -> Result<Self> {
        let store = Store::create(path, crate::page::DEFAULT_PAYLOAD_SIZE, overwrite)?;
        Self::init_fresh(store, schema)
    }

    pub fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let store = Store::open(path)?;
        Self::init_from_store(store, schema)
    }
}

impl Documents<MemEngine> {
    pub fn create_in_memory(schema: Schema) -> Result<Self> {
        let store = Store::create_in_memory(crate::page::DEFAULT_PAYLOAD_SIZE)?;
        Self::init_fresh(store, schema)
    }
}

impl<E: StorageEngine> Documents<E> {
    fn init_fresh(store: Store<E>, schema: Schema) -> Result<Self> {
        let payload_size = store.payload_size()?;
        let placeholder = vec![0u8; payload_size as usize];
        let (_, root_id) = store.put_dedicated(&placeholder)?;
        let root_json = json!({
            "verify": DOC_MAGIC,
            "tableVersion": schema.table_version,
            "head": {},
        });
        let root_bytes = serde_json::to_vec(&root_json).expect("root json always serializes");
        store.update(&root_id, &root_bytes)?;
        info!("created document table, tableVersion={}", schema.table_version);
        Ok(Self {
            store,
            schema,
            root_id,
        })
    }

    fn init_from_store(store: Store<E>, schema: Schema) -> Result<Self> {
        let root_rec = store
            .get_records(1)?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Corruption("document table has no root record".to_string()))?;
        let bytes = store.pick(&root_rec.id)?;
        let root: Value =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidObject(e.to_string()))?;
        if root.get("verify").and_then(Value::as_str) != Some(DOC_MAGIC) {
            return Err(StoreError::DbInvalid(
                "document table magic mismatch".to_string(),
            ));
        }
        debug!(
            "opened document table, tableVersion={:?}",
            root.get("tableVersion")
        );
        Ok(Self {
            store,
            schema,
            root_id: root_rec.id,
        })
    }

    fn read_root(&self) -> Result<Value> {
        let bytes = self.store.pick(&self.root_id)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::InvalidObject(e.to_string()))
    }

    fn write_root(&self, root: &Value) -> Result<()> {
        let bytes =
            serde_json::to_vec(root).map_err(|e| StoreError::InvalidObject(e.to_string()))?;
        self.store.update(&self.root_id, &bytes)?;
        Ok(())
    }

    fn tree_head(&self, root: &Value, field: &str) -> Option<u32> {
        root.get("head")?.get(field)?.as_u64().map(|v| v as u32)
    }

    fn set_tree_head(&self, root: &mut Value, field: &str, head: u32) {
        if !root["head"].is_object() {
            root["head"] = json!({});
        }
        root["head"][field] = json!(head);
    }

    fn ensure_tree_head(
        &self,
        root: &mut Value,
        adapter: &mut TreeStore<'_, E>,
        tree: &BPlusTree,
        field: &str,
    ) -> Result<u32> {
        if let Some(head) = self.tree_head(root, field) {
            return Ok(head);
        }
        let head = tree.init(adapter)?;
        self.set_tree_head(root, field, head);
        Ok(head)
    }

    fn normalize(&self, input: &Value) -> Result<Map<String, Value>> {
        let input_obj = input.as_object().cloned().unwrap_or_default();
        let mut out = Map::new();
        for field in &self.schema.fields {
            let value = match input_obj.get(&field.name) {
                Some(v) => v.clone(),
                None => (field.default)(),
            };
            if let Some(validate) = &field.validate {
                if !validate(&value) {
                    return Err(StoreError::InvalidObject(format!(
                        "field {} failed validation",
                        field.name
                    )));
                }
            }
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }

    /// Normalizes `doc` against the schema, injects `documentIndex` /
    /// `createdAt` / `updatedAt`, persists it, and indexes every top-level
    /// field.
    pub fn put(&self, doc: &Value) -> Result<String> {
        let mut fields = self.normalize(doc)?;
        let now = Utc::now().timestamp_millis();
        let document_index = self.store.auto_increment()? + 1;
        fields.insert("documentIndex".to_string(), json!(document_index));
        fields.insert("createdAt".to_string(), json!(now));
        fields.insert("updatedAt".to_string(), json!(now));

        let bytes = serde_json::to_vec(&Value::Object(fields.clone()))
            .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
        let id = self.store.put(&bytes)?;

        let mut root = self.read_root()?;
        let mut adapter = TreeStore::new(&self.store);
        let tree = BPlusTree::with_default_order();
        for (field, value) in fields.iter() {
            let head = self.ensure_tree_head(&mut root, &mut adapter, &tree, field)?;
            let new_head = tree.insert(&mut adapter, head, value.clone(), &id)?;
            self.set_tree_head(&mut root, field, new_head);
        }
        self.write_root(&root)?;
        debug!("put document {id} (index {document_index})");
        Ok(id)
    }

    /// Evaluates `query`'s conditions in lexicographic order of field name,
    /// one B+Tree lookup per field, then folds the per-field matches down to
    /// their intersection. `documentIndex > 0` is always implicitly conjoined
    /// first.
    fn resolve_ids(&self, query: &Query) -> Result<HashSet<String>> {
        let root = self.read_root()?;
        let mut adapter = TreeStore::new(&self.store);
        let tree = BPlusTree::with_default_order();

        let mut conditions: Vec<(String, Condition)> =
            vec![("documentIndex".to_string(), Condition::Gt(json!(0)))];
        conditions.extend(query.0.iter().cloned());
        conditions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sets = Vec::with_capacity(conditions.len());
        for (field, condition) in &conditions {
            let matched = match self.tree_head(&root, field) {
                Some(head) => tree.keys(&mut adapter, head, condition, None)?,
                None => HashSet::new(),
            };
            sets.push(matched);
        }
        Ok(setops::intersections(&sets))
    }

    /// Materializes every document matching `query`, optionally sorted by
    /// `option.order` using the §4.F.6 comparator.
    pub fn pick(&self, query: &Query, option: Option<&PickOption>) -> Result<Vec<Value>> {
        let ids = self.resolve_ids(query)?;
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            let bytes = self.store.pick(&id)?;
            let doc: Value = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
            docs.push(doc);
        }
        if let Some(opt) = option {
            if let Some(field) = &opt.order {
                docs.sort_by(|a, b| {
                    let av = a.get(field).cloned().unwrap_or(Value::Null);
                    let bv = b.get(field).cloned().unwrap_or(Value::Null);
                    compare_values(&av, &bv)
                });
                if opt.desc {
                    docs.reverse();
                }
            }
        }
        Ok(docs)
    }

    pub fn count(&self, query: &Query) -> Result<usize> {
        Ok(self.resolve_ids(query)?.len())
    }

    fn update_matching(&self, query: &Query, patch: &Value, full: bool) -> Result<usize> {
        let ids = self.resolve_ids(query)?;
        let patch_obj = patch.as_object().cloned().unwrap_or_default();
        let now = Utc::now().timestamp_millis();
        let mut root = self.read_root()?;
        let mut adapter = TreeStore::new(&self.store);
        let tree = BPlusTree::with_default_order();

        let mut updated = 0;
        for id in &ids {
            let bytes = self.store.pick(id)?;
            let old: Value = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
            let old_obj = old.as_object().cloned().unwrap_or_default();

            let mut new_obj = if full {
                let mut normalized = self.normalize(patch)?;
                normalized.insert(
                    "documentIndex".to_string(),
                    old_obj.get("documentIndex").cloned().unwrap_or(Value::Null),
                );
                normalized.insert(
                    "createdAt".to_string(),
                    old_obj.get("createdAt").cloned().unwrap_or(Value::Null),
                );
                normalized
            } else {
                let mut merged = old_obj.clone();
                for (k, v) in &patch_obj {
                    merged.insert(k.clone(), v.clone());
                }
                merged
            };
            new_obj.insert("updatedAt".to_string(), json!(now));

            let touched: HashSet<String> = old_obj
                .keys()
                .cloned()
                .chain(new_obj.keys().cloned())
                .collect();
            for field in touched {
                let old_val = old_obj.get(&field);
                let new_val = new_obj.get(&field);
                if old_val == new_val {
                    continue;
                }
                if let Some(old_v) = old_val {
                    if let Some(head) = self.tree_head(&root, &field) {
                        tree.delete(&mut adapter, head, old_v, id)?;
                    }
                }
                if let Some(new_v) = new_val {
                    let head = self.ensure_tree_head(&mut root, &mut adapter, &tree, &field)?;
                    let new_head = tree.insert(&mut adapter, head, new_v.clone(), id)?;
                    self.set_tree_head(&mut root, &field, new_head);
                }
            }

            let new_bytes = serde_json::to_vec(&Value::Object(new_obj))
                .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
            self.store.update(id, &new_bytes)?;
            updated += 1;
        }
        self.write_root(&root)?;
        Ok(updated)
    }

    /// Shallow-merges `patch` into every document matching `query`.
    pub fn partial_update(&self, query: &Query, patch: &Value) -> Result<usize> {
        self.update_matching(query, patch, false)
    }

    /// Replaces every non-timestamp field of every document matching
    /// `query` with `patch`, normalized against the schema.
    pub fn full_update(&self, query: &Query, patch: &Value) -> Result<usize> {
        self.update_matching(query, patch, true)
    }

    pub fn delete(&self, query: &Query) -> Result<usize> {
        let ids = self.resolve_ids(query)?;
        let root = self.read_root()?;
        let mut adapter = TreeStore::new(&self.store);
        let tree = BPlusTree::with_default_order();
        let mut deleted = 0;
        for id in &ids {
            let bytes = self.store.pick(id)?;
            let doc: Value = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
            if let Some(obj) = doc.as_object() {
                for (field, value) in obj {
                    if let Some(head) = self.tree_head(&root, field) {
                        tree.delete(&mut adapter, head, value, id)?;
                    }
                }
            }
            self.store.delete(id)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    pub fn export_data(&self) -> Result<Vec<Value>> {
        self.pick(&Query::new(), None)
    }

    /// Re-inserts each value via the normal `put` path, so schema defaults,
    /// validation, and B+Tree maintenance apply uniformly. Does not
    /// preserve the original `documentIndex` values.
    pub fn import_data(&self, docs: &[Value]) -> Result<Vec<String>> {
        docs.iter().map(|d| self.put(d)).collect()
    }

    /// Re-`fullUpdate`s every live document against the current schema,
    /// applying new field defaults/validators. Triggered after bumping
    /// `tableVersion` for a breaking schema change.
    pub fn migrate(&self) -> Result<usize> {
        let ids = self.resolve_ids(&Query::new())?;
        let mut n = 0;
        for id in ids {
            let bytes = self.store.pick(&id)?;
            let doc: Value = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
            let document_index = doc.get("documentIndex").cloned().unwrap_or(Value::Null);
            let query = Query::new().with("documentIndex", Condition::Equal(document_index));
            self.full_update(&query, &doc)?;
            n += 1;
        }
        info!(
            "migrated {n} documents to tableVersion {}",
            self.schema.table_version
        );
        Ok(n)
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            FieldSchema::new("name", || json!("")),
            FieldSchema::new("age", || json!(0)).with_validate(|v| v.as_i64().map(|n| n >= 0).unwrap_or(false)),
        ])
    }

    #[test]
    fn put_then_pick_all_finds_document() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        docs.put(&json!({"name": "alice", "age": 30})).unwrap();
        let found = docs.pick(&Query::new(), None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["name"], "alice");
    }

    #[test]
    fn query_intersects_across_fields() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        docs.put(&json!({"name": "alice", "age": 30})).unwrap();
        docs.put(&json!({"name": "bob", "age": 30})).unwrap();
        docs.put(&json!({"name": "alice", "age": 40})).unwrap();

        let query = Query::new()
            .field_eq("name", json!("alice"))
            .with("age", Condition::Equal(json!(30)));
        let found = docs.pick(&query, None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["age"], 30);
    }

    #[test]
    fn invalid_field_is_rejected() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        let err = docs.put(&json!({"name": "eve", "age": -1})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidObject(_)));
    }

    #[test]
    fn partial_update_reindexes_changed_field() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        docs.put(&json!({"name": "alice", "age": 30})).unwrap();

        let query = Query::new().field_eq("name", json!("alice"));
        docs.partial_update(&query, &json!({"age": 31})).unwrap();

        let old_query = Query::new().with("age", Condition::Equal(json!(30)));
        assert_eq!(docs.count(&old_query).unwrap(), 0);
        let new_query = Query::new().with("age", Condition::Equal(json!(31)));
        assert_eq!(docs.count(&new_query).unwrap(), 1);
    }

    #[test]
    fn delete_removes_document_and_index_entries() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        docs.put(&json!({"name": "alice", "age": 30})).unwrap();
        let query = Query::new().field_eq("name", json!("alice"));
        assert_eq!(docs.delete(&query).unwrap(), 1);
        assert_eq!(docs.count(&Query::new()).unwrap(), 0);
    }

    #[test]
    fn order_option_sorts_results() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        docs.put(&json!({"name": "c", "age": 3})).unwrap();
        docs.put(&json!({"name": "a", "age": 1})).unwrap();
        docs.put(&json!({"name": "b", "age": 2})).unwrap();

        let option = PickOption {
            order: Some("age".to_string()),
            desc: false,
        };
        let found = docs.pick(&Query::new(), Some(&option)).unwrap();
        let ages: Vec<i64> = found.iter().map(|d| d["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![1, 2, 3]);
    }

    #[test]
    fn export_then_import_preserves_field_values_but_not_document_index() {
        let docs = Documents::create_in_memory(schema()).unwrap();
        docs.put(&json!({"name": "alice", "age": 30})).unwrap();
        let exported = docs.export_data().unwrap();

        let docs2 = Documents::create_in_memory(schema()).unwrap();
        docs2.import_data(&exported).unwrap();
        let reimported = docs2.export_data().unwrap();
        assert_eq!(reimported.len(), 1);
        assert_eq!(reimported[0]["name"], "alice");
    }
}
