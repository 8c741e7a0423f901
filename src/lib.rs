//! An embeddable, single-file, append-mostly paged record store, with an
//! optional JSON document layer providing schema-validated, indexed
//! queries via per-field B+Trees.
//!
//! The core (`store`) addresses variable-length opaque records by an
//! opaque string identifier; the document layer (`document`) builds
//! structured, queryable tables on top of it. Both are usable
//! independently — a caller who only needs a byte-addressed record store
//! never has to touch `serde_json`.

pub mod btree;
pub mod bytes;
pub mod cell;
pub mod document;
pub mod error;
pub mod idcodec;
pub mod page;
pub mod record;
pub mod setops;
pub mod storage;
pub mod store;
pub mod tree_store;

pub use document::{Documents, FieldSchema, PickOption, Query, Schema};
pub use error::{Result, StoreError};
pub use storage::{FileEngine, MemEngine, StorageEngine};
pub use store::{RecordView, Store};
