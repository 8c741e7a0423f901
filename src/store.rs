//! The paged record engine: root chunk bookkeeping, record placement,
//! overflow chaining, and the update-with-alias / delete semantics of
//! sections 3-4 of the design. This is the hard core the rest of the crate
//! (the B+Tree persistence adapter, the document layer) builds on.

use std::path::Path;
use std::sync::Mutex;

use log::{debug, trace};

use crate::bytes::random_u32;
use crate::cell::{cell_directory_offset, overflow_chunk_count, record_span, slot_cost};
use crate::error::{Result, StoreError};
use crate::idcodec::{decode_id_with_secret, encode_id};
use crate::page::{
    chunk_size, page_offset, PageHeader, PageType, RootChunk, CELL_SIZE, RECORD_HEADER_SIZE,
    ROOT_CHUNK_SIZE,
};
use crate::record::RecordHeader;
use crate::storage::{FileEngine, MemEngine, StorageEngine};

/// A live record as returned by [`Store::get_records`]: includes records
/// marked deleted, since §4.D.7 leaves filtering to the caller.
#[derive(Debug, Clone)]
pub struct RecordView {
    pub id: String,
    pub payload: Vec<u8>,
    pub deleted: bool,
}

struct Inner<E: StorageEngine> {
    engine: E,
    root: RootChunk,
    path: String,
    closed: bool,
}

/// An embeddable, single-file, append-mostly paged record store.
///
/// All mutating and reading operations serialize on a single internal lock;
/// see the "Open Questions" note in `DESIGN.md` for why this crate collapses
/// the spec's read/write `RwLock` model down to one mutex (our
/// `StorageEngine::read` needs `&mut self`, so true concurrent reads would
/// require positional pread support the trait doesn't expose).
pub struct Store<E: StorageEngine> {
    inner: Mutex<Inner<E>>,
}

impl Store<FileEngine> {
    pub fn create(path: impl AsRef<Path>, payload_size: u32, overwrite: bool) -> Result<Self> {
        if payload_size < 4 {
            return Err(StoreError::PayloadTooSmall {
                min: 4,
                got: payload_size,
            });
        }
        let engine = FileEngine::create(&path, overwrite)?;
        Self::init_fresh(engine, payload_size, path.as_ref().display().to_string())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let engine = FileEngine::open(&path)?;
        Self::init_from_engine(engine, path.as_ref().display().to_string())
    }
}

impl Store<MemEngine> {
    pub fn create_in_memory(payload_size: u32) -> Result<Self> {
        if payload_size < 4 {
            return Err(StoreError::PayloadTooSmall {
                min: 4,
                got: payload_size,
            });
        }
        Self::init_fresh(MemEngine::new(), payload_size, "<memory>".to_string())
    }
}

impl<E: StorageEngine> Store<E> {
    fn init_fresh(mut engine: E, payload_size: u32, path: String) -> Result<Self> {
        let created_at = chrono::Utc::now().timestamp_millis() as u64;
        let secret = random_u32() as u64 | ((random_u32() as u64) << 32);
        let root = RootChunk::fresh(payload_size, created_at, secret);
        engine.append(&root.to_bytes())?;
        let mut inner = Inner {
            engine,
            root,
            path,
            closed: false,
        };
        // Page 1 always exists, empty and internal, per §4.D.1.
        inner.append_internal_page()?;
        inner.sync_root()?;
        inner.engine.commit()?;
        debug!("created store with payload_size={payload_size}");
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn init_from_engine(mut engine: E, path: String) -> Result<Self> {
        let header_bytes = engine.read(0, ROOT_CHUNK_SIZE as usize)?;
        let root = RootChunk::from_bytes(&header_bytes, &path)?;
        debug!("opened store at {path}, last_index={}", root.last_index);
        Ok(Self {
            inner: Mutex::new(Inner {
                engine,
                root,
                path,
                closed: false,
            }),
        })
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner<E>) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if guard.closed {
            return Err(StoreError::DatabaseClosing);
        }
        let result = f(&mut guard);
        let _ = guard.engine.commit();
        result
    }

    pub fn put(&self, data: &[u8]) -> Result<String> {
        self.with_inner(|inner| inner.put_raw(data, true))
    }

    pub fn pick(&self, id: &str) -> Result<Vec<u8>> {
        self.with_inner(|inner| inner.pick(id))
    }

    pub fn update(&self, id: &str, data: &[u8]) -> Result<String> {
        self.with_inner(|inner| inner.update(id, data))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.with_inner(|inner| inner.delete(id))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        self.with_inner(|inner| Ok(inner.exists(id)))
    }

    pub fn get_records(&self, page_index: u32) -> Result<Vec<RecordView>> {
        self.with_inner(|inner| inner.get_records(page_index))
    }

    /// Allocates a brand-new page and writes `data` as that page's sole
    /// record, bypassing `put`'s usual "reuse the current head page"
    /// placement. The B+Tree persistence adapter uses this to give every
    /// tree node a page of its own.
    pub fn put_dedicated(&self, data: &[u8]) -> Result<(u32, String)> {
        self.with_inner(|inner| inner.put_dedicated(data))
    }

    pub fn count(&self) -> Result<u32> {
        self.with_inner(|inner| Ok(inner.root.count))
    }

    pub fn payload_size(&self) -> Result<u32> {
        self.with_inner(|inner| Ok(inner.root.payload_size))
    }

    pub fn auto_increment(&self) -> Result<u64> {
        self.with_inner(|inner| Ok(inner.root.auto_increment))
    }

    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().expect("store mutex poisoned");
        if guard.closed {
            return Ok(());
        }
        guard.engine.commit()?;
        guard.closed = true;
        Ok(())
    }
}

impl<E: StorageEngine> Inner<E> {
    fn sync_root(&mut self) -> Result<()> {
        self.engine.update(0, &self.root.to_bytes())
    }

    fn read_page_header(&mut self, index: u32) -> Result<PageHeader> {
        let offset = page_offset(index, self.root.payload_size);
        let bytes = self.engine.read(offset, crate::page::PAGE_HEADER_SIZE as usize)?;
        Ok(PageHeader::from_bytes(&bytes))
    }

    fn write_page_header(&mut self, index: u32, header: PageHeader) -> Result<()> {
        let offset = page_offset(index, self.root.payload_size);
        self.engine.update(offset, &header.to_bytes())
    }

    fn payload_start(&self, index: u32) -> u64 {
        page_offset(index, self.root.payload_size) + crate::page::PAGE_HEADER_SIZE as u64
    }

    fn read_payload_bytes(&mut self, index: u32, rel_offset: u32, len: u32) -> Result<Vec<u8>> {
        self.engine
            .read(self.payload_start(index) + rel_offset as u64, len as usize)
    }

    fn write_payload_bytes(&mut self, index: u32, rel_offset: u32, bytes: &[u8]) -> Result<()> {
        self.engine
            .update(self.payload_start(index) + rel_offset as u64, bytes)
    }

    fn read_record_header(&mut self, index: u32, rel_offset: u32) -> Result<RecordHeader> {
        let bytes = self.read_payload_bytes(index, rel_offset, RECORD_HEADER_SIZE)?;
        Ok(RecordHeader::from_bytes(&bytes))
    }

    fn write_record_header_only(
        &mut self,
        index: u32,
        rel_offset: u32,
        header: &RecordHeader,
    ) -> Result<()> {
        self.write_payload_bytes(index, rel_offset, &header.to_bytes())
    }

    fn write_record(
        &mut self,
        index: u32,
        rel_offset: u32,
        header: &RecordHeader,
        payload: &[u8],
    ) -> Result<()> {
        let mut combined = Vec::with_capacity(RECORD_HEADER_SIZE as usize + payload.len());
        combined.extend_from_slice(&header.to_bytes());
        combined.extend_from_slice(payload);
        self.write_payload_bytes(index, rel_offset, &combined)
    }

    fn read_cell(&mut self, index: u32, slot: u32) -> Result<u32> {
        let rel = cell_directory_offset(self.root.payload_size, slot);
        let bytes = self.read_payload_bytes(index, rel, CELL_SIZE)?;
        Ok(crate::bytes::read_u32(&bytes))
    }

    fn write_cell(&mut self, index: u32, slot: u32, value: u32) -> Result<()> {
        let rel = cell_directory_offset(self.root.payload_size, slot);
        let mut buf = [0u8; 4];
        crate::bytes::write_u32(&mut buf, value);
        self.write_payload_bytes(index, rel, &buf)
    }

    /// Appends a new, empty internal page and returns its 1-based index.
    fn append_internal_page(&mut self) -> Result<u32> {
        let new_index = self.root.last_index + 1;
        let blank = vec![0u8; chunk_size(self.root.payload_size) as usize];
        self.engine.append(&blank)?;
        let header = PageHeader::empty(new_index, self.root.payload_size);
        self.write_page_header(new_index, header)?;
        self.root.last_index = new_index;
        self.sync_root()?;
        trace!("appended internal page {new_index}");
        Ok(new_index)
    }

    /// Walks backward from the last page past any overflow pages until it
    /// finds the current internal head page, appending a fresh one if the
    /// file is empty or ends mid-chain in a way that leaves no head.
    fn resolve_head_page(&mut self) -> Result<u32> {
        if self.root.last_index == 0 {
            return self.append_internal_page();
        }
        let mut idx = self.root.last_index;
        loop {
            let header = self.read_page_header(idx)?;
            match header.page_type {
                PageType::Internal => return Ok(idx),
                PageType::Overflow if idx > 1 => idx -= 1,
                _ => return self.append_internal_page(),
            }
        }
    }

    /// Ensures `(index, slot)` addresses a plausible, in-range location
    /// before any byte-level read is attempted against it. Centralizes the
    /// bounds checks so a garbage identifier can never panic a slice.
    fn validate_location(&mut self, index: u32, slot: u32, id_for_error: &str) -> Result<u32> {
        if index == 0 || index > self.root.last_index {
            return Err(StoreError::InvalidRecord(id_for_error.to_string()));
        }
        let header = self.read_page_header(index)?;
        if slot == 0 || slot > header.count {
            return Err(StoreError::InvalidRecord(id_for_error.to_string()));
        }
        self.read_cell(index, slot)
    }

    /// Attempts to place a new, single-page record at `page_idx` whose
    /// header already fits in the remaining free space. Returns `None` if
    /// it doesn't fit; the caller must then allocate more pages.
    fn try_fast_path(&mut self, page_idx: u32, data: &[u8]) -> Result<Option<String>> {
        let mut header = self.read_page_header(page_idx)?;
        let payload_len = data.len() as u32;
        let u = slot_cost(payload_len);
        if header.free < u {
            return Ok(None);
        }
        let slot = header.count + 1;
        let salt = random_u32();
        let offset = self.next_write_offset(page_idx, slot)?;
        let rec = RecordHeader::new(page_idx, slot, salt, payload_len);
        self.write_record(page_idx, offset, &rec, data)?;
        self.write_cell(page_idx, slot, offset)?;
        header.count += 1;
        header.free -= u;
        self.write_page_header(page_idx, header)?;
        let id = encode_id(page_idx, slot, salt, self.root.secret);
        trace!("put: fast path page={page_idx} slot={slot} len={payload_len}");
        Ok(Some(id))
    }

    fn next_write_offset(&mut self, page_idx: u32, slot: u32) -> Result<u32> {
        if slot == 1 {
            return Ok(0);
        }
        let prev_offset = self.read_cell(page_idx, slot - 1)?;
        let prev_header = self.read_record_header(page_idx, prev_offset)?;
        Ok(prev_offset + RECORD_HEADER_SIZE + prev_header.length)
    }

    /// Writes a fresh record that must spill across an overflow chain:
    /// `head_page` becomes a head-of-chain page that still looks internal
    /// to readers (`type = internal`) but whose `next` field threads into
    /// the overflow pages holding the rest of the payload.
    fn write_overflow_new(&mut self, head_page: u32, data: &[u8]) -> Result<String> {
        let payload_len = data.len() as u32;
        let salt = random_u32();
        let rec = RecordHeader::new(head_page, 1, salt, payload_len);
        let full_bytes = {
            let mut v = Vec::with_capacity(RECORD_HEADER_SIZE as usize + data.len());
            v.extend_from_slice(&rec.to_bytes());
            v.extend_from_slice(data);
            v
        };

        let chunk_count = overflow_chunk_count(full_bytes.len() as u32, self.root.payload_size);
        let per_chunk = (self.root.payload_size - CELL_SIZE) as usize;

        let mut chain = vec![head_page];
        while (chain.len() as u32) < chunk_count {
            chain.push(self.append_internal_page()?);
        }

        let mut head_next = 0u32;
        for (i, &page_idx) in chain.iter().enumerate() {
            let start = i * per_chunk;
            let end = std::cmp::min(start + per_chunk, full_bytes.len());
            let chunk = &full_bytes[start..end];
            self.write_payload_bytes(page_idx, 0, chunk)?;
            let is_last = i as u32 + 1 == chunk_count;
            let next_idx = if is_last { 0 } else { chain[i + 1] };
            if i == 0 {
                head_next = next_idx;
            }
            self.write_page_header(
                page_idx,
                PageHeader {
                    page_type: PageType::Overflow,
                    index: page_idx,
                    next: next_idx,
                    count: 1,
                    free: 0,
                },
            )?;
        }

        self.write_page_header(
            head_page,
            PageHeader {
                page_type: PageType::Internal,
                index: head_page,
                next: head_next,
                count: 1,
                free: 0,
            },
        )?;
        self.write_cell(head_page, 1, 0)?;
        trace!("put: overflow path head={head_page} chunks={chunk_count}");
        Ok(encode_id(head_page, 1, salt, self.root.secret))
    }

    /// Rewrites an already-overflowing record's tail across its existing
    /// chain, appending fresh overflow pages only if the new payload needs
    /// more chunks than the chain currently has.
    fn rewrite_overflow_record(
        &mut self,
        head_page: u32,
        head_offset: u32,
        rec: &mut RecordHeader,
        data: &[u8],
    ) -> Result<()> {
        let new_len = data.len() as u32;
        rec.max_length = rec.max_length.max(new_len);
        rec.length = new_len;

        let full_bytes = {
            let mut v = Vec::with_capacity(RECORD_HEADER_SIZE as usize + data.len());
            v.extend_from_slice(&rec.to_bytes());
            v.extend_from_slice(data);
            v
        };

        let per_chunk = (self.root.payload_size - CELL_SIZE) as usize;
        let chunk_count = overflow_chunk_count(full_bytes.len() as u32, self.root.payload_size);

        let mut chain = vec![head_page];
        let mut cursor = self.read_page_header(head_page)?;
        while cursor.next != 0 {
            chain.push(cursor.next);
            cursor = self.read_page_header(cursor.next)?;
        }
        while (chain.len() as u32) < chunk_count {
            chain.push(self.append_internal_page()?);
        }

        let mut head_next = 0u32;
        for (i, &page_idx) in chain.iter().enumerate() {
            if i as u32 >= chunk_count {
                break;
            }
            let start = i * per_chunk;
            let end = std::cmp::min(start + per_chunk, full_bytes.len());
            let chunk = &full_bytes[start..end];
            self.write_payload_bytes(page_idx, 0, chunk)?;
            let is_last = i as u32 + 1 == chunk_count;
            let next_idx = if is_last { 0 } else { chain[i + 1] };
            if i == 0 {
                head_next = next_idx;
            }
            let page_type = if page_idx == head_page {
                PageType::Internal
            } else {
                PageType::Overflow
            };
            self.write_page_header(
                page_idx,
                PageHeader {
                    page_type,
                    index: page_idx,
                    next: next_idx,
                    count: 1,
                    free: 0,
                },
            )?;
        }
        let _ = head_offset;
        self.write_cell(head_page, 1, 0)?;
        trace!("update: overflow rewrite head={head_page} chunks={chunk_count}");
        Ok(())
    }

    /// §4.D.2. `user_put` distinguishes a caller-initiated `put` (which
    /// advances the auto-increment and logical counters) from an internal
    /// recursive `put` issued by `update` when a record outgrows its slot.
    fn put_raw(&mut self, data: &[u8], user_put: bool) -> Result<String> {
        if user_put {
            self.root.auto_increment += 1;
            self.root.count += 1;
        }

        let head_idx = self.resolve_head_page()?;
        if let Some(id) = self.try_fast_path(head_idx, data)? {
            self.sync_root()?;
            return Ok(id);
        }

        let head_header = self.read_page_header(head_idx)?;
        let current_idx = if head_header.count > 0 {
            self.append_internal_page()?
        } else {
            head_idx
        };

        let s = record_span(data.len() as u32);
        let chunk_count = overflow_chunk_count(s, self.root.payload_size);
        let id = if chunk_count == 1 {
            self.try_fast_path(current_idx, data)?
                .expect("freshly allocated page always has room for one chunk's worth of data")
        } else {
            self.write_overflow_new(current_idx, data)?
        };
        self.sync_root()?;
        Ok(id)
    }

    /// §4.D.3. `follow_alias` is only ever `false` for the head-only
    /// resolution used by `delete`/`update`.
    fn resolve_record(
        &mut self,
        id: &str,
        follow_alias: bool,
    ) -> Result<(u32, u32, RecordHeader)> {
        let (index, slot, salt) = decode_id_with_secret(id, self.root.secret)?;
        let offset = self.validate_location(index, slot, id)?;
        let rec = self.read_record_header(index, offset)?;

        if rec.salt != salt {
            return Err(StoreError::InvalidRecord(id.to_string()));
        }

        if follow_alias && rec.has_alias() {
            let alias_id = encode_id(rec.alias_index, rec.alias_slot, rec.alias_salt, self.root.secret);
            return self.resolve_record(&alias_id, true);
        }

        Ok((index, offset, rec))
    }

    fn materialize(&mut self, head_index: u32, offset: u32, rec: &RecordHeader) -> Result<Vec<u8>> {
        let head_header = self.read_page_header(head_index)?;
        if head_header.next == 0 {
            return self.read_payload_bytes(head_index, offset + RECORD_HEADER_SIZE, rec.length);
        }

        let per_chunk = self.root.payload_size - CELL_SIZE;
        let total_needed = RECORD_HEADER_SIZE + rec.length;
        let mut collected = Vec::with_capacity(total_needed as usize);
        let mut page_idx = head_index;
        loop {
            let want = std::cmp::min(per_chunk, total_needed - collected.len() as u32);
            let bytes = self.read_payload_bytes(page_idx, 0, want)?;
            collected.extend_from_slice(&bytes);
            if collected.len() as u32 >= total_needed {
                break;
            }
            let header = self.read_page_header(page_idx)?;
            if header.next == 0 {
                return Err(StoreError::Corruption(format!(
                    "overflow chain for page {head_index} ended early"
                )));
            }
            page_idx = header.next;
        }
        Ok(collected[RECORD_HEADER_SIZE as usize..].to_vec())
    }

    fn pick(&mut self, id: &str) -> Result<Vec<u8>> {
        let (index, offset, rec) = self.resolve_record(id, true)?;
        if rec.deleted {
            return Err(StoreError::AlreadyDeleted(id.to_string()));
        }
        self.materialize(index, offset, &rec)
    }

    fn update(&mut self, id: &str, data: &[u8]) -> Result<String> {
        let (_head_index, _head_offset, head_rec) = self.resolve_record(id, false)?;
        let (tail_index, tail_offset, mut tail_rec) = if head_rec.has_alias() {
            let alias_id = encode_id(
                head_rec.alias_index,
                head_rec.alias_slot,
                head_rec.alias_salt,
                self.root.secret,
            );
            self.resolve_record(&alias_id, false)?
        } else {
            self.resolve_record(id, false)?
        };

        if tail_rec.deleted {
            return Err(StoreError::AlreadyDeleted(id.to_string()));
        }

        let new_len = data.len() as u32;
        let tail_page_header = self.read_page_header(tail_index)?;

        if tail_page_header.next != 0 {
            // Overflow-shaped tail: rewrite across (and if needed, extend) its chain.
            self.rewrite_overflow_record(tail_index, tail_offset, &mut tail_rec, data)?;
            self.sync_root()?;
            return Ok(id.to_string());
        }

        if new_len <= tail_rec.max_length {
            tail_rec.length = new_len;
            self.write_record(tail_index, tail_offset, &tail_rec, data)?;
            self.sync_root()?;
            return Ok(id.to_string());
        }

        // Grows beyond max, single-page tail: alias to a freshly put record.
        let (head_index, head_offset, mut head_rec) = self.resolve_record(id, false)?;
        let new_id = self.put_raw(data, false)?;
        let (new_index, new_slot, new_salt) = decode_id_with_secret(&new_id, self.root.secret)?;

        if head_rec.has_alias() {
            let mut old_alias = tail_rec;
            old_alias.deleted = true;
            self.write_record_header_only(tail_index, tail_offset, &old_alias)?;
        }

        head_rec.alias_index = new_index;
        head_rec.alias_slot = new_slot;
        head_rec.alias_salt = new_salt;
        self.write_record_header_only(head_index, head_offset, &head_rec)?;
        self.sync_root()?;
        Ok(id.to_string())
    }

    /// §4.D.5. Treated as idempotent: deleting an already-deleted record is
    /// a no-op rather than an error, so the logical count is only ever
    /// decremented once per live record (see DESIGN.md open question b).
    fn delete(&mut self, id: &str) -> Result<()> {
        let (index, offset, mut rec) = self.resolve_record(id, false)?;
        if rec.deleted {
            return Ok(());
        }
        rec.deleted = true;
        self.write_record_header_only(index, offset, &rec)?;
        self.root.count = self.root.count.saturating_sub(1);
        self.sync_root()?;
        Ok(())
    }

    fn put_dedicated(&mut self, data: &[u8]) -> Result<(u32, String)> {
        let page_idx = self.append_internal_page()?;
        let s = record_span(data.len() as u32);
        let chunk_count = overflow_chunk_count(s, self.root.payload_size);
        let id = if chunk_count == 1 {
            self.try_fast_path(page_idx, data)?
                .expect("freshly allocated page always has room for one chunk's worth of data")
        } else {
            self.write_overflow_new(page_idx, data)?
        };
        self.sync_root()?;
        Ok((page_idx, id))
    }

    fn exists(&mut self, id: &str) -> bool {
        match self.resolve_record(id, false) {
            Ok((_, _, rec)) => !rec.deleted,
            Err(_) => false,
        }
    }

    /// §4.D.7. Returns every record physically stored in the head page of
    /// the internal chain containing `page_index`, including deleted ones.
    fn get_records(&mut self, page_index: u32) -> Result<Vec<RecordView>> {
        let mut idx = page_index;
        loop {
            if idx == 0 {
                return Err(StoreError::Corruption(format!(
                    "no internal head page found for page {page_index}"
                )));
            }
            let header = self.read_page_header(idx)?;
            if header.page_type == PageType::Internal {
                break;
            }
            idx -= 1;
        }

        let header = self.read_page_header(idx)?;
        let mut out = Vec::with_capacity(header.count as usize);
        for slot in 1..=header.count {
            let offset = self.read_cell(idx, slot)?;
            let rec = self.read_record_header(idx, offset)?;
            let id = encode_id(idx, slot, rec.salt, self.root.secret);
            let payload = self.materialize(idx, offset, &rec)?;
            out.push(RecordView {
                id,
                payload,
                deleted: rec.deleted,
            });
        }
        Ok(out)
    }
}

// `Inner::path` is read by error paths that want a human-readable name;
// keep the field alive even where current call sites don't reach it yet.
impl<E: StorageEngine> Inner<E> {
    #[allow(dead_code)]
    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store(payload_size: u32) -> Store<MemEngine> {
        Store::create_in_memory(payload_size).unwrap()
    }

    #[test]
    fn s1_short_record_round_trips() {
        let store = new_store(250);
        let id = store.put(b":db-put-test-3:").unwrap();
        assert_eq!(store.pick(&id).unwrap(), b":db-put-test-3:");
    }

    #[test]
    fn s2_overflow_record_round_trips_and_does_not_corrupt() {
        let store = new_store(250);
        let big = vec![b'A'; 4000];
        let id = store.put(&big).unwrap();
        assert_eq!(store.pick(&id).unwrap(), big);

        let other = store.put(b"B").unwrap();
        assert_eq!(store.pick(&id).unwrap(), big);
        assert_eq!(store.pick(&other).unwrap(), b"B");
    }

    #[test]
    fn s3_grow_update_creates_alias() {
        let store = new_store(250);
        let id = store.put(&vec![b'x'; 10]).unwrap();
        let grown = vec![b'y'; 10_000];
        let id2 = store.update(&id, &grown).unwrap();
        assert_eq!(id2, id);
        assert_eq!(store.pick(&id).unwrap(), grown);
    }

    #[test]
    fn s4_shrink_update_in_place_keeps_max_length() {
        let store = new_store(250);
        let id = store.put(&vec![b'x'; 100]).unwrap();
        store.update(&id, b"y").unwrap();
        assert_eq!(store.pick(&id).unwrap(), b"y");

        store.with_inner(|inner| {
            let (index, offset, rec) = inner.resolve_record(&id, true)?;
            let _ = (index, offset);
            assert_eq!(rec.max_length, 100);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn s5_delete_then_pick_fails() {
        let store = new_store(250);
        let id = store.put(b"z").unwrap();
        store.delete(&id).unwrap();
        let err = store.pick(&id).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyDeleted(_)));
        let err = store.update(&id, b"w").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyDeleted(_)));
    }

    #[test]
    fn s7_invalid_id_is_rejected() {
        let store = new_store(250);
        let bogus = "A".repeat(32);
        let err = store.pick(&bogus).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidRecord(_) | StoreError::Corruption(_)
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = new_store(250);
        let id = store.put(b"once").unwrap();
        store.delete(&id).unwrap();
        store.delete(&id).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn exists_reflects_deletion() {
        let store = new_store(250);
        let id = store.put(b"x").unwrap();
        assert!(store.exists(&id).unwrap());
        store.delete(&id).unwrap();
        assert!(!store.exists(&id).unwrap());
    }

    #[test]
    fn many_small_puts_share_a_page_then_spill() {
        let store = new_store(250);
        let mut ids = Vec::new();
        for i in 0..50u8 {
            ids.push(store.put(&[i]).unwrap());
        }
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(store.pick(id).unwrap(), vec![i as u8]);
        }
    }

    #[test]
    fn get_records_includes_deleted_rows() {
        let store = new_store(250);
        let id_a = store.put(b"a").unwrap();
        let _id_b = store.put(b"b").unwrap();
        store.delete(&id_a).unwrap();
        let records = store.get_records(1).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.deleted));
    }
}
