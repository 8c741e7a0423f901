//! Byte-addressed storage engine contract. The page store never touches a
//! file descriptor directly; every positional read/write, append, size
//! query and commit goes through this trait. A `FileEngine` backs the
//! default on-disk store, a `MemEngine` backs the test suite (and anything
//! embedding this crate purely in-process).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Consumed by the page store. Implementors own the underlying byte range;
/// `read`/`update` are only ever called within the range already reported by
/// `size()`, so no implementation needs to zero-pad past EOF.
pub trait StorageEngine: std::fmt::Debug {
    fn size(&self) -> Result<u64>;
    fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>>;
    fn update(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;
    fn append(&mut self, bytes: &[u8]) -> Result<u64>;
    fn commit(&mut self) -> Result<()>;
    fn reset(&mut self) -> Result<()>;
}

/// Plain-file storage engine; the default for [`crate::store::Store::create`]
/// and [`crate::store::Store::open`].
#[derive(Debug)]
pub struct FileEngine {
    file: File,
    path: PathBuf,
    len: u64,
}

impl FileEngine {
    pub fn create(path: impl AsRef<Path>, overwrite: bool) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() && !overwrite {
            return Err(StoreError::DbAlreadyExists(path.display().to_string()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len: 0,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StoreError::DbNoExists(path.display().to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }
}

impl StorageEngine for FileEngine {
    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn update(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        if offset + bytes.len() as u64 > self.len {
            self.len = offset + bytes.len() as u64;
        }
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(bytes)?;
        self.len += bytes.len() as u64;
        Ok(self.len)
    }

    fn commit(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.len = 0;
        Ok(())
    }
}

/// In-memory storage engine; used pervasively by the test suite so tests do
/// not need to create and clean up temp files to exercise paging/overflow
/// behavior.
#[derive(Debug, Default)]
pub struct MemEngine {
    buf: Vec<u8>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl StorageEngine for MemEngine {
    fn size(&self) -> Result<u64> {
        Ok(self.buf.len() as u64)
    }

    fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        let start = offset as usize;
        let end = start + length;
        if end > self.buf.len() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of in-memory engine buffer",
            )));
        }
        Ok(self.buf[start..end].to_vec())
    }

    fn update(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        self.buf.extend_from_slice(bytes);
        Ok(self.buf.len() as u64)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_engine_append_and_read() {
        let mut engine = MemEngine::new();
        let off = engine.append(b"hello").unwrap();
        assert_eq!(off, 5);
        assert_eq!(engine.read(0, 5).unwrap(), b"hello");
    }

    #[test]
    fn mem_engine_update_extends() {
        let mut engine = MemEngine::new();
        engine.update(10, b"xy").unwrap();
        assert_eq!(engine.size().unwrap(), 12);
        assert_eq!(engine.read(10, 2).unwrap(), b"xy");
    }

    #[test]
    fn file_engine_create_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.klaf");
        FileEngine::create(&path, false).unwrap();
        let err = FileEngine::create(&path, false).unwrap_err();
        assert!(matches!(err, StoreError::DbAlreadyExists(_)));
    }

    #[test]
    fn file_engine_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.klaf");
        let mut engine = FileEngine::create(&path, false).unwrap();
        engine.append(b"0123456789").unwrap();
        engine.update(2, b"XY").unwrap();
        assert_eq!(engine.read(0, 10).unwrap(), b"01XY456789");
    }
}
