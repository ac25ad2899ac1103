//! Key-value stores for the calibrator's persistence records.
//!
//! `MemStore` is the in-memory backend used by tests and the simulator.
//! `FsStore` maps one namespace to a directory and one key to one file of
//! raw bytes, which is enough for the handful of small records a wheel
//! keeps (LUTs, offsets, use flags).

use crate::error::HwError;
use halldrive_traits::KvStore;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// In-memory store. Cheap to clone the contents out for assertions.
#[derive(Debug, Default)]
pub struct MemStore {
    records: HashMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a record (tests use this to fake a previous power cycle).
    pub fn seed(&mut self, key: &str, value: Vec<u8>) {
        self.records.insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<&[u8]> {
        self.records.get(key).map(Vec::as_slice)
    }
}

impl KvStore for MemStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>> {
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// File-backed store: `<dir>/<key>` holds the record bytes verbatim.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) the directory backing one namespace.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, HwError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KvStore for FsStore {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Box::new(HwError::Io(e))),
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        fs::write(self.path_for(key), value).map_err(|e| Box::new(HwError::Io(e)) as _)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_store_round_trips() {
        let mut s = MemStore::new();
        assert!(s.get("lut_fwd").unwrap().is_none());
        s.put("lut_fwd", &[1, 2, 3]).unwrap();
        assert_eq!(s.get("lut_fwd").unwrap().unwrap(), vec![1, 2, 3]);
    }
}
