//! The module repository: an append-only indexed store of serialized
//! compiled modules, keyed by module name and fingerprint.
//!
//! Records are appended, never rewritten; reopening replays the record
//! headers to rebuild the in-memory index, so a crash mid-append loses at
//! most the trailing partial record. Clearing truncates the file and is
//! only legal while no fiber executes loaded code (the caller holds the
//! level-one-safe window).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ahash::AHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("repository is corrupt: {0}")]
    Corrupt(String),
}

const MAGIC: &[u8; 8] = b"QREPO\x00\x01\x00";

struct RepositoryState {
    file: Option<File>,
    index: AHashMap<(String, u64), (u64, u64)>,
}

pub struct ModuleRepository {
    path: PathBuf,
    state: Mutex<RepositoryState>,
}

impl ModuleRepository {
    /// Open (creating if needed) the repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<ModuleRepository, RepositoryError> {
        let repository = ModuleRepository {
            path: path.as_ref().to_owned(),
            state: Mutex::new(RepositoryState {
                file: None,
                index: AHashMap::new(),
            }),
        };
        repository.reopen_if_necessary()?;
        Ok(repository)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent: a no-op when the file is already open; otherwise opens
    /// it and replays the index.
    pub fn reopen_if_necessary(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("repository lock");
        if state.file.is_some() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)?;
        let end = file.seek(SeekFrom::End(0))?;
        if end == 0 {
            file.write_all(MAGIC)?;
            file.flush()?;
            state.file = Some(file);
            state.index.clear();
            return Ok(());
        }
        // Replay the headers to rebuild the index.
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        if &header != MAGIC {
            return Err(RepositoryError::Corrupt("bad magic".into()));
        }
        let mut index = AHashMap::new();
        let mut offset = MAGIC.len() as u64;
        loop {
            match read_record_header(&mut file)? {
                None => break,
                Some((name, fingerprint, payload_len, header_len)) => {
                    let payload_offset = offset + header_len;
                    index.insert((name, fingerprint), (payload_offset, payload_len));
                    offset = payload_offset + payload_len;
                    file.seek(SeekFrom::Start(offset))?;
                }
            }
        }
        tracing::info!(
            target: "repo",
            path = %self.path.display(),
            modules = index.len(),
            "repository opened"
        );
        state.index = index;
        state.file = Some(file);
        Ok(())
    }

    /// Append one serialized module version.
    pub fn put(
        &self,
        module: &str,
        fingerprint: u64,
        payload: &[u8],
    ) -> Result<(), RepositoryError> {
        self.reopen_if_necessary()?;
        let mut state = self.state.lock().expect("repository lock");
        let file = state.file.as_mut().expect("repository is open");
        let offset = file.seek(SeekFrom::End(0))?;
        let name_bytes = module.as_bytes();
        let mut header = Vec::with_capacity(name_bytes.len() + 24);
        header.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        header.extend_from_slice(name_bytes);
        header.extend_from_slice(&fingerprint.to_le_bytes());
        header.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        file.write_all(&header)?;
        file.write_all(payload)?;
        file.flush()?;
        let payload_offset = offset + header.len() as u64;
        state.index.insert(
            (module.to_owned(), fingerprint),
            (payload_offset, payload.len() as u64),
        );
        tracing::debug!(target: "repo", module, fingerprint, bytes = payload.len(), "module stored");
        Ok(())
    }

    /// Fetch a module version's payload, if present.
    pub fn get(&self, module: &str, fingerprint: u64) -> Result<Option<Vec<u8>>, RepositoryError> {
        self.reopen_if_necessary()?;
        let mut state = self.state.lock().expect("repository lock");
        let Some(&(offset, len)) = state.index.get(&(module.to_owned(), fingerprint)) else {
            return Ok(None);
        };
        let file = state.file.as_mut().expect("repository is open");
        file.seek(SeekFrom::Start(offset))?;
        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    pub fn contains(&self, module: &str, fingerprint: u64) -> bool {
        let state = self.state.lock().expect("repository lock");
        state.index.contains_key(&(module.to_owned(), fingerprint))
    }

    /// Drop every stored module and truncate the backing file. The caller
    /// guarantees no fiber is executing loaded code.
    pub fn clear_repository(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("repository lock");
        state.index.clear();
        state.file = None;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(MAGIC)?;
        file.flush()?;
        drop(file);
        drop(state);
        tracing::info!(target: "repo", path = %self.path.display(), "repository cleared");
        self.reopen_if_necessary()
    }

    /// Render a human-readable summary through `describer`.
    pub fn describe(&self, describer: &mut dyn FnMut(&str)) {
        let state = self.state.lock().expect("repository lock");
        describer(&format!(
            "repository {} ({} module version(s))",
            self.path.display(),
            state.index.len()
        ));
        let mut keys: Vec<&(String, u64)> = state.index.keys().collect();
        keys.sort();
        for (module, fingerprint) in keys {
            let (_, len) = state.index[&(module.clone(), *fingerprint)];
            describer(&format!("  {module} @{fingerprint:016x}: {len} byte(s)"));
        }
    }
}

fn read_record_header(
    file: &mut File,
) -> Result<Option<(String, u64, u64, u64)>, RepositoryError> {
    let mut len_bytes = [0u8; 4];
    match file.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(error.into()),
    }
    let name_len = u32::from_le_bytes(len_bytes) as usize;
    let mut name_bytes = vec![0u8; name_len];
    file.read_exact(&mut name_bytes)?;
    let name = String::from_utf8(name_bytes)
        .map_err(|_| RepositoryError::Corrupt("module name is not UTF-8".into()))?;
    let mut fingerprint_bytes = [0u8; 8];
    file.read_exact(&mut fingerprint_bytes)?;
    let mut payload_len_bytes = [0u8; 8];
    file.read_exact(&mut payload_len_bytes)?;
    let header_len = 4 + name_len as u64 + 8 + 8;
    Ok(Some((
        name,
        u64::from_le_bytes(fingerprint_bytes),
        u64::from_le_bytes(payload_len_bytes),
        header_len,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.repo");
        {
            let repository = ModuleRepository::open(&path).unwrap();
            repository.put("A", 1, b"alpha").unwrap();
            repository.put("B", 2, b"beta").unwrap();
            repository.put("A", 3, b"alpha-v2").unwrap();
            assert_eq!(repository.get("A", 1).unwrap().unwrap(), b"alpha");
            assert_eq!(repository.get("A", 3).unwrap().unwrap(), b"alpha-v2");
        }
        // A fresh open replays the index from disk.
        let reopened = ModuleRepository::open(&path).unwrap();
        assert!(reopened.contains("B", 2));
        assert_eq!(reopened.get("A", 3).unwrap().unwrap(), b"alpha-v2");
        assert_eq!(reopened.get("A", 999).unwrap(), None);
    }

    #[test]
    fn clearing_forgets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.repo");
        let repository = ModuleRepository::open(&path).unwrap();
        repository.put("A", 1, b"alpha").unwrap();
        repository.clear_repository().unwrap();
        assert!(!repository.contains("A", 1));
        assert_eq!(repository.get("A", 1).unwrap(), None);
        // Still usable after the clear.
        repository.put("C", 7, b"gamma").unwrap();
        assert_eq!(repository.get("C", 7).unwrap().unwrap(), b"gamma");
    }

    #[test]
    fn describe_lists_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.repo");
        let repository = ModuleRepository::open(&path).unwrap();
        repository.put("A", 1, b"alpha").unwrap();
        let mut lines = Vec::new();
        repository.describe(&mut |line| lines.push(line.to_owned()));
        assert!(lines[0].contains("1 module version(s)"));
        assert!(lines[1].contains('A'));
    }
}
