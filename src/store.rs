//! On-disk analysis store and the process-wide cache.
//!
//! Two blobs per module: `<backing>` (analysis + setup) and
//! `<backing>.apis`. Writes go through a temp file and rename so a
//! crashed process never leaves a torn store behind. A process-wide
//! map of weak references lets long-running hosts share one loaded
//! analysis across repeated reads; entries may be evicted at any time
//! and can be flushed explicitly with [`invalidate_cache`].

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use thiserror::Error;

use crate::codec::{AnalysisReader, AnalysisWriter, CodecError, ReadWriteMappers};
use crate::core::{Analysis, CompileSetup};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Decode failures downgrade to "no previous analysis"; an
    /// unwritable disk does not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Codec(_))
    }
}

/// What one store round-trips: the analysis and the setup it was
/// produced under.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisContents {
    pub analysis: Analysis,
    pub setup: CompileSetup,
}

pub struct AnalysisStore {
    backing: PathBuf,
    mappers: ReadWriteMappers,
}

impl AnalysisStore {
    pub fn new(backing: PathBuf) -> Self {
        Self::with_mappers(backing, ReadWriteMappers::identity())
    }

    pub fn with_mappers(backing: PathBuf, mappers: ReadWriteMappers) -> Self {
        Self { backing, mappers }
    }

    pub fn backing_file(&self) -> &Path {
        &self.backing
    }

    pub fn apis_file(&self) -> PathBuf {
        let mut os = self.backing.clone().into_os_string();
        os.push(".apis");
        PathBuf::from(os)
    }

    /// Load the store, or `None` when nothing was written yet. A
    /// missing apis blob (e.g. written with `store_apis` off) loads as
    /// an analysis with empty APIs.
    pub fn get(&self) -> Result<Option<AnalysisContents>, StoreError> {
        let Some(mut contents) = self.get_without_apis()? else {
            return Ok(None);
        };
        match fs::read(self.apis_file()) {
            Ok(apis_bytes) => {
                let reader = AnalysisReader::new(&*self.mappers.read);
                contents.analysis.apis = reader.read_apis(&apis_bytes)?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StoreError::Io {
                    path: self.apis_file(),
                    source: err,
                })
            }
        }
        Ok(Some(contents))
    }

    /// Load the analysis stream alone, skipping the apis blob. This is
    /// why the APIs live in their own file: consumers that only need
    /// relations and stamps never pay for decoding class structures.
    pub fn get_without_apis(&self) -> Result<Option<AnalysisContents>, StoreError> {
        let bytes = match fs::read(&self.backing) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StoreError::Io {
                    path: self.backing.clone(),
                    source: err,
                })
            }
        };
        let reader = AnalysisReader::new(&*self.mappers.read);
        let (analysis, setup) = reader.read_analysis(&bytes)?;
        Ok(Some(AnalysisContents { analysis, setup }))
    }

    /// Write both blobs atomically (temp + rename). With `store_apis`
    /// off in the setup, the apis blob is dropped entirely.
    pub fn set(&self, contents: &AnalysisContents) -> Result<(), StoreError> {
        let writer = AnalysisWriter::new(&*self.mappers.write);
        let analysis_bytes = writer.write_analysis(&contents.analysis, &contents.setup)?;
        write_atomic(&self.backing, &analysis_bytes)?;

        let apis_path = self.apis_file();
        if contents.setup.store_apis {
            let apis_bytes = writer.write_apis(&contents.analysis.apis)?;
            write_atomic(&apis_path, &apis_bytes)?;
        } else {
            match fs::remove_file(&apis_path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StoreError::Io {
                        path: apis_path,
                        source: err,
                    })
                }
            }
        }

        invalidate_cache(&self.backing);
        tracing::debug!(
            backing = %self.backing.display(),
            bytes = analysis_bytes.len(),
            "analysis persisted"
        );
        Ok(())
    }

    /// Load through the process-wide cache. Repeated loads of the same
    /// backing path share one `Arc` until every holder drops it.
    pub fn get_cached(&self) -> Result<Option<Arc<AnalysisContents>>, StoreError> {
        if let Some(hit) = cache_lookup(&self.backing) {
            return Ok(Some(hit));
        }
        let Some(contents) = self.get()? else {
            return Ok(None);
        };
        let shared = Arc::new(contents);
        cache_insert(self.backing.clone(), &shared);
        Ok(Some(shared))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

type Cache = Mutex<HashMap<PathBuf, Weak<AnalysisContents>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cache_lookup(path: &Path) -> Option<Arc<AnalysisContents>> {
    let guard = cache().lock().unwrap_or_else(|err| err.into_inner());
    guard.get(path).and_then(Weak::upgrade)
}

fn cache_insert(path: PathBuf, contents: &Arc<AnalysisContents>) {
    let mut guard = cache().lock().unwrap_or_else(|err| err.into_inner());
    guard.retain(|_, weak| weak.strong_count() > 0);
    guard.insert(path, Arc::downgrade(contents));
}

/// Flush one cache entry, e.g. after an external process rewrote the
/// store.
pub fn invalidate_cache(path: &Path) {
    let mut guard = cache().lock().unwrap_or_else(|err| err.into_inner());
    guard.remove(path);
}
