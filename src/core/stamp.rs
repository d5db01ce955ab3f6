//! Layer 1: file fingerprints.
//!
//! A stamp records what a file looked like at analysis time. Sources
//! and classpath binaries are content-hashed; products go by mtime
//! (they are rewritten wholesale on every compile, so mtime is both
//! cheap and sufficient). `Stamp::Empty` means the file has vanished.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

/// SHA-256 digest of file contents.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    pub fn from_reader(reader: &mut impl Read) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// File fingerprint at analysis time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stamp {
    /// The file does not exist (or was unreadable).
    Empty,
    /// Content digest.
    Hash(ContentHash),
    /// Last-modified time in millis since epoch.
    LastModified(i64),
}

impl Stamp {
    /// Change detection is structural inequality, nothing smarter.
    pub fn modified(old: &Stamp, new: &Stamp) -> bool {
        old != new
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Stamp::Empty)
    }
}

/// Computes stamps for the three file roles.
///
/// The engine never touches the filesystem except through this trait,
/// which keeps the invalidation logic deterministic under test.
pub trait Stamper {
    fn stamp_source(&self, file: &Path) -> Stamp;
    fn stamp_product(&self, file: &Path) -> Stamp;
    fn stamp_binary(&self, file: &Path) -> Stamp;

    /// Canonical form of a path used as a map key. Files that resolve
    /// to the same canonical path are the same file.
    fn canonicalize(&self, file: &Path) -> PathBuf {
        fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf())
    }
}

/// The real-filesystem stamper.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileStamper;

impl FileStamper {
    fn hash_file(file: &Path) -> Stamp {
        let Ok(mut f) = fs::File::open(file) else {
            return Stamp::Empty;
        };
        match ContentHash::from_reader(&mut f) {
            Ok(hash) => Stamp::Hash(hash),
            Err(_) => Stamp::Empty,
        }
    }

    fn mtime_file(file: &Path) -> Stamp {
        let Ok(meta) = fs::metadata(file) else {
            return Stamp::Empty;
        };
        let Ok(modified) = meta.modified() else {
            return Stamp::Empty;
        };
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Stamp::LastModified(millis)
    }
}

impl Stamper for FileStamper {
    fn stamp_source(&self, file: &Path) -> Stamp {
        Self::hash_file(file)
    }

    fn stamp_product(&self, file: &Path) -> Stamp {
        Self::mtime_file(file)
    }

    fn stamp_binary(&self, file: &Path) -> Stamp {
        Self::hash_file(file)
    }
}

/// Per-role stamp maps.
///
/// Invariant: a file appears in exactly one role. `add_*` enforce the
/// disjointness by evicting the other roles first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stamps {
    pub sources: BTreeMap<PathBuf, Stamp>,
    pub products: BTreeMap<PathBuf, Stamp>,
    pub binaries: BTreeMap<PathBuf, Stamp>,
}

impl Stamps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.products.is_empty() && self.binaries.is_empty()
    }

    pub fn add_source(&mut self, file: PathBuf, stamp: Stamp) {
        self.products.remove(&file);
        self.binaries.remove(&file);
        self.sources.insert(file, stamp);
    }

    pub fn add_product(&mut self, file: PathBuf, stamp: Stamp) {
        self.sources.remove(&file);
        self.binaries.remove(&file);
        self.products.insert(file, stamp);
    }

    pub fn add_binary(&mut self, file: PathBuf, stamp: Stamp) {
        self.sources.remove(&file);
        self.products.remove(&file);
        self.binaries.insert(file, stamp);
    }

    pub fn source(&self, file: &Path) -> Stamp {
        self.sources.get(file).copied().unwrap_or(Stamp::Empty)
    }

    pub fn product(&self, file: &Path) -> Stamp {
        self.products.get(file).copied().unwrap_or(Stamp::Empty)
    }

    pub fn binary(&self, file: &Path) -> Stamp {
        self.binaries.get(file).copied().unwrap_or(Stamp::Empty)
    }

    pub fn remove_source(&mut self, file: &Path) {
        self.sources.remove(file);
    }

    pub fn remove_product(&mut self, file: &Path) {
        self.products.remove(file);
    }

    /// Keywise union; `other` wins on collisions.
    pub fn merge(&mut self, other: Stamps) {
        for (file, stamp) in other.sources {
            self.add_source(file, stamp);
        }
        for (file, stamp) in other.products {
            self.add_product(file, stamp);
        }
        for (file, stamp) in other.binaries {
            self.add_binary(file, stamp);
        }
    }

    /// Role-disjointness check, used by the analysis verifier.
    pub fn roles_disjoint(&self) -> bool {
        self.sources.keys().all(|f| {
            !self.products.contains_key(f) && !self.binaries.contains_key(f)
        }) && self.products.keys().all(|f| !self.binaries.contains_key(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn content_hash_is_stable_and_hex() {
        let a = ContentHash::from_bytes(b"abc");
        let b = ContentHash::from_bytes(b"abc");
        assert_eq!(a, b);
        assert_eq!(a.to_string().len(), 64);
        assert_ne!(a, ContentHash::from_bytes(b"abd"));
    }

    #[test]
    fn modified_is_structural() {
        let h = Stamp::Hash(ContentHash::from_bytes(b"x"));
        assert!(!Stamp::modified(&h, &h.clone()));
        assert!(Stamp::modified(&h, &Stamp::Empty));
        assert!(Stamp::modified(
            &Stamp::LastModified(1),
            &Stamp::LastModified(2)
        ));
    }

    #[test]
    fn file_stamper_hashes_sources_and_mtimes_products() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.src");
        let mut f = fs::File::create(&path).expect("create");
        f.write_all(b"class A").expect("write");
        drop(f);

        let stamper = FileStamper;
        assert!(matches!(stamper.stamp_source(&path), Stamp::Hash(_)));
        assert!(matches!(
            stamper.stamp_product(&path),
            Stamp::LastModified(_)
        ));
        assert!(matches!(stamper.stamp_binary(&path), Stamp::Hash(_)));
    }

    #[test]
    fn missing_file_stamps_empty() {
        let stamper = FileStamper;
        let ghost = Path::new("/nonexistent/kiln/ghost.src");
        assert_eq!(stamper.stamp_source(ghost), Stamp::Empty);
        assert_eq!(stamper.stamp_product(ghost), Stamp::Empty);
    }

    #[test]
    fn roles_stay_disjoint() {
        let mut stamps = Stamps::new();
        let file = PathBuf::from("x");
        stamps.add_source(file.clone(), Stamp::LastModified(1));
        stamps.add_product(file.clone(), Stamp::LastModified(2));
        assert!(!stamps.sources.contains_key(&file));
        assert_eq!(stamps.product(&file), Stamp::LastModified(2));
        assert!(stamps.roles_disjoint());
    }

    #[test]
    fn merge_prefers_other() {
        let mut a = Stamps::new();
        a.add_source(PathBuf::from("s"), Stamp::LastModified(1));
        let mut b = Stamps::new();
        b.add_source(PathBuf::from("s"), Stamp::LastModified(2));
        a.merge(b);
        assert_eq!(a.source(Path::new("s")), Stamp::LastModified(2));
    }
}
