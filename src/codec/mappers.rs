//! User-supplied path and option rewriting.
//!
//! An analysis is only portable if the absolute paths and machine
//! -specific options inside it can be rewritten on the way out and
//! back in. Callers provide a mapper pair; everything defaults to
//! identity, so local use pays nothing.

use std::path::{Path, PathBuf};

use crate::core::Stamp;

/// Applied while writing. Typically relativizes paths against a build
/// root.
pub trait WriteMapper {
    fn map_source_file(&self, file: PathBuf) -> PathBuf {
        file
    }
    fn map_binary_file(&self, file: PathBuf) -> PathBuf {
        file
    }
    fn map_product_file(&self, file: PathBuf) -> PathBuf {
        file
    }
    fn map_source_dir(&self, dir: PathBuf) -> PathBuf {
        dir
    }
    fn map_output_dir(&self, dir: PathBuf) -> PathBuf {
        dir
    }
    fn map_classpath_entry(&self, entry: PathBuf) -> PathBuf {
        entry
    }
    fn map_source_stamp(&self, file: &Path, stamp: Stamp) -> Stamp {
        let _ = file;
        stamp
    }
    fn map_binary_stamp(&self, file: &Path, stamp: Stamp) -> Stamp {
        let _ = file;
        stamp
    }
    fn map_product_stamp(&self, file: &Path, stamp: Stamp) -> Stamp {
        let _ = file;
        stamp
    }
    fn map_scalac_option(&self, option: String) -> String {
        option
    }
    fn map_javac_option(&self, option: String) -> String {
        option
    }
}

/// Applied while reading. Typically resolves relative paths against
/// this machine's build root.
pub trait ReadMapper {
    fn map_source_file(&self, file: PathBuf) -> PathBuf {
        file
    }
    fn map_binary_file(&self, file: PathBuf) -> PathBuf {
        file
    }
    fn map_product_file(&self, file: PathBuf) -> PathBuf {
        file
    }
    fn map_source_dir(&self, dir: PathBuf) -> PathBuf {
        dir
    }
    fn map_output_dir(&self, dir: PathBuf) -> PathBuf {
        dir
    }
    fn map_classpath_entry(&self, entry: PathBuf) -> PathBuf {
        entry
    }
    fn map_source_stamp(&self, file: &Path, stamp: Stamp) -> Stamp {
        let _ = file;
        stamp
    }
    fn map_binary_stamp(&self, file: &Path, stamp: Stamp) -> Stamp {
        let _ = file;
        stamp
    }
    fn map_product_stamp(&self, file: &Path, stamp: Stamp) -> Stamp {
        let _ = file;
        stamp
    }
    fn map_scalac_option(&self, option: String) -> String {
        option
    }
    fn map_javac_option(&self, option: String) -> String {
        option
    }
}

/// Leaves everything untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityMapper;

impl WriteMapper for IdentityMapper {}
impl ReadMapper for IdentityMapper {}

/// The mapper pair handed to a store.
pub struct ReadWriteMappers {
    pub read: Box<dyn ReadMapper + Send + Sync>,
    pub write: Box<dyn WriteMapper + Send + Sync>,
}

impl ReadWriteMappers {
    pub fn new(
        read: Box<dyn ReadMapper + Send + Sync>,
        write: Box<dyn WriteMapper + Send + Sync>,
    ) -> Self {
        Self { read, write }
    }

    pub fn identity() -> Self {
        Self::new(Box::new(IdentityMapper), Box::new(IdentityMapper))
    }
}

impl Default for ReadWriteMappers {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Debug for ReadWriteMappers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReadWriteMappers")
    }
}

/// Rewrites a path prefix in both directions; enough to relocate an
/// analysis between machines with different checkout roots.
#[derive(Debug, Clone)]
pub struct RootRebaser {
    pub from: PathBuf,
    pub to: PathBuf,
}

impl RootRebaser {
    fn rebase(&self, path: PathBuf) -> PathBuf {
        match path.strip_prefix(&self.from) {
            Ok(rest) => self.to.join(rest),
            Err(_) => path,
        }
    }
}

impl WriteMapper for RootRebaser {
    fn map_source_file(&self, file: PathBuf) -> PathBuf {
        self.rebase(file)
    }
    fn map_binary_file(&self, file: PathBuf) -> PathBuf {
        self.rebase(file)
    }
    fn map_product_file(&self, file: PathBuf) -> PathBuf {
        self.rebase(file)
    }
    fn map_source_dir(&self, dir: PathBuf) -> PathBuf {
        self.rebase(dir)
    }
    fn map_output_dir(&self, dir: PathBuf) -> PathBuf {
        self.rebase(dir)
    }
    fn map_classpath_entry(&self, entry: PathBuf) -> PathBuf {
        self.rebase(entry)
    }
}

impl ReadMapper for RootRebaser {
    fn map_source_file(&self, file: PathBuf) -> PathBuf {
        self.rebase(file)
    }
    fn map_binary_file(&self, file: PathBuf) -> PathBuf {
        self.rebase(file)
    }
    fn map_product_file(&self, file: PathBuf) -> PathBuf {
        self.rebase(file)
    }
    fn map_source_dir(&self, dir: PathBuf) -> PathBuf {
        self.rebase(dir)
    }
    fn map_output_dir(&self, dir: PathBuf) -> PathBuf {
        self.rebase(dir)
    }
    fn map_classpath_entry(&self, entry: PathBuf) -> PathBuf {
        self.rebase(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_leaves_paths_alone() {
        let mapper = IdentityMapper;
        let path = PathBuf::from("/w/src/a.src");
        assert_eq!(WriteMapper::map_source_file(&mapper, path.clone()), path);
    }

    #[test]
    fn rebaser_moves_matching_prefixes_only() {
        let rebaser = RootRebaser {
            from: PathBuf::from("/home/ci/build"),
            to: PathBuf::from("/Users/dev/build"),
        };
        assert_eq!(
            WriteMapper::map_source_file(&rebaser, PathBuf::from("/home/ci/build/src/a.src")),
            PathBuf::from("/Users/dev/build/src/a.src")
        );
        assert_eq!(
            WriteMapper::map_source_file(&rebaser, PathBuf::from("/opt/jdk/rt.jar")),
            PathBuf::from("/opt/jdk/rt.jar")
        );
    }
}
