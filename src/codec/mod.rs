//! Schema-versioned binary serialization of the analysis.
//!
//! Two streams per module: the analysis stream (everything but APIs,
//! plus the compile setup) and the apis stream, so callers can load
//! everything-but-APIs cheaply. Each stream is one frame:
//!
//! ```text
//! magic (u32 LE) | version (u16 LE) | reserved (u16 LE, zero)
//! payload length (u32 LE) | crc32c(payload) (u32 LE) | gzip payload
//! ```
//!
//! Payload integers are little-endian, counts and string ids are
//! LEB128 varints, strings go through a per-stream dictionary
//! ([`interner`]), and every enum is a tagged byte. Readers reject
//! versions newer than they know.

pub mod interner;
pub mod mappers;
pub mod read;
pub mod write;

use thiserror::Error;

pub use mappers::{IdentityMapper, ReadMapper, ReadWriteMappers, WriteMapper};
pub use read::AnalysisReader;
pub use write::AnalysisWriter;

/// Magic for the analysis stream ("KANL").
pub const ANALYSIS_MAGIC: u32 = 0x4B41_4E4C;
/// Magic for the apis stream ("KAPI").
pub const APIS_MAGIC: u32 = 0x4B41_5049;

pub(crate) const FRAME_HEADER_LEN: usize = 16;

/// On-disk schema version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum Version {
    V1 = 1,
}

impl Version {
    pub const CURRENT: Version = Version::V1;

    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Version::V1),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic {got:#010x}, expected {expected:#010x}")]
    BadMagic { expected: u32, got: u32 },

    #[error("unsupported analysis format version {got}")]
    UnsupportedVersion { got: u16 },

    #[error("reserved header field not zero ({got})")]
    ReservedNonZero { got: u16 },

    #[error("payload crc mismatch (expected {expected:#010x}, got {got:#010x})")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("truncated while reading {what}")]
    Truncated { what: &'static str },

    #[error("unknown {what} tag {id}")]
    UnknownEnum { what: &'static str, id: u8 },

    #[error("missing required section: {field}")]
    MissingField { field: &'static str },

    #[error("string dictionary id {id} out of range")]
    InvalidDictionaryId { id: u64 },

    #[error("varint for {what} overflows")]
    VarintOverflow { what: &'static str },

    #[error("invalid utf-8 in {what}")]
    InvalidUtf8 { what: &'static str },

    #[error("path {path:?} is not representable as utf-8")]
    NonUtf8Path { path: std::path::PathBuf },

    #[error("declared length {len} for {what} exceeds remaining payload")]
    LengthOverrun { what: &'static str, len: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_roundtrip() {
        assert_eq!(Version::from_raw(1), Some(Version::V1));
        assert_eq!(Version::from_raw(2), None);
        assert_eq!(Version::CURRENT as u16, 1);
    }

    #[test]
    fn magics_differ_per_stream() {
        assert_ne!(ANALYSIS_MAGIC, APIS_MAGIC);
        assert_eq!(&ANALYSIS_MAGIC.to_be_bytes(), b"KANL");
        assert_eq!(&APIS_MAGIC.to_be_bytes(), b"KAPI");
    }
}
