//! Dictionary-coded strings.
//!
//! The first occurrence of a string in a stream writes `id` + bytes,
//! later occurrences write `id` alone; `id` always equals the
//! dictionary size at write time, so the reader knows an id one past
//! its table means "new entry follows inline". The reader additionally
//! routes every decoded string through a shared [`Interner`], which is
//! what collapses duplicated names across thousands of API nodes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::{Interner, Name};

use super::CodecError;

pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | 0x80);
        } else {
            buf.push(byte);
            break;
        }
    }
}

pub fn read_varint(bytes: &[u8], pos: &mut usize, what: &'static str) -> Result<u64, CodecError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*pos)
            .ok_or(CodecError::Truncated { what })?;
        *pos += 1;
        if shift >= 64 {
            return Err(CodecError::VarintOverflow { what });
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Write side of the dictionary.
#[derive(Debug, Default)]
pub struct WriteDictionary {
    ids: HashMap<String, u64>,
}

impl WriteDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_str(&mut self, buf: &mut Vec<u8>, s: &str) {
        if let Some(&id) = self.ids.get(s) {
            put_varint(buf, id);
            return;
        }
        let id = self.ids.len() as u64;
        put_varint(buf, id);
        put_varint(buf, s.len() as u64);
        buf.extend_from_slice(s.as_bytes());
        self.ids.insert(s.to_string(), id);
    }
}

/// Read side of the dictionary. Entries are interned [`Name`]s shared
/// across every dictionary hanging off the same interner.
#[derive(Debug)]
pub struct ReadDictionary {
    entries: Vec<Name>,
    interner: Arc<Mutex<Interner>>,
}

impl ReadDictionary {
    pub fn new(interner: Arc<Mutex<Interner>>) -> Self {
        Self {
            entries: Vec::new(),
            interner,
        }
    }

    pub fn read_str(
        &mut self,
        bytes: &[u8],
        pos: &mut usize,
        what: &'static str,
    ) -> Result<Name, CodecError> {
        let id = read_varint(bytes, pos, what)?;
        if let Some(existing) = self.entries.get(id as usize) {
            return Ok(existing.clone());
        }
        if id != self.entries.len() as u64 {
            return Err(CodecError::InvalidDictionaryId { id });
        }
        let len = read_varint(bytes, pos, what)?;
        let end = pos
            .checked_add(len as usize)
            .ok_or(CodecError::VarintOverflow { what })?;
        if end > bytes.len() {
            return Err(CodecError::LengthOverrun { what, len });
        }
        let raw = std::str::from_utf8(&bytes[*pos..end])
            .map_err(|_| CodecError::InvalidUtf8 { what })?;
        *pos = end;
        let name = self
            .interner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .intern(raw);
        self.entries.push(name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos, "test").expect("decode"), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn dictionary_writes_each_string_once() {
        let mut dict = WriteDictionary::new();
        let mut buf = Vec::new();
        dict.put_str(&mut buf, "com.example.Widget");
        let first_len = buf.len();
        dict.put_str(&mut buf, "com.example.Widget");
        assert_eq!(buf.len(), first_len + 1, "repeat is a one-byte id");

        let interner = Arc::new(Mutex::new(Interner::new()));
        let mut read = ReadDictionary::new(interner);
        let mut pos = 0;
        let a = read.read_str(&buf, &mut pos, "test").expect("first");
        let b = read.read_str(&buf, &mut pos, "test").expect("second");
        assert_eq!(&*a, "com.example.Widget");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn reader_interns_across_dictionaries() {
        let interner = Arc::new(Mutex::new(Interner::new()));
        let mut bufs = Vec::new();
        for _ in 0..2 {
            let mut dict = WriteDictionary::new();
            let mut buf = Vec::new();
            dict.put_str(&mut buf, "shared.Name");
            bufs.push(buf);
        }
        let mut names = Vec::new();
        for buf in &bufs {
            let mut dict = ReadDictionary::new(Arc::clone(&interner));
            let mut pos = 0;
            names.push(dict.read_str(buf, &mut pos, "test").expect("decode"));
        }
        assert!(Arc::ptr_eq(&names[0], &names[1]));
    }

    #[test]
    fn out_of_range_id_is_an_error() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 5);
        let interner = Arc::new(Mutex::new(Interner::new()));
        let mut dict = ReadDictionary::new(interner);
        let mut pos = 0;
        assert!(matches!(
            dict.read_str(&buf, &mut pos, "test"),
            Err(CodecError::InvalidDictionaryId { id: 5 })
        ));
    }

    proptest::proptest! {
        #[test]
        fn dictionary_roundtrips_any_strings(strings in proptest::collection::vec(".*", 0..24)) {
            let mut dict = WriteDictionary::new();
            let mut buf = Vec::new();
            for s in &strings {
                dict.put_str(&mut buf, s);
            }
            let interner = Arc::new(Mutex::new(Interner::new()));
            let mut read = ReadDictionary::new(interner);
            let mut pos = 0;
            for s in &strings {
                let decoded = read.read_str(&buf, &mut pos, "prop").expect("decode");
                proptest::prop_assert_eq!(&*decoded, s.as_str());
            }
            proptest::prop_assert_eq!(pos, buf.len());
        }
    }
}
