//! # Binary Snapshot Codec
//!
//! Purpose: Dump the whole keyspace into a compact typed binary file and
//! reload it on startup.
//!
//! ## File layout
//!
//! ```text
//! "LITEKV" | 4 ASCII version digits | record count : fixed u64 LE
//! then per record:
//! 0xFF | type | has_expire | [expire_ms : fixed u64 LE]
//!      | key_len : varint | key bytes | payload | 0xFE
//! ```
//!
//! Varints are 7-bit little-endian continuation bytes (high bit set means
//! more follow). Saves go through `tmp_<name>` plus an atomic rename; loads
//! memory-map the file read-only. A malformed record stops the parse and
//! reports the partial load through the stats, it is not a hard error.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use tracing::{info, warn};

use lkv_common::{LkvError, LkvResult};
use lkv_core::{KvStore, Value, ValueObject};

/// File magic.
pub const MAGIC: &[u8; 6] = b"LITEKV";

/// Format version, stored as four ASCII digits.
pub const VERSION: u32 = 1;

const HEADER_SIZE: usize = 10;
const RECORD_START: u8 = 0xFF;
const RECORD_END: u8 = 0xFE;

const TYPE_INT: u8 = 1;
const TYPE_STR: u8 = 2;
const TYPE_LIST: u8 = 3;
const TYPE_HASH: u8 = 4;
const TYPE_SET: u8 = 5;

/// Appends a 7-bit varint.
pub fn encode_varu64(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// One decoded record, handed to the load callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: Vec<u8>,
    pub value: SnapshotValue,
    pub expire_at_ms: Option<u64>,
}

/// Decoded payload by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotValue {
    Int(i64),
    Str(Vec<u8>),
    List(Vec<Vec<u8>>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    Set(Vec<Vec<u8>>),
}

/// Outcome of a load; `complete` is false when parsing stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub expected: u64,
    pub loaded: u64,
    pub complete: bool,
}

/// Serializes the store into `dst`, returning the record count.
///
/// `expire_at` reports the absolute expiry for keys with a live TTL.
pub fn save(
    store: &KvStore,
    expire_at: impl Fn(&[u8]) -> Option<u64>,
    dst: &Path,
) -> LkvResult<u64> {
    let mut body = Vec::new();
    let mut count: u64 = 0;
    store.for_each_entry(|key, obj| {
        encode_record(key, obj, expire_at(key), &mut body);
        count += 1;
    });

    let mut out = Vec::with_capacity(HEADER_SIZE + 8 + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(format!("{VERSION:04}").as_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&body);

    // Write to a sibling temp file, then atomically swing the name over.
    let name = dst
        .file_name()
        .ok_or_else(|| LkvError::Io(std::io::Error::other("snapshot path has no file name")))?;
    let mut tmp_name = std::ffi::OsString::from("tmp_");
    tmp_name.push(name);
    let tmp = dst.with_file_name(tmp_name);
    let mut file = File::create(&tmp)?;
    file.write_all(&out)?;
    file.flush()?;
    std::fs::rename(&tmp, dst)?;
    info!(path = %dst.display(), records = count, "snapshot saved");
    Ok(count)
}

fn encode_record(key: &[u8], obj: &ValueObject, expire_at_ms: Option<u64>, out: &mut Vec<u8>) {
    out.push(RECORD_START);
    out.push(obj.value.type_tag());
    match expire_at_ms {
        Some(at) => {
            out.push(1);
            out.extend_from_slice(&at.to_le_bytes());
        }
        None => out.push(0),
    }
    encode_varu64(key.len() as u64, out);
    out.extend_from_slice(key);
    match &obj.value {
        Value::Int(n) => encode_varu64(*n as u64, out),
        Value::Str(s) => {
            encode_varu64(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        Value::List(list) => {
            encode_varu64(list.len() as u64, out);
            for item in list.range_all() {
                encode_varu64(item.len() as u64, out);
                out.extend_from_slice(item.as_bytes());
            }
        }
        Value::Hash(hash) => {
            encode_varu64(hash.len() as u64, out);
            hash.for_each(|field, value| {
                encode_varu64(field.len() as u64, out);
                out.extend_from_slice(field.as_bytes());
                encode_varu64(value.len() as u64, out);
                out.extend_from_slice(value.as_bytes());
            });
        }
        Value::Set(set) => {
            encode_varu64(set.len() as u64, out);
            set.for_each(|member, _| {
                encode_varu64(member.len() as u64, out);
                out.extend_from_slice(member.as_bytes());
            });
        }
    }
    out.push(RECORD_END);
}

/// Loads `src`, feeding each record to `apply`.
pub fn load(src: &Path, mut apply: impl FnMut(SnapshotRecord)) -> LkvResult<LoadStats> {
    let file = File::open(src)?;
    // Mapping is read-only and dropped (unmapped) at the end of the load.
    let mmap = unsafe { Mmap::map(&file)? };
    let mut reader = Reader::new(&mmap);

    if reader.remaining() < HEADER_SIZE + 8 {
        warn!(path = %src.display(), "snapshot too short, nothing loaded");
        return Ok(LoadStats {
            expected: 0,
            loaded: 0,
            complete: false,
        });
    }
    let magic = reader.bytes(MAGIC.len()).expect("length checked");
    if magic != MAGIC {
        warn!(path = %src.display(), "snapshot magic mismatch, nothing loaded");
        return Ok(LoadStats {
            expected: 0,
            loaded: 0,
            complete: false,
        });
    }
    let version = reader.bytes(4).expect("length checked");
    info!(
        path = %src.display(),
        version = %String::from_utf8_lossy(version),
        "loading snapshot"
    );
    let expected = reader.fixed_u64().expect("length checked");

    let mut loaded = 0u64;
    for _ in 0..expected {
        match read_record(&mut reader) {
            Some(record) => {
                apply(record);
                loaded += 1;
            }
            None => {
                warn!(
                    path = %src.display(),
                    loaded,
                    expected,
                    "malformed snapshot record, stopping with a partial load"
                );
                return Ok(LoadStats {
                    expected,
                    loaded,
                    complete: false,
                });
            }
        }
    }
    info!(path = %src.display(), records = loaded, "snapshot loaded");
    Ok(LoadStats {
        expected,
        loaded,
        complete: true,
    })
}

fn read_record(reader: &mut Reader<'_>) -> Option<SnapshotRecord> {
    if reader.u8()? != RECORD_START {
        return None;
    }
    let tag = reader.u8()?;
    let has_expire = reader.u8()?;
    let expire_at_ms = match has_expire {
        0 => None,
        _ => Some(reader.fixed_u64()?),
    };
    let key_len = reader.varu64()? as usize;
    let key = reader.bytes(key_len)?.to_vec();

    let value = match tag {
        TYPE_INT => SnapshotValue::Int(reader.varu64()? as i64),
        TYPE_STR => {
            let len = reader.varu64()? as usize;
            SnapshotValue::Str(reader.bytes(len)?.to_vec())
        }
        TYPE_LIST => {
            let count = reader.varu64()?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let len = reader.varu64()? as usize;
                items.push(reader.bytes(len)?.to_vec());
            }
            SnapshotValue::List(items)
        }
        TYPE_HASH => {
            let count = reader.varu64()?;
            let mut pairs = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let field_len = reader.varu64()? as usize;
                let field = reader.bytes(field_len)?.to_vec();
                let value_len = reader.varu64()? as usize;
                let value = reader.bytes(value_len)?.to_vec();
                pairs.push((field, value));
            }
            SnapshotValue::Hash(pairs)
        }
        TYPE_SET => {
            let count = reader.varu64()?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let len = reader.varu64()? as usize;
                items.push(reader.bytes(len)?.to_vec());
            }
            SnapshotValue::Set(items)
        }
        _ => return None,
    };

    if reader.u8()? != RECORD_END {
        return None;
    }
    Some(SnapshotRecord {
        key,
        value,
        expire_at_ms,
    })
}

/// Bounds-checked byte reader over the mapped file.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    fn fixed_u64(&mut self) -> Option<u64> {
        let raw = self.bytes(8)?;
        Some(u64::from_le_bytes(raw.try_into().expect("8 bytes")))
    }

    fn varu64(&mut self) -> Option<u64> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
        }
        Some(value)
    }
}
