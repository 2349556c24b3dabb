//! # Byte-String Value
//!
//! Purpose: Own a growable byte buffer that backs string payloads, list
//! elements, and hash fields/values.
//!
//! ## Design Principles
//! 1. **Sentinel Invariant**: Capacity is always at least `len + 1` and a
//!    trailing zero byte follows the content, so the bytes double as a
//!    C-compatible string.
//! 2. **Amortised Growth**: Appends grow the allocation to
//!    `(len + add) * 1.5 + 1` so repeated appends stay O(1) amortised.
//! 3. **Allocation Reuse**: `reset` keeps the buffer when it is big enough.
//! 4. **Content Semantics**: Equality, ordering, and the Time33 hash all run
//!    over the content bytes only.

use std::cmp::Ordering;
use std::fmt;
use std::num::IntErrorKind;

use lkv_common::{LkvError, LkvResult};

const GROW_FACTOR_NUM: usize = 3;
const GROW_FACTOR_DEN: usize = 2;

/// Growable byte buffer with explicit length and a trailing sentinel byte.
#[derive(Clone, Default)]
pub struct ByteStr {
    /// Content length; excludes the sentinel.
    len: usize,
    /// `buf.len() == len + 1` once allocated; the last byte is zero.
    buf: Vec<u8>,
}

impl ByteStr {
    /// Creates an empty byte string without allocating.
    pub fn new() -> Self {
        ByteStr::default()
    }

    /// Creates a byte string holding a copy of `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut s = ByteStr::new();
        s.append(data);
        s
    }

    /// Content bytes, sentinel excluded.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Appends `data`, growing the allocation when the free tail is short.
    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            if self.buf.is_empty() {
                self.buf.push(0);
            }
            return;
        }
        let needed = self.len + data.len() + 1;
        if self.buf.capacity() < needed {
            let target = (self.len + data.len()) * GROW_FACTOR_NUM / GROW_FACTOR_DEN + 1;
            self.buf.reserve_exact(target - self.buf.len());
        }
        self.buf.truncate(self.len);
        self.buf.extend_from_slice(data);
        self.buf.push(0);
        self.len += data.len();
    }

    /// Clears the content and appends `data`, keeping the allocation when it
    /// is large enough.
    pub fn reset(&mut self, data: &[u8]) {
        self.len = 0;
        self.buf.truncate(0);
        self.append(data);
    }

    /// Clears the content without releasing the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
        self.buf.truncate(0);
        if self.buf.capacity() > 0 {
            self.buf.push(0);
        }
    }

    /// Reallocates down to exactly `len + 1` bytes.
    pub fn shrink(&mut self) {
        if !self.buf.is_empty() {
            self.buf.shrink_to(self.len + 1);
        }
    }

    /// Parses the content as a canonical signed 64-bit decimal.
    ///
    /// Only round-trip-exact representations are accepted: `"007"`, `"+5"`,
    /// or `"-0"` all fail with `NotAnInteger`; values outside the i64 range
    /// fail with `Overflow`.
    pub fn parse_i64(&self) -> LkvResult<i64> {
        parse_i64_bytes(self.as_bytes())
    }

    /// Bernstein Time33 hash over the content bytes.
    pub fn hash(&self) -> u64 {
        hash33(self.as_bytes())
    }
}

/// Canonical signed decimal parse shared with the dispatcher.
pub fn parse_i64_bytes(data: &[u8]) -> LkvResult<i64> {
    // int64 literals never exceed 20 chars ("-9223372036854775808").
    if data.is_empty() || data.len() > 20 {
        return Err(LkvError::NotAnInteger);
    }
    let text = std::str::from_utf8(data).map_err(|_| LkvError::NotAnInteger)?;
    match text.parse::<i64>() {
        Ok(value) => {
            if value.to_string().as_bytes() == data {
                Ok(value)
            } else {
                Err(LkvError::NotAnInteger)
            }
        }
        Err(err) => match err.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => Err(LkvError::Overflow),
            _ => Err(LkvError::NotAnInteger),
        },
    }
}

/// Bernstein's Time33 hash.
pub fn hash33(data: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &b in data {
        hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(b as u64);
    }
    hash
}

impl PartialEq for ByteStr {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ByteStr {}

impl PartialOrd for ByteStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByteStr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialEq<[u8]> for ByteStr {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl From<&[u8]> for ByteStr {
    fn from(data: &[u8]) -> Self {
        ByteStr::from_bytes(data)
    }
}

impl From<&str> for ByteStr {
    fn from(data: &str) -> Self {
        ByteStr::from_bytes(data.as_bytes())
    }
}

impl From<Vec<u8>> for ByteStr {
    fn from(data: Vec<u8>) -> Self {
        ByteStr::from_bytes(&data)
    }
}

impl fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteStr({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_maintains_sentinel_and_length() {
        let mut s = ByteStr::new();
        s.append(b"hello");
        assert_eq!(s.as_bytes(), b"hello");
        assert_eq!(s.len(), 5);
        assert!(s.capacity() >= 6);
        s.append(b", world");
        assert_eq!(s.as_bytes(), b"hello, world");
        assert!(s.capacity() >= s.len() + 1);
    }

    #[test]
    fn growth_follows_the_factor() {
        let mut s = ByteStr::from_bytes(b"abcd");
        let grown = (4 + 4) * 3 / 2 + 1;
        s.append(b"efgh");
        assert!(s.capacity() >= grown.min(s.len() + 1));
        assert_eq!(s.as_bytes(), b"abcdefgh");
    }

    #[test]
    fn reset_reuses_allocation() {
        let mut s = ByteStr::from_bytes(b"a fairly long value");
        let cap = s.capacity();
        s.reset(b"tiny");
        assert_eq!(s.as_bytes(), b"tiny");
        assert_eq!(s.capacity(), cap);
    }

    #[test]
    fn shrink_trims_to_len_plus_one() {
        let mut s = ByteStr::from_bytes(b"0123456789");
        s.reset(b"ab");
        s.shrink();
        assert_eq!(s.capacity(), 3);
        assert_eq!(s.as_bytes(), b"ab");
    }

    #[test]
    fn parse_accepts_only_canonical_decimals() {
        assert_eq!(ByteStr::from("123").parse_i64().unwrap(), 123);
        assert_eq!(ByteStr::from("-9").parse_i64().unwrap(), -9);
        assert_eq!(ByteStr::from("0").parse_i64().unwrap(), 0);
        assert!(matches!(
            ByteStr::from("007").parse_i64(),
            Err(LkvError::NotAnInteger)
        ));
        assert!(matches!(
            ByteStr::from("+7").parse_i64(),
            Err(LkvError::NotAnInteger)
        ));
        assert!(matches!(
            ByteStr::from("12a").parse_i64(),
            Err(LkvError::NotAnInteger)
        ));
        assert!(matches!(
            ByteStr::from("").parse_i64(),
            Err(LkvError::NotAnInteger)
        ));
    }

    #[test]
    fn parse_reports_overflow_distinctly() {
        assert_eq!(
            ByteStr::from("9223372036854775807").parse_i64().unwrap(),
            i64::MAX
        );
        assert!(matches!(
            ByteStr::from("9223372036854775808").parse_i64(),
            Err(LkvError::Overflow)
        ));
        assert!(matches!(
            ByteStr::from("-9223372036854775809").parse_i64(),
            Err(LkvError::Overflow)
        ));
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(ByteStr::from("abc") < ByteStr::from("abd"));
        assert!(ByteStr::from("ab") < ByteStr::from("abc"));
        assert_eq!(ByteStr::from("same"), ByteStr::from("same"));
    }

    #[test]
    fn hash_matches_known_constants() {
        // Time33 over "a": 5381 * 33 + 97.
        assert_eq!(hash33(b"a"), 5381 * 33 + 97);
        assert_eq!(hash33(b""), 5381);
        assert_eq!(ByteStr::from("a").hash(), hash33(b"a"));
    }

    #[test]
    fn binary_content_is_preserved() {
        let data = [0u8, 159, 146, 150, 0];
        let s = ByteStr::from_bytes(&data);
        assert_eq!(s.as_bytes(), &data);
        assert_eq!(s.len(), 5);
    }
}
