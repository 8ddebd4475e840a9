//! `LuaStr`: immutable, byte-oriented, content-hashed strings
//! (spec.md §3 "String", §4.4).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

struct Inner {
    bytes: Box<[u8]>,
    hash: u64,
}

/// A Lua string value. Cloning is an `Rc` bump, not a copy; equality is by
/// content (cached hash compared first as a fast-reject), matching
/// spec.md §3: "equality is by content; hash is cached".
#[derive(Clone)]
pub struct LuaStr(Rc<Inner>);

impl LuaStr {
    pub fn new(bytes: impl Into<Box<[u8]>>, hash: u64) -> Self {
        LuaStr(Rc::new(Inner { bytes: bytes.into(), hash }))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0.bytes
    }

    pub fn len(&self) -> usize {
        self.0.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.bytes.is_empty()
    }

    pub fn cached_hash(&self) -> u64 {
        self.0.hash
    }

    /// Lossy UTF-8 view, used for everything that renders a string for a
    /// human (errors, `print`, `tostring`) — strings are not required to be
    /// valid UTF-8 (spec.md §3), but nearly all Lua source in practice is.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0.bytes)
    }

    /// Only when the bytes are known/assumed valid UTF-8 (identifiers,
    /// library-internal keys).
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0.bytes).ok()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for LuaStr {
    fn eq(&self, other: &Self) -> bool {
        self.0.hash == other.0.hash && self.0.bytes == other.0.bytes
    }
}
impl Eq for LuaStr {}

impl Hash for LuaStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_str_lossy())
    }
}

impl fmt::Display for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str_lossy())
    }
}

/// Interns short strings (content-deduplicated, `Rc`-shared) the way the
/// teacher's `crates/luars/src/gc/string_interner.rs` does, simplified from
/// a mark-sweep GC interner to a plain `HashMap` keyed by content hash: a
/// string that is no longer referenced anywhere is dropped along with its
/// last `Rc`, and the map entry is pruned lazily the next time that hash
/// bucket is probed.
pub struct StringInterner {
    map: std::collections::HashMap<u64, Vec<LuaStr>, ahash::RandomState>,
    short_limit: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            map: std::collections::HashMap::with_hasher(ahash::RandomState::new()),
            short_limit: 40,
        }
    }

    /// Content hash, shared with the compiler's constant-pool strings
    /// (`compiler::hash_bytes`) so a string built at compile time and one
    /// built by this interner at run time hash and compare equal.
    pub fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        hash_bytes(bytes)
    }

    pub fn intern(&mut self, bytes: &[u8]) -> LuaStr {
        let hash = self.hash_bytes(bytes);
        if bytes.len() > self.short_limit {
            return LuaStr::new(bytes.to_vec().into_boxed_slice(), hash);
        }
        let bucket = self.map.entry(hash).or_default();
        bucket.retain(|s| Rc::strong_count(&s.0) > 1);
        for existing in bucket.iter() {
            if existing.as_bytes() == bytes {
                return existing.clone();
            }
        }
        let s = LuaStr::new(bytes.to_vec().into_boxed_slice(), hash);
        bucket.push(s.clone());
        s
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash for a byte string, independent of any interner instance —
/// used wherever a `LuaStr` is built outside the VM's own interner (error
/// messages, `string.format` results).
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    use std::hash::Hasher;
    let mut h = std::collections::hash_map::DefaultHasher::new();
    h.write(bytes);
    h.finish()
}
