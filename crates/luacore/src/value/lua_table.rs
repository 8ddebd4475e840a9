//! `LuaTable`: array+hash hybrid table with metatable (spec.md §3 "Table").

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::lua_string::LuaStr;
use crate::value::lua_value::LuaValue;

/// Key type for the hash part. Integer keys that belong in the dense array
/// part never reach here; float keys exactly equal to an integer are
/// normalized to `Int` before lookup (spec.md §3 table invariant). NaN and
/// nil are rejected by `normalize_key` before a `TableKey` is ever built.
///
/// `Obj` carries an identity pointer for hash/equality purposes only; the
/// actual key `LuaValue` (needed to hand keys back out through `next`) is
/// stored alongside the value in the map entry, not reconstructed from the
/// identity pointer.
#[derive(Clone, PartialEq, Eq, Hash)]
enum TableKey {
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Str(LuaStr),
    Obj(usize),
}

#[derive(Debug)]
pub enum TableKeyError {
    NilKey,
    NanKey,
}

impl std::fmt::Display for TableKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKeyError::NilKey => write!(f, "table index is nil"),
            TableKeyError::NanKey => write!(f, "table index is NaN"),
        }
    }
}

struct Entry {
    key: LuaValue,
    value: LuaValue,
}

struct TableData {
    array: Vec<LuaValue>,
    hash: HashMap<TableKey, Entry, ahash::RandomState>,
    metatable: Option<LuaTable>,
}

#[derive(Clone)]
pub struct LuaTable(Rc<RefCell<TableData>>);

fn normalize_key(key: &LuaValue) -> Result<TableKey, TableKeyError> {
    match key {
        LuaValue::Nil => Err(TableKeyError::NilKey),
        LuaValue::Boolean(b) => Ok(TableKey::Bool(*b)),
        LuaValue::Integer(i) => Ok(TableKey::Int(*i)),
        LuaValue::Float(f) => {
            if f.is_nan() {
                Err(TableKeyError::NanKey)
            } else if *f == f.floor() && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Ok(TableKey::Int(*f as i64))
            } else {
                Ok(TableKey::FloatBits(f.to_bits()))
            }
        }
        LuaValue::Str(s) => Ok(TableKey::Str(s.clone())),
        LuaValue::Table(t) => Ok(TableKey::Obj(t.identity())),
        LuaValue::Function(f) => Ok(TableKey::Obj(f.identity())),
        LuaValue::UserData(u) => Ok(TableKey::Obj(u.identity())),
        LuaValue::Thread(t) => Ok(TableKey::Obj(t.identity())),
    }
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable(Rc::new(RefCell::new(TableData {
            array: Vec::new(),
            hash: HashMap::with_hasher(ahash::RandomState::new()),
            metatable: None,
        })))
    }

    pub fn with_capacity(narr: usize, nhash: usize) -> Self {
        LuaTable(Rc::new(RefCell::new(TableData {
            array: Vec::with_capacity(narr),
            hash: HashMap::with_capacity_and_hasher(nhash, ahash::RandomState::new()),
            metatable: None,
        })))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn metatable(&self) -> Option<LuaTable> {
        self.0.borrow().metatable.clone()
    }

    pub fn set_metatable(&self, mt: Option<LuaTable>) {
        self.0.borrow_mut().metatable = mt;
    }

    pub fn raw_get(&self, key: &LuaValue) -> LuaValue {
        let Ok(tk) = normalize_key(key) else {
            return LuaValue::Nil;
        };
        let data = self.0.borrow();
        if let TableKey::Int(i) = tk {
            if i >= 1 {
                let idx = (i - 1) as usize;
                if idx < data.array.len() {
                    return data.array[idx].clone();
                }
            }
        }
        data.hash.get(&tk).map(|e| e.value.clone()).unwrap_or(LuaValue::Nil)
    }

    pub fn raw_set(&self, key: LuaValue, value: LuaValue) -> Result<(), TableKeyError> {
        let tk = normalize_key(&key)?;
        let mut data = self.0.borrow_mut();
        if let TableKey::Int(i) = tk {
            if i >= 1 {
                let idx = (i - 1) as usize;
                if idx < data.array.len() {
                    data.array[idx] = value;
                    return Ok(());
                }
                if idx == data.array.len() {
                    if matches!(value, LuaValue::Nil) {
                        return Ok(());
                    }
                    data.array.push(value);
                    // Absorb any contiguous successors already sitting in
                    // the hash part (classic array-part migration).
                    loop {
                        let next = data.array.len() as i64 + 1;
                        match data.hash.remove(&TableKey::Int(next)) {
                            Some(e) => data.array.push(e.value),
                            None => break,
                        }
                    }
                    return Ok(());
                }
            }
        }
        if matches!(value, LuaValue::Nil) {
            data.hash.remove(&tk);
        } else {
            data.hash.insert(tk, Entry { key, value });
        }
        Ok(())
    }

    pub fn get_int(&self, i: i64) -> LuaValue {
        self.raw_get(&LuaValue::Integer(i))
    }

    pub fn set_int(&self, i: i64, value: LuaValue) {
        let _ = self.raw_set(LuaValue::Integer(i), value);
    }

    pub fn get_str(&self, key: &LuaStr) -> LuaValue {
        self.raw_get(&LuaValue::Str(key.clone()))
    }

    /// Looks up a field by a plain Rust string, for call sites (metamethod
    /// dispatch) that only have a `&str` key on hand, not an interned
    /// `LuaStr`. Hashes with the same content hash the compiler and
    /// `StringInterner` use, so it finds keys created by either.
    pub fn get_str_name(&self, key: &str) -> LuaValue {
        let hash = crate::value::lua_string::hash_bytes(key.as_bytes());
        self.raw_get(&LuaValue::Str(LuaStr::new(key.as_bytes().to_vec().into_boxed_slice(), hash)))
    }

    /// A border of the table (spec.md §3 / Glossary): any `n` with
    /// `t[n] != nil` and `t[n+1] == nil`.
    pub fn length(&self) -> i64 {
        let data = self.0.borrow();
        let n = data.array.len();
        if n > 0 && matches!(data.array[n - 1], LuaValue::Nil) {
            // binary search for a border inside the array part
            let (mut lo, mut hi) = (0usize, n);
            while hi - lo > 1 {
                let mid = (lo + hi) / 2;
                if matches!(data.array[mid - 1], LuaValue::Nil) {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo as i64;
        }
        if data.hash.is_empty() || !data.hash.contains_key(&TableKey::Int(n as i64 + 1)) {
            return n as i64;
        }
        // unbounded search into the hash part, doubling until a nil is found
        let mut i = n as i64;
        let mut j = n as i64 + 1;
        loop {
            if j > i64::MAX / 2 {
                let mut k = i + 1;
                while data.hash.contains_key(&TableKey::Int(k)) {
                    k += 1;
                }
                return k - 1;
            }
            if data.hash.contains_key(&TableKey::Int(j)) {
                i = j;
                j *= 2;
            } else {
                break;
            }
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if data.hash.contains_key(&TableKey::Int(m)) {
                i = m;
            } else {
                j = m;
            }
        }
        i
    }

    /// Iteration order for `next`/`pairs`: dense array prefix (1-based, only
    /// non-nil slots), followed by hash-part keys. Stable as long as the
    /// table is not structurally mutated between calls, which matches the
    /// Lua contract for `next` (existing fields may be set to nil mid
    /// traversal; new keys must not be added).
    fn ordered_keys(&self) -> Vec<LuaValue> {
        let data = self.0.borrow();
        let mut out = Vec::with_capacity(data.array.len() + data.hash.len());
        for (i, v) in data.array.iter().enumerate() {
            if !matches!(v, LuaValue::Nil) {
                out.push(LuaValue::Integer(i as i64 + 1));
            }
        }
        for e in data.hash.values() {
            out.push(e.key.clone());
        }
        out
    }

    pub fn next(&self, key: &LuaValue) -> Result<Option<(LuaValue, LuaValue)>, TableKeyError> {
        let order = self.ordered_keys();
        let start = if matches!(key, LuaValue::Nil) {
            0
        } else {
            let target = normalize_key(key)?;
            let pos = order
                .iter()
                .position(|k| normalize_key(k).map(|nk| nk == target).unwrap_or(false));
            match pos {
                Some(p) => p + 1,
                None => return Ok(None),
            }
        };
        for k in order.into_iter().skip(start) {
            let v = self.raw_get(&k);
            if !matches!(v, LuaValue::Nil) {
                return Ok(Some((k, v)));
            }
        }
        Ok(None)
    }

    pub fn array_len(&self) -> usize {
        self.0.borrow().array.len()
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}
