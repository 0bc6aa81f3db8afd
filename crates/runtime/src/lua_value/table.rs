//! Hybrid array+hash table: a dense `Vec` for the contiguous positive-integer
//! region and an `ahash`-keyed map for everything else.

use crate::gc::TableId;
use crate::lua_value::LuaValue;
use std::collections::HashMap;

pub struct LuaTable {
    array: Vec<LuaValue>,
    hash: HashMap<LuaValue, LuaValue, ahash::RandomState>,
    metatable: Option<TableId>,
}

impl LuaTable {
    pub fn new() -> Self {
        LuaTable {
            array: Vec::new(),
            hash: HashMap::with_hasher(ahash::RandomState::new()),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<TableId> {
        self.metatable
    }

    pub fn set_metatable(&mut self, mt: Option<TableId>) {
        self.metatable = mt;
    }

    /// `t[key]` raw read (no metamethods). Integer-valued float keys in
    /// `1..=array.len()` are served from the array part.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        if let Some(i) = array_index(key) {
            if i >= 1 && i as usize <= self.array.len() {
                return self.array[i as usize - 1];
            }
        }
        self.hash.get(key).copied().unwrap_or(LuaValue::Nil)
    }

    /// `t[key] = value` raw write. Storing `nil` deletes;
    /// `NaN` as a key is rejected by the caller before reaching here.
    pub fn set(&mut self, key: LuaValue, value: LuaValue) {
        if let Some(i) = array_index(&key) {
            if i >= 1 {
                let idx = i as usize - 1;
                if idx < self.array.len() {
                    if value.is_nil() && idx == self.array.len() - 1 {
                        self.array.pop();
                        // Popping may strand a nil-terminated suffix that
                        // was already nil; trim it back to the boundary.
                        while matches!(self.array.last(), Some(LuaValue::Nil)) {
                            self.array.pop();
                        }
                    } else {
                        self.array[idx] = value;
                    }
                    return;
                } else if idx == self.array.len() && !value.is_nil() {
                    self.array.push(value);
                    self.migrate_from_hash();
                    return;
                }
            }
        }
        if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
    }

    /// After an array-part append, pull any now-contiguous integer keys
    /// out of the hash part into the array.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            let key = LuaValue::Number(next as f64);
            match self.hash.remove(&key) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// A boundary `n` such that `t[n]` is non-nil and `t[n+1]` is nil.
    /// The array part's own length is always such a
    /// boundary when its tail isn't nil-padded, which `set` maintains.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    /// Snapshot of every live (key, value) pair, array part first. Used
    /// by the collector for tracing and by `next`/`pairs` iteration;
    /// cloning keeps the borrow checker out of the GC's way since the
    /// marking pass mutates object headers while visiting this.
    pub fn iter_all(&self) -> Vec<(LuaValue, LuaValue)> {
        let mut out = Vec::with_capacity(self.array.len() + self.hash.len());
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                out.push((LuaValue::Number((i + 1) as f64), *v));
            }
        }
        for (k, v) in self.hash.iter() {
            out.push((*k, *v));
        }
        out
    }

    /// Stateless `next(table, key)` support: find `key` in the snapshot
    /// ordering and return the following pair, or the first pair when
    /// `key` is nil.
    pub fn next(&self, key: &LuaValue) -> Option<(LuaValue, LuaValue)> {
        let all = self.iter_all();
        if key.is_nil() {
            return all.into_iter().next();
        }
        let pos = all.iter().position(|(k, _)| k.raw_equal(key))?;
        all.into_iter().nth(pos + 1)
    }
}

impl Default for LuaTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the 1-based array index a key denotes, if it is an
/// integer-valued number.
fn array_index(key: &LuaValue) -> Option<i64> {
    match key {
        LuaValue::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
        _ => None,
    }
}
