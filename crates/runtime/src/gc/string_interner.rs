//! Short-string interning backed by a plain hash map: a
//! `HashMap<SmolStr, StringId>` is enough to guarantee identical strings
//! share one object without chasing an open-addressing performance
//! target this crate does not need.

use smol_str::SmolStr;
use std::collections::HashMap;

use super::StringId;

#[derive(Default)]
pub struct StringInterner {
    table: HashMap<SmolStr, StringId>,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.table.get(s).copied()
    }

    pub fn insert(&mut self, s: SmolStr, id: StringId) {
        self.table.insert(s, id);
    }

    pub fn remove(&mut self, s: &str) {
        self.table.remove(s);
    }
}
