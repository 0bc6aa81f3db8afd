//! Garbage collector — stop-the-world tri-color mark-sweep.
//!
//! Objects are never behind `Rc`/pointers; they live in typed [`Arena`]s
//! and are referenced by small `u32` ids embedded directly in
//! [`crate::LuaValue`]. There is a single atomic mark-then-sweep cycle
//! only — no incremental or generational collection modes.

mod arena;
mod string_interner;

use std::rc::Rc;

pub use arena::{Arena, GcHeader};
use string_interner::StringInterner;

use crate::lua_value::{LuaString, LuaTable, LuaValue, Prototype};
use crate::lua_vm::CFunction;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StringId(pub u32);
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TableId(pub u32);
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FunctionId(pub u32);
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct UpvalueId(pub u32);

pub struct GcString {
    pub header: GcHeader,
    pub data: LuaString,
}

pub struct GcTable {
    pub header: GcHeader,
    pub data: LuaTable,
}

/// A closure is a [`Prototype`] (shared, since sibling closures from the
/// same `CLOSURE` site reuse it) paired with its own upvalue vector. A
/// host function carries no prototype at all — it is a bare fn pointer.
pub enum FunctionKind {
    Lua {
        proto: Rc<Prototype>,
        upvalues: Vec<UpvalueId>,
    },
    Host(CFunction),
}

pub struct GcFunction {
    pub header: GcHeader,
    pub kind: FunctionKind,
}

#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(LuaValue),
}

pub struct GcUpvalue {
    pub header: GcHeader,
    pub state: UpvalueState,
}

/// Collection-time view of everything outside the heap that can hold a
/// live reference.
pub struct GcRoots<'a> {
    pub stack: &'a [LuaValue],
    pub globals: TableId,
    pub frame_closures: &'a [FunctionId],
    pub open_upvalues: &'a [UpvalueId],
}

const GC_THRESHOLD: usize = 1 << 20; // bytes-since-last-collection trigger
const MIN_THRESHOLD: usize = GC_THRESHOLD;
const GC_PAUSE_MULTIPLIER: usize = 2;

pub struct ObjectPool {
    pub strings: Arena<GcString>,
    pub tables: Arena<GcTable>,
    pub functions: Arena<GcFunction>,
    pub upvalues: Arena<GcUpvalue>,
    interner: StringInterner,
    bytes_since_collect: usize,
    threshold: usize,
    collections_run: usize,
}

impl ObjectPool {
    pub fn new() -> Self {
        ObjectPool {
            strings: Arena::new(),
            tables: Arena::new(),
            functions: Arena::new(),
            upvalues: Arena::new(),
            interner: StringInterner::new(),
            bytes_since_collect: 0,
            threshold: GC_THRESHOLD,
            collections_run: 0,
        }
    }

    // ---- allocation ----------------------------------------------------

    /// Interns `s`: an existing string with the same content is reused,
    /// so identical strings always share one object.
    pub fn intern_string(&mut self, s: &str) -> StringId {
        if let Some(id) = self.interner.lookup(s) {
            return id;
        }
        let data = LuaString::new(s);
        self.bytes_since_collect += s.len() + 24;
        let id = StringId(self.strings.alloc(GcString {
            header: GcHeader::default(),
            data,
        }));
        self.interner.insert(smol_str::SmolStr::new(s), id);
        id
    }

    pub fn new_table(&mut self) -> TableId {
        self.bytes_since_collect += 64;
        TableId(self.tables.alloc(GcTable {
            header: GcHeader::default(),
            data: LuaTable::new(),
        }))
    }

    pub fn new_lua_function(&mut self, proto: Rc<Prototype>, upvalues: Vec<UpvalueId>) -> FunctionId {
        self.bytes_since_collect += 48;
        FunctionId(self.functions.alloc(GcFunction {
            header: GcHeader::default(),
            kind: FunctionKind::Lua { proto, upvalues },
        }))
    }

    pub fn new_host_function(&mut self, f: CFunction) -> FunctionId {
        self.bytes_since_collect += 16;
        FunctionId(self.functions.alloc(GcFunction {
            header: GcHeader::default(),
            kind: FunctionKind::Host(f),
        }))
    }

    pub fn new_open_upvalue(&mut self, stack_index: usize) -> UpvalueId {
        self.bytes_since_collect += 24;
        UpvalueId(self.upvalues.alloc(GcUpvalue {
            header: GcHeader::default(),
            state: UpvalueState::Open(stack_index),
        }))
    }

    // ---- accessors -------------------------------------------------

    pub fn get_string(&self, id: StringId) -> &str {
        self.strings.get(id.0).data.as_str()
    }

    pub fn get_table(&self, id: TableId) -> &LuaTable {
        &self.tables.get(id.0).data
    }

    pub fn get_table_mut(&mut self, id: TableId) -> &mut LuaTable {
        &mut self.tables.get_mut(id.0).data
    }

    pub fn get_function(&self, id: FunctionId) -> &FunctionKind {
        &self.functions.get(id.0).kind
    }

    pub fn get_upvalue(&self, id: UpvalueId) -> &GcUpvalue {
        self.upvalues.get(id.0)
    }

    pub fn get_upvalue_mut(&mut self, id: UpvalueId) -> &mut GcUpvalue {
        self.upvalues.get_mut(id.0)
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_since_collect >= self.threshold
    }

    pub fn collections_run(&self) -> usize {
        self.collections_run
    }

    // ---- mark-sweep ------------------------------------------------

    /// Runs one full, atomic mark-sweep cycle: clear marks, trace from
    /// roots, sweep everything left unmarked.
    pub fn collect(&mut self, roots: GcRoots<'_>) {
        self.collections_run += 1;
        self.clear_marks();

        let mut gray_tables: Vec<TableId> = Vec::new();
        let mut gray_functions: Vec<FunctionId> = Vec::new();
        let mut gray_upvalues: Vec<UpvalueId> = Vec::new();

        self.mark_table(roots.globals, &mut gray_tables);
        for v in roots.stack {
            self.mark_value(v, &mut gray_tables, &mut gray_functions, &mut gray_upvalues);
        }
        for &f in roots.frame_closures {
            self.mark_function(f, &mut gray_tables, &mut gray_functions, &mut gray_upvalues);
        }
        for &u in roots.open_upvalues {
            self.mark_upvalue(u, &mut gray_tables, &mut gray_functions, &mut gray_upvalues);
        }

        while !gray_tables.is_empty() || !gray_functions.is_empty() || !gray_upvalues.is_empty() {
            while let Some(id) = gray_tables.pop() {
                self.trace_table(id, &mut gray_tables, &mut gray_functions, &mut gray_upvalues);
            }
            while let Some(id) = gray_functions.pop() {
                self.trace_function(id, &mut gray_tables, &mut gray_functions, &mut gray_upvalues);
            }
            while let Some(id) = gray_upvalues.pop() {
                self.trace_upvalue(id, &mut gray_tables, &mut gray_functions, &mut gray_upvalues);
            }
        }

        self.sweep();

        let alive_bytes = (self.strings.len() + self.tables.len() + self.functions.len() + self.upvalues.len()) * 48;
        self.threshold = (alive_bytes * GC_PAUSE_MULTIPLIER).max(MIN_THRESHOLD);
        self.bytes_since_collect = 0;
    }

    fn clear_marks(&mut self) {
        for (_, s) in self.strings.iter_mut() {
            s.header.marked = false;
        }
        for (_, t) in self.tables.iter_mut() {
            t.header.marked = false;
        }
        for (_, f) in self.functions.iter_mut() {
            f.header.marked = false;
        }
        for (_, u) in self.upvalues.iter_mut() {
            u.header.marked = false;
        }
    }

    fn mark_value(
        &mut self,
        v: &LuaValue,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        match *v {
            LuaValue::String(id) => self.mark_string(id),
            LuaValue::Table(id) => self.mark_table(id, gt),
            LuaValue::Function(id) => self.mark_function(id, gt, gf, gu),
            _ => {}
        }
    }

    fn mark_string(&mut self, id: StringId) {
        self.strings.get_mut(id.0).header.marked = true;
    }

    fn mark_table(&mut self, id: TableId, gt: &mut Vec<TableId>) {
        let header = &mut self.tables.get_mut(id.0).header;
        if !header.marked {
            header.marked = true;
            gt.push(id);
        }
    }

    fn mark_function(
        &mut self,
        id: FunctionId,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        let header = &mut self.functions.get_mut(id.0).header;
        if !header.marked {
            header.marked = true;
            gf.push(id);
        }
        let _ = (gt, gu);
    }

    fn mark_upvalue(
        &mut self,
        id: UpvalueId,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        let header = &mut self.upvalues.get_mut(id.0).header;
        if !header.marked {
            header.marked = true;
            gu.push(id);
        }
        let _ = (gt, gf);
    }

    fn trace_table(
        &mut self,
        id: TableId,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        let entries: Vec<(LuaValue, LuaValue)> = {
            let table = &self.tables.get(id.0).data;
            table.iter_all()
        };
        let meta = self.tables.get(id.0).data.metatable();
        for (k, v) in entries {
            self.mark_value(&k, gt, gf, gu);
            self.mark_value(&v, gt, gf, gu);
        }
        if let Some(mt) = meta {
            self.mark_table(mt, gt);
        }
    }

    fn trace_function(
        &mut self,
        id: FunctionId,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        let (proto, upvalues) = match &self.functions.get(id.0).kind {
            FunctionKind::Lua { proto, upvalues } => (proto.clone(), upvalues.clone()),
            FunctionKind::Host(_) => return,
        };
        self.trace_prototype(&proto, gt, gf, gu);
        for u in upvalues {
            self.mark_upvalue(u, gt, gf, gu);
        }
    }

    /// Marks a prototype's own constant pool, then recurses into every
    /// child prototype. A child's constants are reachable the moment its
    /// enclosing prototype is, even before the `CLOSURE` instruction that
    /// would instantiate it ever runs — skipping this let a nested
    /// function's only-used-there string constant get swept out from
    /// under it.
    fn trace_prototype(
        &mut self,
        proto: &Prototype,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        let constants = proto.constants.clone();
        for k in &constants {
            self.mark_value(k, gt, gf, gu);
        }
        for child in &proto.child_protos {
            self.trace_prototype(child, gt, gf, gu);
        }
    }

    fn trace_upvalue(
        &mut self,
        id: UpvalueId,
        gt: &mut Vec<TableId>,
        gf: &mut Vec<FunctionId>,
        gu: &mut Vec<UpvalueId>,
    ) {
        if let UpvalueState::Closed(v) = self.upvalues.get(id.0).state {
            self.mark_value(&v, gt, gf, gu);
        }
    }

    fn sweep(&mut self) {
        let dead_strings: Vec<u32> = self
            .strings
            .iter()
            .filter(|(_, s)| !s.header.marked)
            .map(|(id, _)| id)
            .collect();
        for id in dead_strings {
            let content = self.strings.get(id).data.as_str().to_string();
            self.interner.remove(&content);
            self.strings.free(id);
        }

        let dead: Vec<u32> = self.tables.iter().filter(|(_, t)| !t.header.marked).map(|(id, _)| id).collect();
        for id in dead {
            self.tables.free(id);
        }
        let dead: Vec<u32> = self
            .functions
            .iter()
            .filter(|(_, f)| !f.header.marked)
            .map(|(id, _)| id)
            .collect();
        for id in dead {
            self.functions.free(id);
        }
        let dead: Vec<u32> = self
            .upvalues
            .iter()
            .filter(|(_, u)| !u.header.marked)
            .map(|(id, _)| id)
            .collect();
        for id in dead {
            self.upvalues.free(id);
        }
    }
}

impl Default for ObjectPool {
    fn default() -> Self {
        Self::new()
    }
}
