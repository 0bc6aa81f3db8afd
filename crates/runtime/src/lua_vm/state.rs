//! `LuaState` — the public VM handle: stack, call frames, globals table,
//! object pool, and open-upvalue bookkeeping.

use std::path::Path;
use std::rc::Rc;

use crate::compiler::Compiler;
use crate::gc::{FunctionId, GcRoots, ObjectPool, TableId, UpvalueId, UpvalueState};
use crate::lua_value::{LuaValue, Prototype};
use crate::stdlib::LibraryModule;

use super::call_info::{CallInfo, ExpectedResults};
use super::error::{ErrorKind, LuaError, LuaResult};
use super::limits::{DEFAULT_STACK, MAX_CALL_DEPTH};
use super::{dispatch, CFunction};

pub struct LuaState {
    pub(crate) stack: Vec<LuaValue>,
    pub(crate) top: usize,
    pub(crate) call_stack: Vec<CallInfo>,
    pub(crate) globals: TableId,
    pub(crate) pool: ObjectPool,
    /// Open upvalues ordered by descending stack slot, so closing a
    /// suffix is a linear prefix scan.
    pub(crate) open_upvalues: Vec<UpvalueId>,
    pub(crate) chunk_name: Rc<str>,
}

impl LuaState {
    pub fn new() -> Self {
        let mut pool = ObjectPool::new();
        let globals = pool.new_table();
        LuaState {
            stack: vec![LuaValue::Nil; DEFAULT_STACK],
            top: 0,
            call_stack: Vec::new(),
            globals,
            pool,
            open_upvalues: Vec::new(),
            chunk_name: Rc::from("?"),
        }
    }

    /// Registers the minimal stdlib collaborator's global functions.
    pub fn open_libs(&mut self) {
        crate::stdlib::basic::install(self);
    }

    // ---- loading ---------------------------------------------------

    pub fn do_string(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        self.do_named(source, "?")
    }

    pub fn do_file(&mut self, path: &Path) -> LuaResult<Vec<LuaValue>> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| LuaError::runtime(format!("cannot open {}: {}", path.display(), e)))?;
        let name = path.to_string_lossy().into_owned();
        self.do_named(&source, &name)
    }

    /// Compiles `source` without running it, discarding the result. Used
    /// by a REPL to probe whether `return <input>` parses as a bare
    /// expression before falling back to treating it as a statement.
    pub fn compiles(&mut self, source: &str) -> bool {
        Compiler::compile(source, "=(repl)", &mut self.pool).is_ok()
    }

    fn do_named(&mut self, source: &str, name: &str) -> LuaResult<Vec<LuaValue>> {
        self.chunk_name = Rc::from(name);
        let proto = Compiler::compile(source, name, &mut self.pool)?;
        let closure_id = self.make_closure(proto, Vec::new());
        self.push(LuaValue::Function(closure_id));
        self.call(0, -1)?;
        let nret = self.top;
        Ok(self.stack[0..nret].to_vec())
    }

    pub(crate) fn make_closure(&mut self, proto: Rc<Prototype>, upvalues: Vec<UpvalueId>) -> FunctionId {
        self.pool.new_lua_function(proto, upvalues)
    }

    // ---- stack primitives -------------------------------------------

    pub fn push(&mut self, v: LuaValue) {
        if self.top >= self.stack.len() {
            self.stack.resize(self.stack.len() * 2, LuaValue::Nil);
        }
        self.stack[self.top] = v;
        self.top += 1;
    }

    pub fn pop(&mut self) -> LuaValue {
        self.top -= 1;
        std::mem::replace(&mut self.stack[self.top], LuaValue::Nil)
    }

    pub fn peek(&self, index: usize) -> LuaValue {
        self.stack[index]
    }

    pub fn top(&self) -> usize {
        self.top
    }

    /// Stack base of the currently executing call frame — the slot a
    /// host function's own arguments start at.
    pub fn current_base(&self) -> usize {
        self.call_stack.last().map(|ci| ci.base).unwrap_or(0)
    }

    pub fn arg_count(&self) -> usize {
        self.top - self.current_base()
    }

    /// 1-based argument access, matching Lua's own convention; out of
    /// range yields `nil` rather than panicking, since missing arguments
    /// read as nil.
    pub fn arg(&self, n: usize) -> LuaValue {
        if n == 0 {
            return LuaValue::Nil;
        }
        let idx = self.current_base() + n - 1;
        if idx < self.top {
            self.stack[idx]
        } else {
            LuaValue::Nil
        }
    }

    pub fn set_top(&mut self, n: usize) {
        if n > self.stack.len() {
            self.stack.resize(n, LuaValue::Nil);
        }
        for slot in &mut self.stack[self.top.min(n)..n.max(self.top)] {
            if n > self.top {
                *slot = LuaValue::Nil;
            }
        }
        self.top = n;
    }

    pub fn is_nil(&self, index: usize) -> bool {
        self.stack[index].is_nil()
    }

    pub fn is_table(&self, index: usize) -> bool {
        self.stack[index].is_table()
    }

    pub fn is_function(&self, index: usize) -> bool {
        self.stack[index].is_function()
    }

    pub fn to_number(&self, index: usize) -> Option<f64> {
        match self.stack[index] {
            LuaValue::Number(n) => Some(n),
            LuaValue::String(s) => self.pool.get_string(s).trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn to_bool(&self, index: usize) -> bool {
        self.stack[index].is_truthy()
    }

    pub fn to_str(&self, index: usize) -> String {
        self.tostring_value(self.stack[index])
    }

    pub fn tostring_value(&self, v: LuaValue) -> String {
        match v {
            LuaValue::Nil => "nil".to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            LuaValue::Number(n) => format_number(n),
            LuaValue::String(s) => self.pool.get_string(s).to_string(),
            LuaValue::Table(id) => format!("table: 0x{:08x}", id.0),
            LuaValue::Function(id) => format!("function: 0x{:08x}", id.0),
        }
    }

    // ---- globals -----------------------------------------------------

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.intern(name);
        self.pool.get_table(self.globals).get(&key)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.intern(name);
        self.pool.get_table_mut(self.globals).set(key, value);
    }

    pub fn intern(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.pool.intern_string(s))
    }

    // ---- tables --------------------------------------------------------

    pub fn create_table(&mut self) -> LuaValue {
        LuaValue::Table(self.pool.new_table())
    }

    pub fn set_field(&mut self, table: LuaValue, key: &str, value: LuaValue) {
        if let Some(id) = table.as_table() {
            let k = self.intern(key);
            self.pool.get_table_mut(id).set(k, value);
        }
    }

    pub fn get_field(&mut self, table: LuaValue, key: &str) -> LuaValue {
        if let Some(id) = table.as_table() {
            let k = self.intern(key);
            self.pool.get_table(id).get(&k)
        } else {
            LuaValue::Nil
        }
    }

    pub fn set_array(&mut self, table: LuaValue, index: i64, value: LuaValue) {
        if let Some(id) = table.as_table() {
            self.pool
                .get_table_mut(id)
                .set(LuaValue::Number(index as f64), value);
        }
    }

    pub fn get_array(&mut self, table: LuaValue, index: i64) -> LuaValue {
        if let Some(id) = table.as_table() {
            self.pool.get_table(id).get(&LuaValue::Number(index as f64))
        } else {
            LuaValue::Nil
        }
    }

    // ---- registration --------------------------------------------------

    pub fn register_fn(&mut self, name: &str, f: CFunction) {
        let id = self.pool.new_host_function(f);
        self.set_global(name, LuaValue::Function(id));
    }

    pub fn register_lib(&mut self, table_name: &str, module: LibraryModule) {
        let table = self.create_table();
        for (name, f) in module.functions() {
            let id = self.pool.new_host_function(*f);
            self.set_field(table, name, LuaValue::Function(id));
        }
        self.set_global(table_name, table);
    }

    // ---- calling --------------------------------------------------------

    /// `nresults = -1` means "all returned values". Callee
    /// sits at `top - nargs - 1`, arguments above it.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> LuaResult<()> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(LuaError::new(ErrorKind::StackOverflow, "stack overflow"));
        }
        let func_index = self.top - nargs - 1;
        let callee = self.stack[func_index];
        let expected = if nresults < 0 {
            ExpectedResults::All
        } else {
            ExpectedResults::Exact(nresults as usize)
        };
        dispatch::call_value(self, func_index, callee, nargs, expected, false)
    }

    /// Protected call: any `LuaError` raised is caught, the single error
    /// value pushed in place of results.
    pub fn pcall(&mut self, nargs: usize, nresults: i32) -> bool {
        let func_index = self.top - nargs - 1;
        let callee = self.stack[func_index];
        let expected = if nresults < 0 {
            ExpectedResults::All
        } else {
            ExpectedResults::Exact(nresults as usize)
        };
        let saved_depth = self.call_stack.len();
        match dispatch::call_value(self, func_index, callee, nargs, expected, true) {
            Ok(()) => true,
            Err(e) => {
                self.call_stack.truncate(saved_depth);
                self.top = func_index;
                let msg = self.intern(&e.to_string());
                self.push(msg);
                false
            }
        }
    }

    pub fn error(&mut self, message: &str, line: u32) -> LuaError {
        LuaError::runtime(message.to_string()).at(&self.chunk_name, line)
    }

    // ---- GC --------------------------------------------------------------

    pub fn maybe_collect(&mut self) {
        if self.pool.should_collect() {
            self.collect();
        }
    }

    pub fn collect(&mut self) {
        let frame_closures: Vec<FunctionId> =
            self.call_stack.iter().map(|ci| ci.closure).collect();
        let roots = GcRoots {
            stack: &self.stack[0..self.top],
            globals: self.globals,
            frame_closures: &frame_closures,
            open_upvalues: &self.open_upvalues,
        };
        self.pool.collect(roots);
    }

    // ---- upvalues ----------------------------------------------------

    /// Finds or creates an open upvalue over stack slot `index`. Linear
    /// scan is fine: the list length is bounded by live local variable
    /// capture, never large in practice.
    pub(crate) fn find_or_create_upvalue(&mut self, index: usize) -> UpvalueId {
        for &id in &self.open_upvalues {
            if let UpvalueState::Open(slot) = self.pool.get_upvalue(id).state {
                if slot == index {
                    return id;
                }
            }
        }
        let id = self.pool.new_open_upvalue(index);
        self.open_upvalues.push(id);
        self.open_upvalues.sort_by(|a, b| {
            let sa = match self.pool.get_upvalue(*a).state {
                UpvalueState::Open(s) => s,
                _ => 0,
            };
            let sb = match self.pool.get_upvalue(*b).state {
                UpvalueState::Open(s) => s,
                _ => 0,
            };
            sb.cmp(&sa)
        });
        id
    }

    /// Closes every open upvalue whose stack slot is `>= from`.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        let mut remaining = Vec::with_capacity(self.open_upvalues.len());
        for id in self.open_upvalues.drain(..) {
            let slot = match self.pool.get_upvalue(id).state {
                UpvalueState::Open(s) => Some(s),
                UpvalueState::Closed(_) => None,
            };
            match slot {
                Some(s) if s >= from => {
                    let value = self.stack[s];
                    self.pool.get_upvalue_mut(id).state = UpvalueState::Closed(value);
                }
                _ => remaining.push(id),
            }
        }
        self.open_upvalues = remaining;
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

/// `%.14g`-with-integral-printed-without-a-point formatting. `itoa`
/// handles the integral fast path; everything else falls back to Rust's
/// own shortest round-tripping float formatter, which agrees with
/// `%.14g` for ordinary test inputs.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        buf.format(n as i64).to_string()
    } else if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        }
    } else {
        format!("{}", n)
    }
}
