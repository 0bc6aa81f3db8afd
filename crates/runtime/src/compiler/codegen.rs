//! Scope/upvalue analysis and bytecode emission: tracks `scope_depth`,
//! `freereg`, `nactvar`, a loop-context stack, and child prototypes while
//! walking the AST, targeting the Lua 5.1 opcode set in
//! `crate::lua_vm::opcode`.

use std::rc::Rc;

use crate::gc::ObjectPool;
use crate::lua_value::{LuaValue, Prototype, UpvalueDesc};
use crate::lua_vm::error::{ErrorKind, LuaError};
use crate::lua_vm::opcode::{encode_rk_const, Instruction, OpCode};

use super::ast::*;

struct Local {
    name: String,
    depth: u32,
    register: u32,
}

struct UpvalEntry {
    name: String,
    is_local: bool,
    index: u32,
}

/// One loop's break-patch bookkeeping: a `break` registers its jump in
/// the enclosing loop's break-patch list, patched once the loop's end
/// label is known.
struct LoopCtx {
    break_jumps: Vec<usize>,
}

/// Per-function-body compilation state; one lives on `Compiler::stack`
/// for every nested function currently being compiled, innermost last.
struct FuncState {
    code: Vec<Instruction>,
    line_info: Vec<u32>,
    constants: Vec<LuaValue>,
    child_protos: Vec<Rc<Prototype>>,
    locals: Vec<Local>,
    scope_depth: u32,
    free_reg: u32,
    max_stack: u32,
    upvalues: Vec<UpvalEntry>,
    loop_stack: Vec<LoopCtx>,
    captured_regs: Vec<u32>,
    is_vararg: bool,
    num_params: u8,
}

impl FuncState {
    fn new(is_vararg: bool) -> Self {
        FuncState {
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            child_protos: Vec::new(),
            locals: Vec::new(),
            scope_depth: 0,
            free_reg: 0,
            max_stack: 0,
            upvalues: Vec::new(),
            loop_stack: Vec::new(),
            captured_regs: Vec::new(),
            is_vararg,
            num_params: 0,
        }
    }

    fn emit(&mut self, instr: Instruction, line: u32) -> usize {
        self.code.push(instr);
        self.line_info.push(line);
        self.code.len() - 1
    }

    fn reserve(&mut self, n: u32) -> u32 {
        let base = self.free_reg;
        self.free_reg += n;
        self.max_stack = self.max_stack.max(self.free_reg);
        base
    }

    fn free_to(&mut self, reg: u32) {
        self.free_reg = reg;
    }

    fn declare_local(&mut self, name: &str) -> u32 {
        let reg = self.reserve(1);
        self.locals.push(Local {
            name: name.to_string(),
            depth: self.scope_depth,
            register: reg,
        });
        reg
    }

    fn resolve_local(&self, name: &str) -> Option<u32> {
        self.locals.iter().rev().find(|l| l.name == name).map(|l| l.register)
    }

    fn resolve_upvalue(&self, name: &str) -> Option<u32> {
        self.upvalues.iter().position(|u| u.name == name).map(|i| i as u32)
    }

    fn add_upvalue(&mut self, name: &str, is_local: bool, index: u32) -> u32 {
        if let Some(i) = self.resolve_upvalue(name) {
            return i;
        }
        self.upvalues.push(UpvalEntry {
            name: name.to_string(),
            is_local,
            index,
        });
        (self.upvalues.len() - 1) as u32
    }

    fn add_constant(&mut self, v: LuaValue) -> u32 {
        if let Some(i) = self.constants.iter().position(|k| k.raw_equal(&v)) {
            return i as u32;
        }
        self.constants.push(v);
        (self.constants.len() - 1) as u32
    }

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    /// Records that a nested function captured the local at `register` as
    /// an upvalue, so the enclosing scope knows to close it on exit.
    fn mark_captured(&mut self, register: u32) {
        self.captured_regs.push(register);
    }

    /// Reports (and clears) whether any local at or above `floor` was
    /// captured since the last check. Callers emit `OpCode::Close`
    /// targeting `floor` only when this returns true.
    fn needs_close(&mut self, floor: u32) -> bool {
        let found = self.captured_regs.iter().any(|&r| r >= floor);
        self.captured_regs.retain(|&r| r < floor);
        found
    }

    fn end_scope(&mut self) {
        let depth = self.scope_depth;
        let keep = self
            .locals
            .iter()
            .rposition(|l| l.depth < depth)
            .map(|i| i + 1)
            .unwrap_or(0);
        let freed_from = self.locals.get(keep).map(|l| l.register);
        self.locals.truncate(keep);
        if let Some(reg) = freed_from {
            if self.needs_close(reg) {
                self.emit(Instruction::abc(OpCode::Close, reg, 0, 0), 0);
            }
            self.free_to(reg);
        }
        self.scope_depth -= 1;
    }
}

enum NameRef {
    Local(u32),
    Upvalue(u32),
    Global,
}

fn resolve_name(stack: &mut [FuncState], level: usize, name: &str) -> NameRef {
    if let Some(slot) = stack[level].resolve_local(name) {
        return NameRef::Local(slot);
    }
    if let Some(idx) = stack[level].resolve_upvalue(name) {
        return NameRef::Upvalue(idx);
    }
    if level == 0 {
        return NameRef::Global;
    }
    match resolve_name(stack, level - 1, name) {
        NameRef::Local(slot) => {
            stack[level - 1].mark_captured(slot);
            NameRef::Upvalue(stack[level].add_upvalue(name, true, slot))
        }
        NameRef::Upvalue(pidx) => NameRef::Upvalue(stack[level].add_upvalue(name, false, pidx)),
        NameRef::Global => NameRef::Global,
    }
}

pub struct Codegen<'p> {
    stack: Vec<FuncState>,
    source_name: Rc<str>,
    errors: Vec<LuaError>,
    pool: &'p mut ObjectPool,
}

const MAX_UPVALUES: usize = crate::lua_vm::limits::MAX_UPVALUES_PER_CLOSURE;
const MAX_NESTING: usize = crate::lua_vm::limits::MAX_FUNCTION_NESTING_DEPTH;
const MAX_LOCALS: usize = crate::lua_vm::limits::MAX_LOCALS;

impl<'p> Codegen<'p> {
    pub fn new(source_name: &str, pool: &'p mut ObjectPool) -> Self {
        Codegen {
            stack: Vec::new(),
            source_name: Rc::from(source_name),
            errors: Vec::new(),
            pool,
        }
    }

    /// Interns `s` into the shared string table and records it as a
    /// constant of the function currently being compiled, returning its
    /// constant-pool index.
    fn add_string_constant(&mut self, s: &str) -> u32 {
        let id = self.pool.intern_string(s);
        self.cur().add_constant(LuaValue::String(id))
    }

    fn cur(&mut self) -> &mut FuncState {
        self.stack.last_mut().expect("no active function")
    }

    fn level(&self) -> usize {
        self.stack.len() - 1
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.errors
            .push(LuaError::new(ErrorKind::Compile, message.into()).at(&self.source_name, line));
    }

    /// Compiles the top-level chunk (an implicit vararg main function)
    /// into its `Prototype`.
    pub fn compile_chunk(mut self, block: &Block) -> Result<Rc<Prototype>, Vec<LuaError>> {
        self.stack.push(FuncState::new(true));
        self.compile_block(block);
        let last_line = block_last_line(block);
        self.cur().emit(Instruction::abc(OpCode::Return, 0, 1, 0), last_line);
        let proto = self.finish_function();
        if self.errors.is_empty() {
            Ok(proto)
        } else {
            Err(self.errors)
        }
    }

    fn finish_function(&mut self) -> Rc<Prototype> {
        let fs = self.stack.pop().expect("finish_function on empty stack");
        Rc::new(Prototype {
            code: fs.code,
            constants: fs.constants,
            child_protos: fs.child_protos,
            upvalues: fs
                .upvalues
                .iter()
                .map(|u| UpvalueDesc {
                    is_local: u.is_local,
                    index: u.index,
                })
                .collect(),
            num_params: fs.num_params,
            is_vararg: fs.is_vararg,
            max_stack_size: fs.max_stack.max(2) as u8,
            source_name: Rc::clone(&self.source_name),
            line_info: fs.line_info,
        })
    }

    fn compile_function_body(&mut self, body: &FunctionBody) -> u32 {
        if self.stack.len() >= MAX_NESTING {
            self.error(body.line, "function nesting too deep");
        }
        let mut fs = FuncState::new(body.is_vararg);
        fs.num_params = body.params.len() as u8;
        self.stack.push(fs);
        self.cur().begin_scope();
        for p in &body.params {
            if self.cur().locals.len() >= MAX_LOCALS {
                self.error(body.line, "too many locals");
            }
            self.cur().declare_local(p);
        }
        self.compile_block(&body.body);
        let last_line = block_last_line(&body.body);
        self.cur().emit(Instruction::abc(OpCode::Return, 0, 1, 0), last_line);
        self.cur().end_scope();
        let proto = self.finish_function();
        if self.stack.last().unwrap().upvalues.len() > MAX_UPVALUES {
            self.error(body.line, "too many upvalues");
        }
        let bx = self.cur().child_protos.len() as u32;
        self.cur().child_protos.push(proto);
        bx
    }

    fn compile_block(&mut self, block: &Block) {
        self.cur().begin_scope();
        for stmt in block {
            self.compile_stmt(stmt);
        }
        self.cur().end_scope();
    }

    // ---- statements --------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Local(names, exprs) => self.compile_local(names, exprs),
            Stmt::Assign(targets, values) => self.compile_assign(targets, values),
            Stmt::ExprStat(e) => {
                let save = self.cur().free_reg;
                self.compile_expr_any(e, 1);
                self.cur().free_to(save);
            }
            Stmt::Do(b) => self.compile_block(b),
            Stmt::While(cond, body) => self.compile_while(cond, body),
            Stmt::Repeat(body, cond) => self.compile_repeat(body, cond),
            Stmt::If(cond, then_b, else_b) => self.compile_if(cond, then_b, else_b.as_ref()),
            Stmt::NumericFor { var, start, stop, step, body } => {
                self.compile_numeric_for(var, start, stop, step.as_ref(), body)
            }
            Stmt::GenericFor { names, exprs, body } => self.compile_generic_for(names, exprs, body),
            Stmt::FunctionDecl { target, body } => self.compile_function_decl(target, body),
            Stmt::LocalFunction { name, body } => self.compile_local_function(name, body),
            Stmt::Return(exprs) => self.compile_return(exprs),
            Stmt::Break => self.compile_break(),
        }
    }

    fn compile_local(&mut self, names: &[String], exprs: &[Expr]) {
        let save = self.cur().free_reg;
        let regs = self.compile_expr_list_to_n(exprs, names.len(), save);
        let _ = regs;
        if self.cur().locals.len() + names.len() > MAX_LOCALS {
            self.error(0, "too many locals");
        }
        for name in names {
            self.cur().declare_local(name);
        }
    }

    fn compile_assign(&mut self, targets: &[Expr], values: &[Expr]) {
        let save = self.cur().free_reg;
        let value_regs = self.compile_expr_list_to_n(values, targets.len(), save);
        for (target, &reg) in targets.iter().zip(value_regs.iter()) {
            self.store_to_target(target, reg);
        }
        self.cur().free_to(save);
    }

    fn store_to_target(&mut self, target: &Expr, value_reg: u32) {
        match target {
            Expr::Name(name) => {
                let level = self.level();
                match resolve_name(&mut self.stack, level, name) {
                NameRef::Local(slot) => {
                    let line = 0;
                    self.cur().emit(Instruction::abc(OpCode::Move, slot, value_reg, 0), line);
                }
                NameRef::Upvalue(idx) => {
                    self.cur().emit(Instruction::abc(OpCode::SetUpval, value_reg, idx, 0), 0);
                }
                NameRef::Global => {
                    self.emit_set_global(name, value_reg);
                }
                }
            }
            Expr::Field(obj, field) => {
                let save = self.cur().free_reg;
                let obj_reg = self.compile_expr_to_temp(obj);
                let key_const = self.add_string_constant(field);
                self.cur()
                    .emit(Instruction::abc(OpCode::SetTable, obj_reg, encode_rk_const(key_const), value_reg), 0);
                self.cur().free_to(save);
            }
            Expr::Index(obj, key) => {
                let save = self.cur().free_reg;
                let obj_reg = self.compile_expr_to_temp(obj);
                let key_reg = self.compile_expr_to_temp(key);
                self.cur()
                    .emit(Instruction::abc(OpCode::SetTable, obj_reg, key_reg, value_reg), 0);
                self.cur().free_to(save);
            }
            _ => self.error(0, "invalid assignment target"),
        }
    }

    fn emit_set_global(&mut self, name: &str, value_reg: u32) {
        let k = self.add_string_constant(name);
        self.cur().emit(Instruction::abx(OpCode::SetGlobal, value_reg, k), 0);
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block) {
        let top = self.cur().code.len();
        let cond_reg = self.compile_expr_to_temp(cond);
        let test_pc = self.cur().emit(Instruction::abc(OpCode::Test, cond_reg, 0, 0), 0);
        self.cur().free_to(cond_reg);
        let jmp_exit = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
        self.cur().loop_stack.push(LoopCtx { break_jumps: Vec::new() });
        self.compile_block(body);
        let back = self.cur().code.len();
        self.emit_jmp_to(back, top);
        let end = self.cur().code.len();
        self.patch_jmp(jmp_exit, end);
        let _ = test_pc;
        self.close_loop(end);
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr) {
        let top = self.cur().code.len();
        self.cur().loop_stack.push(LoopCtx { break_jumps: Vec::new() });
        // `repeat`'s condition can see locals declared in the body, so the
        // body's scope is kept open across the condition.
        self.cur().begin_scope();
        let body_base = self.cur().free_reg;
        for stmt in body {
            self.compile_stmt(stmt);
        }
        let cond_reg = self.compile_expr_to_temp(cond);
        self.cur().emit(Instruction::abc(OpCode::Test, cond_reg, 0, 0), 0);
        self.cur().free_to(cond_reg);
        if self.cur().needs_close(body_base) {
            self.cur().emit(Instruction::abc(OpCode::Close, body_base, 0, 0), 0);
        }
        let back_jmp = self.cur().code.len();
        self.emit_jmp_to(back_jmp, top);
        self.cur().end_scope();
        let end = self.cur().code.len();
        self.close_loop(end);
    }

    fn compile_if(&mut self, cond: &Expr, then_b: &Block, else_b: Option<&Block>) {
        let cond_reg = self.compile_expr_to_temp(cond);
        self.cur().emit(Instruction::abc(OpCode::Test, cond_reg, 0, 0), 0);
        self.cur().free_to(cond_reg);
        let jmp_else = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
        self.compile_block(then_b);
        if let Some(else_b) = else_b {
            let jmp_end = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
            let else_start = self.cur().code.len();
            self.patch_jmp(jmp_else, else_start);
            self.compile_block(else_b);
            let end = self.cur().code.len();
            self.patch_jmp(jmp_end, end);
        } else {
            let end = self.cur().code.len();
            self.patch_jmp(jmp_else, end);
        }
    }

    fn compile_numeric_for(&mut self, var: &str, start: &Expr, stop: &Expr, step: Option<&Expr>, body: &Block) {
        self.cur().begin_scope();
        let save = self.cur().free_reg;
        let base = self.cur().reserve(3);
        self.compile_expr_into(start, base);
        self.compile_expr_into(stop, base + 1);
        match step {
            Some(s) => self.compile_expr_into(s, base + 2),
            None => {
                let k = self.cur().add_constant(LuaValue::Number(1.0));
                self.cur().emit(Instruction::abx(OpCode::LoadK, base + 2, k), 0);
            }
        }
        let prep = self.cur().emit(Instruction::asbx(OpCode::ForPrep, base, 0), 0);
        self.cur().begin_scope();
        let var_reg = self.cur().declare_local(var); // base+3, the slot `ForLoop` updates
        debug_assert_eq!(var_reg, base + 3);
        self.cur().loop_stack.push(LoopCtx { break_jumps: Vec::new() });
        let body_start = self.cur().code.len();
        for stmt in body {
            self.compile_stmt(stmt);
        }
        if self.cur().needs_close(var_reg) {
            self.cur().emit(Instruction::abc(OpCode::Close, var_reg, 0, 0), 0);
        }
        let loop_pc = self.cur().code.len();
        self.patch_jmp(prep, loop_pc);
        self.cur()
            .emit(Instruction::asbx(OpCode::ForLoop, base, body_start as i32 - (loop_pc as i32 + 1)), 0);
        let end = self.cur().code.len();
        self.close_loop(end);
        self.cur().end_scope();
        self.cur().end_scope();
        self.cur().free_to(save);
    }

    fn compile_generic_for(&mut self, names: &[String], exprs: &[Expr], body: &Block) {
        self.cur().begin_scope();
        let save = self.cur().free_reg;
        let base = self.cur().reserve(3);
        self.compile_expr_list_to_n(exprs, 3, base);
        self.cur().begin_scope();
        let vars_base = self.cur().free_reg;
        for name in names {
            self.cur().declare_local(name);
        }
        self.cur().loop_stack.push(LoopCtx { break_jumps: Vec::new() });
        let top = self.cur().code.len();
        let first_name_reg = base + 3;
        let tfor = self
            .cur()
            .emit(Instruction::abc(OpCode::TForLoop, base, 0, names.len() as u32), 0);
        let jmp_back = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
        // `TFORLOOP`'s "stop" fallthrough lands here (next instruction),
        // so the body follows `jmp_back`'s target, not this point.
        let body_start = self.cur().code.len();
        let _ = first_name_reg;
        for stmt in body {
            self.compile_stmt(stmt);
        }
        if self.cur().needs_close(vars_base) {
            self.cur().emit(Instruction::abc(OpCode::Close, vars_base, 0, 0), 0);
        }
        let cur_len = self.cur().code.len();
        self.emit_jmp_to(cur_len, top);
        let end = self.cur().code.len();
        self.patch_jmp(jmp_back, body_start);
        let _ = tfor;
        self.close_loop(end);
        self.cur().end_scope();
        self.cur().end_scope();
        self.cur().free_to(save);
    }

    fn compile_function_decl(&mut self, target: &Expr, body: &FunctionBody) {
        let save = self.cur().free_reg;
        let reg = self.cur().reserve(1);
        let bx = self.compile_function_body(body);
        self.cur().emit(Instruction::abx(OpCode::Closure, reg, bx), body.line);
        self.emit_closure_upvalue_pseudo(bx);
        self.store_to_target(target, reg);
        self.cur().free_to(save);
    }

    fn compile_local_function(&mut self, name: &str, body: &FunctionBody) {
        // Declared before the body compiles so the function can recurse:
        // the name resolves as a local of the *enclosing* scope, visible
        // to the nested body as an upvalue.
        self.cur().declare_local(name);
        let reg = self.cur().resolve_local(name).unwrap();
        let bx = self.compile_function_body(body);
        self.cur().emit(Instruction::abx(OpCode::Closure, reg, bx), body.line);
        self.emit_closure_upvalue_pseudo(bx);
    }

    /// `CLOSURE`'s upvalue pseudo-instructions: one MOVE
    /// (isLocal) or GETUPVAL (isLocal=false) per entry, immediately
    /// following the `CLOSURE` instruction itself.
    fn emit_closure_upvalue_pseudo(&mut self, child_index: u32) {
        let descs: Vec<UpvalueDesc> = self.cur().child_protos[child_index as usize].upvalues.clone();
        for d in descs {
            if d.is_local {
                self.cur().emit(Instruction::abc(OpCode::Move, 0, d.index, 1), 0);
            } else {
                self.cur().emit(Instruction::abc(OpCode::GetUpval, 0, d.index, 1), 0);
            }
        }
    }

    fn compile_return(&mut self, exprs: &[Expr]) {
        let save = self.cur().free_reg;
        if exprs.is_empty() {
            self.cur().emit(Instruction::abc(OpCode::Return, 0, 1, 0), 0);
            return;
        }
        let base = save;
        let n = self.compile_expr_list_open(exprs, base);
        let b = match n {
            Some(_) => 0, // last expr is multi-valued: propagate "all"
            None => exprs.len() as u32 + 1,
        };
        self.cur().emit(Instruction::abc(OpCode::Return, base, b, 0), 0);
        self.cur().free_to(save);
    }

    fn compile_break(&mut self) {
        let jmp = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
        match self.cur().loop_stack.last_mut() {
            Some(ctx) => ctx.break_jumps.push(jmp),
            None => self.error(0, "break outside loop"),
        }
    }

    fn close_loop(&mut self, end_pc: usize) {
        if let Some(ctx) = self.cur().loop_stack.pop() {
            for jmp in ctx.break_jumps {
                self.patch_jmp(jmp, end_pc);
            }
        }
    }

    fn emit_jmp_to(&mut self, from_pc: usize, target_pc: usize) {
        let sbx = target_pc as i32 - (from_pc as i32 + 1);
        self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, sbx), 0);
    }

    fn patch_jmp(&mut self, jmp_pc: usize, target_pc: usize) {
        let sbx = target_pc as i32 - (jmp_pc as i32 + 1);
        self.cur().code[jmp_pc] = Instruction::asbx(OpCode::Jmp, 0, sbx);
    }

    // ---- expressions ---------------------------------------------------

    /// Compiles `expr` into a fresh temporary register and returns it.
    fn compile_expr_to_temp(&mut self, expr: &Expr) -> u32 {
        let reg = self.cur().reserve(1);
        self.compile_expr_into(expr, reg);
        reg
    }

    /// Compiles `expr`, requesting `want` results (only meaningful for
    /// calls/vararg; everything else always yields exactly one), placing
    /// the first result at the next free register. Returns that register.
    fn compile_expr_any(&mut self, expr: &Expr, want: i32) -> u32 {
        match expr {
            Expr::Call(callee, args) => self.compile_call(callee, args, want),
            Expr::MethodCall(obj, method, args) => self.compile_method_call(obj, method, args, want),
            Expr::Vararg => {
                let reg = self.cur().reserve(want.max(1) as u32);
                let b = if want < 0 { 0 } else { (want + 1) as u32 };
                self.cur().emit(Instruction::abc(OpCode::Vararg, reg, b, 0), 0);
                reg
            }
            _ => self.compile_expr_to_temp(expr),
        }
    }

    fn compile_expr_into(&mut self, expr: &Expr, dest: u32) {
        match expr {
            Expr::Nil => {
                self.cur().emit(Instruction::abc(OpCode::LoadNil, dest, dest, 0), 0);
            }
            Expr::True => {
                self.cur().emit(Instruction::abc(OpCode::LoadBool, dest, 1, 0), 0);
            }
            Expr::False => {
                self.cur().emit(Instruction::abc(OpCode::LoadBool, dest, 0, 0), 0);
            }
            Expr::Number(n) => {
                let k = self.cur().add_constant(LuaValue::Number(*n));
                self.cur().emit(Instruction::abx(OpCode::LoadK, dest, k), 0);
            }
            Expr::Str(s) => {
                let k = self.add_string_constant(s);
                self.cur().emit(Instruction::abx(OpCode::LoadK, dest, k), 0);
            }
            Expr::Vararg => {
                self.cur().emit(Instruction::abc(OpCode::Vararg, dest, 2, 0), 0);
            }
            Expr::Name(name) => {
                let level = self.level();
                match resolve_name(&mut self.stack, level, name) {
                NameRef::Local(slot) => {
                    if slot != dest {
                        self.cur().emit(Instruction::abc(OpCode::Move, dest, slot, 0), 0);
                    }
                }
                NameRef::Upvalue(idx) => {
                    self.cur().emit(Instruction::abc(OpCode::GetUpval, dest, idx, 0), 0);
                }
                NameRef::Global => {
                    let k = self.add_string_constant(name);
                    self.cur().emit(Instruction::abx(OpCode::GetGlobal, dest, k), 0);
                }
                }
            }
            Expr::Paren(inner) => self.compile_expr_into(inner, dest),
            Expr::Unary(op, operand) => self.compile_unary(*op, operand, dest),
            Expr::Binary(op, l, r) => self.compile_binary(*op, l, r, dest),
            Expr::Function(body) => {
                let bx = self.compile_function_body(body);
                self.cur().emit(Instruction::abx(OpCode::Closure, dest, bx), body.line);
                self.emit_closure_upvalue_pseudo(bx);
            }
            Expr::Table(fields) => self.compile_table(fields, dest),
            Expr::Call(callee, args) => {
                let reg = self.compile_call(callee, args, 1);
                if reg != dest {
                    self.cur().emit(Instruction::abc(OpCode::Move, dest, reg, 0), 0);
                }
            }
            Expr::MethodCall(obj, method, args) => {
                let reg = self.compile_method_call(obj, method, args, 1);
                if reg != dest {
                    self.cur().emit(Instruction::abc(OpCode::Move, dest, reg, 0), 0);
                }
            }
            Expr::Field(obj, field) => {
                let obj_reg = self.compile_expr_to_temp(obj);
                let k = self.add_string_constant(field);
                self.cur()
                    .emit(Instruction::abc(OpCode::GetTable, dest, obj_reg, encode_rk_const(k)), 0);
            }
            Expr::Index(obj, key) => {
                let obj_reg = self.compile_expr_to_temp(obj);
                let key_reg = self.compile_expr_to_temp(key);
                self.cur().emit(Instruction::abc(OpCode::GetTable, dest, obj_reg, key_reg), 0);
            }
        }
    }

    fn compile_unary(&mut self, op: UnOp, operand: &Expr, dest: u32) {
        let reg = self.compile_expr_to_temp(operand);
        let opcode = match op {
            UnOp::Neg => OpCode::Unm,
            UnOp::Not => OpCode::Not,
            UnOp::Len => OpCode::Len,
        };
        self.cur().emit(Instruction::abc(opcode, dest, reg, 0), 0);
    }

    fn compile_binary(&mut self, op: BinOp, l: &Expr, r: &Expr, dest: u32) {
        match op {
            BinOp::And => {
                self.compile_expr_into(l, dest);
                self.cur().emit(Instruction::abc(OpCode::Test, dest, 0, 0), 0);
                let jmp = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
                self.compile_expr_into(r, dest);
                let end = self.cur().code.len();
                self.patch_jmp(jmp, end);
                return;
            }
            BinOp::Or => {
                self.compile_expr_into(l, dest);
                self.cur().emit(Instruction::abc(OpCode::Test, dest, 0, 1), 0);
                let jmp = self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 0), 0);
                self.compile_expr_into(r, dest);
                let end = self.cur().code.len();
                self.patch_jmp(jmp, end);
                return;
            }
            BinOp::Concat => {
                let save = self.cur().free_reg;
                let base = self.compile_expr_to_temp(l);
                let top = self.compile_expr_to_temp(r);
                self.cur().emit(Instruction::abc(OpCode::Concat, dest, base, top), 0);
                self.cur().free_to(save.max(dest + 1));
                return;
            }
            _ => {}
        }
        let save = self.cur().free_reg;
        let lr = self.compile_expr_to_temp(l);
        let rr = self.compile_expr_to_temp(r);
        let opcode = match op {
            BinOp::Add => Some(OpCode::Add),
            BinOp::Sub => Some(OpCode::Sub),
            BinOp::Mul => Some(OpCode::Mul),
            BinOp::Div => Some(OpCode::Div),
            BinOp::Mod => Some(OpCode::Mod),
            BinOp::Pow => Some(OpCode::Pow),
            _ => None,
        };
        if let Some(opcode) = opcode {
            self.cur().emit(Instruction::abc(opcode, dest, lr, rr), 0);
            self.cur().free_to(save);
            return;
        }
        // Comparisons: EQ/LT/LE branch-and-skip; materialize as a bool
        // via the classic LOADBOOL/skip/LOADBOOL pair.
        let (opcode, sense, swap) = match op {
            BinOp::Eq => (OpCode::Eq, 1, false),
            BinOp::NotEq => (OpCode::Eq, 0, false),
            BinOp::Lt => (OpCode::Lt, 1, false),
            BinOp::Gt => (OpCode::Lt, 1, true),
            BinOp::Le => (OpCode::Le, 1, false),
            BinOp::Ge => (OpCode::Le, 1, true),
            _ => unreachable!(),
        };
        let (b, c) = if swap { (rr, lr) } else { (lr, rr) };
        self.cur().emit(Instruction::abc(opcode, sense, b, c), 0);
        self.cur().emit(Instruction::asbx(OpCode::Jmp, 0, 1), 0);
        self.cur().emit(Instruction::abc(OpCode::LoadBool, dest, 0, 1), 0);
        self.cur().emit(Instruction::abc(OpCode::LoadBool, dest, 1, 0), 0);
        self.cur().free_to(save.max(dest + 1));
    }

    fn compile_table(&mut self, fields: &[TableField], dest: u32) {
        self.cur().emit(Instruction::abc(OpCode::NewTable, dest, 0, 0), 0);
        let save = self.cur().free_reg;
        self.cur().free_to(dest + 1);
        let mut array_index = 0u32;
        let mut pending: Vec<u32> = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(e) => {
                    array_index += 1;
                    let is_last = i == fields.len() - 1;
                    if is_last {
                        if let Expr::Call(..) | Expr::MethodCall(..) | Expr::Vararg = e {
                            let reg = self.compile_expr_any(e, -1);
                            self.cur()
                                .emit(Instruction::abc(OpCode::SetList, dest, 0, 0), 0);
                            let _ = reg;
                            continue;
                        }
                    }
                    let reg = self.compile_expr_to_temp(e);
                    pending.push(reg);
                }
                TableField::Named(name, value) => {
                    let save2 = self.cur().free_reg;
                    let value_reg = self.compile_expr_to_temp(value);
                    let k = self.add_string_constant(name);
                    self.cur()
                        .emit(Instruction::abc(OpCode::SetTable, dest, encode_rk_const(k), value_reg), 0);
                    self.cur().free_to(save2);
                }
                TableField::Computed(key, value) => {
                    let save2 = self.cur().free_reg;
                    let key_reg = self.compile_expr_to_temp(key);
                    let value_reg = self.compile_expr_to_temp(value);
                    self.cur().emit(Instruction::abc(OpCode::SetTable, dest, key_reg, value_reg), 0);
                    self.cur().free_to(save2);
                }
            }
        }
        if !pending.is_empty() {
            self.cur()
                .emit(Instruction::abc(OpCode::SetList, dest, pending.len() as u32, 0), 0);
        }
        let _ = array_index;
        self.cur().free_to(save.max(dest + 1));
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Expr], want: i32) -> u32 {
        let save = self.cur().free_reg;
        let func_reg = self.cur().reserve(1);
        self.compile_expr_into(callee, func_reg);
        let n = self.compile_expr_list_open(args, func_reg + 1);
        let b = match n {
            Some(_) => 0,
            None => args.len() as u32 + 1,
        };
        let c = if want < 0 { 0 } else { (want + 1) as u32 };
        self.cur().emit(Instruction::abc(OpCode::Call, func_reg, b, c), 0);
        self.cur().free_to(save.max(func_reg + want.max(1) as u32));
        func_reg
    }

    fn compile_method_call(&mut self, obj: &Expr, method: &str, args: &[Expr], want: i32) -> u32 {
        let save = self.cur().free_reg;
        let func_reg = self.cur().reserve(2);
        let obj_reg = self.compile_expr_to_temp(obj);
        let k = self.add_string_constant(method);
        self.cur()
            .emit(Instruction::abc(OpCode::Self_, func_reg, obj_reg, encode_rk_const(k)), 0);
        self.cur().free_to(func_reg + 2);
        let n = self.compile_expr_list_open(args, func_reg + 2);
        let b = match n {
            Some(_) => 0,
            None => args.len() as u32 + 2,
        };
        let c = if want < 0 { 0 } else { (want + 1) as u32 };
        self.cur().emit(Instruction::abc(OpCode::Call, func_reg, b, c), 0);
        self.cur().free_to(save.max(func_reg + want.max(1) as u32));
        func_reg
    }

    /// Compiles `exprs` into consecutive registers starting at `base`.
    /// The last expression, if a call/vararg, is compiled open-ended;
    /// the return value signals that with `Some(base_of_last)`.
    fn compile_expr_list_open(&mut self, exprs: &[Expr], base: u32) -> Option<u32> {
        if exprs.is_empty() {
            return None;
        }
        self.cur().free_to(base);
        for e in &exprs[..exprs.len() - 1] {
            let reg = self.cur().reserve(1);
            self.compile_expr_into(e, reg);
        }
        let last = &exprs[exprs.len() - 1];
        if matches!(last, Expr::Call(..) | Expr::MethodCall(..) | Expr::Vararg) {
            self.compile_expr_any(last, -1);
            Some(base + exprs.len() as u32 - 1)
        } else {
            let reg = self.cur().reserve(1);
            self.compile_expr_into(last, reg);
            None
        }
    }

    /// Compiles `exprs` to fill exactly `want` consecutive registers
    /// starting at `base`, padding with nil or truncating multi-returns
    /// as needed.
    fn compile_expr_list_to_n(&mut self, exprs: &[Expr], want: usize, base: u32) -> Vec<u32> {
        self.cur().free_to(base);
        if exprs.is_empty() {
            for i in 0..want {
                self.cur().emit(Instruction::abc(OpCode::LoadNil, base + i as u32, base + i as u32, 0), 0);
            }
            self.cur().reserve(want as u32);
            return (0..want as u32).map(|i| base + i).collect();
        }
        let last_is_multi = matches!(
            exprs.last().unwrap(),
            Expr::Call(..) | Expr::MethodCall(..) | Expr::Vararg
        );
        for e in &exprs[..exprs.len() - 1] {
            let reg = self.cur().reserve(1);
            self.compile_expr_into(e, reg);
        }
        let produced = exprs.len();
        if last_is_multi {
            let extra = if want > produced { want - produced + 1 } else { 1 };
            let reg = self.cur().reserve(1);
            self.compile_expr_any(exprs.last().unwrap(), extra as i32 - 1);
            let _ = reg;
            self.cur().free_to(base + want.max(produced) as u32);
        } else {
            let reg = self.cur().reserve(1);
            self.compile_expr_into(exprs.last().unwrap(), reg);
        }
        while (self.cur().free_reg - base) < want as u32 {
            let reg = self.cur().reserve(1);
            self.cur().emit(Instruction::abc(OpCode::LoadNil, reg, reg, 0), 0);
        }
        (0..want as u32).map(|i| base + i).collect()
    }
}

/// Lines aren't tracked per-statement in this AST (only `FunctionBody`
/// carries one, from its `function` keyword); the implicit trailing
/// `RETURN` a block gets is tagged with line 0 rather than plumbing a
/// line through every `Stmt` variant for a rarely-surfaced error site.
fn block_last_line(_block: &Block) -> u32 {
    0
}
