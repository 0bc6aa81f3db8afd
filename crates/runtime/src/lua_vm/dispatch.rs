//! Instruction dispatch loop: a switch on `OpCode` driving register reads,
//! writes, calls, and closure creation for the Lua 5.1 opcode set in
//! `super::opcode`.

use std::rc::Rc;

use crate::gc::{FunctionId, FunctionKind, UpvalueState};
use crate::lua_value::{LuaValue, Prototype};

use super::call_info::{CallInfo, ExpectedResults, VarargInfo};
use super::error::{ErrorKind, LuaError};
use super::metamethod::{self, ArithOp};
use super::opcode::{decode_rk, OpCode, Rk};
use super::state::LuaState;
use super::LuaResult;

enum Callable {
    Lua(Rc<Prototype>, Vec<crate::gc::UpvalueId>),
    Host(super::CFunction),
}

fn resolve(state: &LuaState, id: FunctionId) -> Callable {
    match state.pool.get_function(id) {
        FunctionKind::Lua { proto, upvalues } => Callable::Lua(proto.clone(), upvalues.clone()),
        FunctionKind::Host(f) => Callable::Host(*f),
    }
}

/// Entry point for both `state.call`/`state.pcall` and the `CALL`
/// opcode's callee resolution. `func_index` is the stack slot holding
/// the callee; arguments occupy `func_index+1 ..= func_index+nargs`.
pub fn call_value(
    state: &mut LuaState,
    func_index: usize,
    callee: LuaValue,
    nargs: usize,
    expected: ExpectedResults,
    is_protected_boundary: bool,
) -> LuaResult<()> {
    let id = match callee.as_function() {
        Some(id) => id,
        None => return call_non_function(state, func_index, callee, nargs, expected),
    };
    match resolve(state, id) {
        Callable::Host(f) => {
            let base = func_index + 1;
            state.set_top(base + nargs);
            state.call_stack.push(CallInfo {
                closure: id,
                base,
                pc: 0,
                expected_results: expected,
                varargs: None,
                is_protected_boundary,
            });
            let nret = f(state)?;
            state.call_stack.pop();
            finish_return(state, func_index, base, nret, expected);
            Ok(())
        }
        Callable::Lua(proto, _) => {
            let base = func_index + 1;
            let num_params = proto.num_params as usize;
            let varargs = if proto.is_vararg && nargs > num_params {
                Some(VarargInfo {
                    base: base + num_params,
                    count: nargs - num_params,
                })
            } else {
                None
            };
            let frame_top = base + (proto.max_stack_size as usize).max(num_params);
            state.set_top(frame_top.max(base + nargs));
            for i in nargs..num_params {
                state.stack[base + i] = LuaValue::Nil;
            }
            state.call_stack.push(CallInfo {
                closure: id,
                base,
                pc: 0,
                expected_results: expected,
                varargs,
                is_protected_boundary,
            });
            let depth = state.call_stack.len();
            match run_until(state, depth) {
                Ok(()) => Ok(()),
                Err(e) => {
                    if state.call_stack.len() >= depth {
                        state.call_stack.truncate(depth - 1);
                    }
                    Err(e)
                }
            }
        }
    }
}

fn call_non_function(
    state: &mut LuaState,
    func_index: usize,
    callee: LuaValue,
    nargs: usize,
    expected: ExpectedResults,
) -> LuaResult<()> {
    if let LuaValue::Table(id) = callee {
        if let Some(mt) = state.pool.get_table(id).metatable() {
            let key = state.intern("__call");
            let handler = state.pool.get_table(mt).get(&key);
            if handler.is_function() {
                state.push(LuaValue::Nil);
                for i in (0..=nargs).rev() {
                    state.stack[func_index + 1 + i + 1] = state.stack[func_index + 1 + i];
                }
                state.stack[func_index] = handler;
                state.stack[func_index + 1] = callee;
                return call_value(state, func_index, handler, nargs + 1, expected, false);
            }
        }
    }
    Err(LuaError::runtime(format!(
        "attempt to call a {} value",
        callee.type_name()
    )))
}

/// Copies a callee's results back to its caller's frame and adjusts
/// `top` to match the caller's expectation.
fn finish_return(state: &mut LuaState, func_index: usize, results_base: usize, nret: usize, expected: ExpectedResults) {
    let count = match expected {
        ExpectedResults::All => nret,
        ExpectedResults::Exact(n) => n,
    };
    for i in 0..count {
        state.stack[func_index + i] = if i < nret {
            state.stack[results_base + i]
        } else {
            LuaValue::Nil
        };
    }
    state.set_top(func_index + count);
}

/// Runs instructions until the call stack depth drops below
/// `target_depth` (the frame the caller pushed has returned). Each
/// iteration re-resolves the current top frame's prototype rather than
/// threading it through loop state, so a `CALL` pushing a deeper frame
/// or a `RETURN` popping back both "just work" on the next iteration.
fn run_until(state: &mut LuaState, target_depth: usize) -> LuaResult<()> {
    loop {
        if state.call_stack.len() < target_depth {
            return Ok(());
        }
        let frame_idx = state.call_stack.len() - 1;
        let closure_id = state.call_stack[frame_idx].closure;
        let (proto, upvalues) = match resolve(state, closure_id) {
            Callable::Lua(p, u) => (p, u),
            Callable::Host(_) => unreachable!("host frame left open on the call stack"),
        };
        let base = state.call_stack[frame_idx].base;
        let pc = state.call_stack[frame_idx].pc;
        if pc >= proto.code.len() {
            do_return(state, base, 0, 0)?;
            continue;
        }
        let instr = proto.code[pc];
        state.call_stack[frame_idx].pc = pc + 1;
        let line = proto.line_at(pc);

        macro_rules! rk {
            ($operand:expr) => {
                match decode_rk($operand) {
                    Rk::Reg(r) => state.stack[base + r as usize],
                    Rk::Const(k) => proto.constants[k as usize],
                }
            };
        }

        match instr.opcode() {
            OpCode::Move => {
                state.stack[base + instr.a() as usize] = state.stack[base + instr.b() as usize];
            }
            OpCode::LoadK => {
                state.stack[base + instr.a() as usize] = proto.constants[instr.bx() as usize];
            }
            OpCode::LoadBool => {
                state.stack[base + instr.a() as usize] = LuaValue::Boolean(instr.b() != 0);
                if instr.c() != 0 {
                    state.call_stack[frame_idx].pc += 1;
                }
            }
            OpCode::LoadNil => {
                let a = instr.a() as usize;
                let b = instr.b() as usize;
                for i in a..=b {
                    state.stack[base + i] = LuaValue::Nil;
                }
            }
            OpCode::GetGlobal => {
                let key_str = match proto.constants[instr.bx() as usize] {
                    LuaValue::String(s) => state.pool.get_string(s).to_string(),
                    _ => String::new(),
                };
                state.stack[base + instr.a() as usize] = state.get_global(&key_str);
            }
            OpCode::SetGlobal => {
                let key_str = match proto.constants[instr.bx() as usize] {
                    LuaValue::String(s) => state.pool.get_string(s).to_string(),
                    _ => String::new(),
                };
                let v = state.stack[base + instr.a() as usize];
                state.set_global(&key_str, v);
            }
            OpCode::GetUpval => {
                let uv = upvalues[instr.b() as usize];
                state.stack[base + instr.a() as usize] = read_upvalue(state, uv);
            }
            OpCode::SetUpval => {
                let uv = upvalues[instr.b() as usize];
                let v = state.stack[base + instr.a() as usize];
                write_upvalue(state, uv, v);
            }
            OpCode::GetTable => {
                let t = state.stack[base + instr.b() as usize];
                let k = rk!(instr.c());
                let v = metamethod::index_get(state, t, k).map_err(|e| with_line(e, state, line))?;
                state.stack[base + instr.a() as usize] = v;
            }
            OpCode::SetTable => {
                let t = state.stack[base + instr.a() as usize];
                let k = rk!(instr.b());
                let v = rk!(instr.c());
                metamethod::index_set(state, t, k, v).map_err(|e| with_line(e, state, line))?;
            }
            OpCode::NewTable => {
                state.stack[base + instr.a() as usize] = state.create_table();
            }
            OpCode::Self_ => {
                let obj = state.stack[base + instr.b() as usize];
                let k = rk!(instr.c());
                let method = metamethod::index_get(state, obj, k).map_err(|e| with_line(e, state, line))?;
                state.stack[base + instr.a() as usize + 1] = obj;
                state.stack[base + instr.a() as usize] = method;
            }
            op @ (OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow) => {
                let b = rk!(instr.b());
                let c = rk!(instr.c());
                let arith_op = match op {
                    OpCode::Add => ArithOp::Add,
                    OpCode::Sub => ArithOp::Sub,
                    OpCode::Mul => ArithOp::Mul,
                    OpCode::Div => ArithOp::Div,
                    OpCode::Mod => ArithOp::Mod,
                    _ => ArithOp::Pow,
                };
                let v = metamethod::arith(state, arith_op, b, c).map_err(|e| with_line(e, state, line))?;
                state.stack[base + instr.a() as usize] = v;
            }
            OpCode::Unm => {
                let b = state.stack[base + instr.b() as usize];
                let v = metamethod::unm(state, b).map_err(|e| with_line(e, state, line))?;
                state.stack[base + instr.a() as usize] = v;
            }
            OpCode::Not => {
                let b = state.stack[base + instr.b() as usize];
                state.stack[base + instr.a() as usize] = LuaValue::Boolean(!b.is_truthy());
            }
            OpCode::Len => {
                let b = state.stack[base + instr.b() as usize];
                let v = metamethod::length(state, b).map_err(|e| with_line(e, state, line))?;
                state.stack[base + instr.a() as usize] = v;
            }
            OpCode::Concat => {
                let b = instr.b() as usize;
                let c = instr.c() as usize;
                let values: Vec<LuaValue> = (b..=c).map(|i| state.stack[base + i]).collect();
                let v = metamethod::concat(state, &values).map_err(|e| with_line(e, state, line))?;
                state.stack[base + instr.a() as usize] = v;
            }
            OpCode::Jmp => {
                let sbx = instr.sbx();
                let new_pc = (state.call_stack[frame_idx].pc as i64 + sbx as i64) as usize;
                state.call_stack[frame_idx].pc = new_pc;
            }
            OpCode::Eq => {
                let b = rk!(instr.b());
                let c = rk!(instr.c());
                let equal = metamethod::eq(state, b, c).map_err(|e| with_line(e, state, line))?;
                if equal != (instr.a() != 0) {
                    state.call_stack[frame_idx].pc += 1;
                }
            }
            OpCode::Lt => {
                let b = rk!(instr.b());
                let c = rk!(instr.c());
                let less = metamethod::lt(state, b, c).map_err(|e| with_line(e, state, line))?;
                if less != (instr.a() != 0) {
                    state.call_stack[frame_idx].pc += 1;
                }
            }
            OpCode::Le => {
                let b = rk!(instr.b());
                let c = rk!(instr.c());
                let le = metamethod::le(state, b, c).map_err(|e| with_line(e, state, line))?;
                if le != (instr.a() != 0) {
                    state.call_stack[frame_idx].pc += 1;
                }
            }
            OpCode::Test => {
                let a = state.stack[base + instr.a() as usize];
                if a.is_truthy() != (instr.c() != 0) {
                    state.call_stack[frame_idx].pc += 1;
                }
            }
            OpCode::TestSet => {
                let b = state.stack[base + instr.b() as usize];
                if b.is_truthy() == (instr.c() != 0) {
                    state.stack[base + instr.a() as usize] = b;
                } else {
                    state.call_stack[frame_idx].pc += 1;
                }
            }
            OpCode::Call => {
                let a = instr.a() as usize;
                let bcount = instr.b() as usize;
                let nargs = if bcount == 0 {
                    state.top() - (base + a + 1)
                } else {
                    bcount - 1
                };
                let ccount = instr.c() as usize;
                let expected = if ccount == 0 {
                    ExpectedResults::All
                } else {
                    ExpectedResults::Exact(ccount - 1)
                };
                let func_index = base + a;
                let callee = state.stack[func_index];
                call_value(state, func_index, callee, nargs, expected, false)
                    .map_err(|e| with_line(e, state, line))?;
            }
            OpCode::TailCall => {
                // Simplified: behaves like CALL followed by RETURN of all
                // results, without reusing the current CallInfo slot.
                let a = instr.a() as usize;
                let bcount = instr.b() as usize;
                let nargs = if bcount == 0 {
                    state.top() - (base + a + 1)
                } else {
                    bcount - 1
                };
                let func_index = base + a;
                let callee = state.stack[func_index];
                call_value(state, func_index, callee, nargs, ExpectedResults::All, false)
                    .map_err(|e| with_line(e, state, line))?;
                let nret = state.top() - func_index;
                do_return(state, base, func_index - base, nret)?;
                continue;
            }
            OpCode::Return => {
                let a = instr.a() as usize;
                let bcount = instr.b() as usize;
                let nret = if bcount == 0 {
                    state.top() - (base + a)
                } else {
                    bcount - 1
                };
                do_return(state, base, a, nret)?;
                continue;
            }
            OpCode::ForPrep => {
                let a = instr.a() as usize;
                let init = as_number(state.stack[base + a], state, line)?;
                let step = as_number(state.stack[base + a + 2], state, line)?;
                state.stack[base + a] = LuaValue::Number(init - step);
                let sbx = instr.sbx();
                let new_pc = (state.call_stack[frame_idx].pc as i64 + sbx as i64) as usize;
                state.call_stack[frame_idx].pc = new_pc;
            }
            OpCode::ForLoop => {
                let a = instr.a() as usize;
                let step = as_number(state.stack[base + a + 2], state, line)?;
                let limit = as_number(state.stack[base + a + 1], state, line)?;
                let counter = as_number(state.stack[base + a], state, line)? + step;
                let still_going = if step > 0.0 { counter <= limit } else { counter >= limit };
                state.stack[base + a] = LuaValue::Number(counter);
                if still_going {
                    state.stack[base + a + 3] = LuaValue::Number(counter);
                    let sbx = instr.sbx();
                    let new_pc = (state.call_stack[frame_idx].pc as i64 + sbx as i64) as usize;
                    state.call_stack[frame_idx].pc = new_pc;
                }
            }
            OpCode::TForLoop => {
                // R(A), R(A+1), R(A+2) hold the iterator function, state,
                // and control variable; R(A+3).. are the loop variables.
                // Copy the call's operands down to the loop-variable base
                // so the callee's results land directly in R(A+3..A+3+C).
                let a = instr.a() as usize;
                let slot = base + a;
                let call_base = slot + 3;
                let c = instr.c() as usize;
                state.stack[call_base] = state.stack[slot];
                state.stack[call_base + 1] = state.stack[slot + 1];
                state.stack[call_base + 2] = state.stack[slot + 2];
                let callee = state.stack[call_base];
                let saved_top = state.top();
                state.set_top(call_base + 3);
                call_value(state, call_base, callee, 2, ExpectedResults::Exact(c), false)
                    .map_err(|e| with_line(e, state, line))?;
                let first = state.stack[call_base];
                if first.is_nil() {
                    state.call_stack[frame_idx].pc += 1;
                } else {
                    state.stack[slot + 2] = first;
                }
                state.set_top(saved_top.max(state.top()));
            }
            OpCode::SetList => {
                let a = instr.a() as usize;
                let table = state.stack[base + a];
                let count = instr.b() as usize;
                let n = if count == 0 { state.top() - (base + a + 1) } else { count };
                for i in 1..=n {
                    let v = state.stack[base + a + i];
                    state.set_array(table, i as i64, v);
                }
            }
            OpCode::Closure => {
                let child = proto.child_protos[instr.bx() as usize].clone();
                let mut new_upvalues = Vec::with_capacity(child.upvalues.len());
                for desc in &child.upvalues {
                    let uv = if desc.is_local {
                        state.find_or_create_upvalue(base + desc.index as usize)
                    } else {
                        upvalues[desc.index as usize]
                    };
                    new_upvalues.push(uv);
                }
                let id = state.make_closure(child, new_upvalues);
                state.stack[base + instr.a() as usize] = LuaValue::Function(id);
                state.maybe_collect();
            }
            OpCode::Vararg => {
                let a = instr.a() as usize;
                let bcount = instr.b() as usize;
                let va = state.call_stack[frame_idx].varargs;
                let (vbase, vcount) = va.map(|v| (v.base, v.count)).unwrap_or((0, 0));
                let n = if bcount == 0 { vcount } else { bcount - 1 };
                for i in 0..n {
                    state.stack[base + a + i] = if i < vcount {
                        state.stack[vbase + i]
                    } else {
                        LuaValue::Nil
                    };
                }
                if bcount == 0 {
                    state.set_top(base + a + n);
                }
            }
            OpCode::Close => {
                state.close_upvalues(base + instr.a() as usize);
            }
        }
    }
}

/// Shared tail of `RETURN`/end-of-code fallthrough/`TAILCALL`: closes
/// upvalues above `base`, copies results into the caller's expected
/// slots, and pops this frame.
fn do_return(state: &mut LuaState, base: usize, a: usize, nret: usize) -> LuaResult<()> {
    state.close_upvalues(base);
    let ci = state.call_stack.pop().expect("return with empty call stack");
    let func_index = ci.base - 1;
    let results_base = base + a;
    finish_return(state, func_index, results_base, nret, ci.expected_results);
    Ok(())
}

fn read_upvalue(state: &LuaState, id: crate::gc::UpvalueId) -> LuaValue {
    match state.pool.get_upvalue(id).state {
        UpvalueState::Open(slot) => state.stack[slot],
        UpvalueState::Closed(v) => v,
    }
}

fn write_upvalue(state: &mut LuaState, id: crate::gc::UpvalueId, value: LuaValue) {
    match state.pool.get_upvalue(id).state {
        UpvalueState::Open(slot) => state.stack[slot] = value,
        UpvalueState::Closed(_) => state.pool.get_upvalue_mut(id).state = UpvalueState::Closed(value),
    }
}

fn as_number(v: LuaValue, state: &LuaState, line: u32) -> LuaResult<f64> {
    v.as_number().ok_or_else(|| {
        LuaError::new(ErrorKind::Runtime, "'for' initial value must be a number").at(&state.chunk_name, line)
    })
}

fn with_line(mut e: LuaError, state: &LuaState, line: u32) -> LuaError {
    if e.source_name.is_none() {
        e = e.at(&state.chunk_name, line);
    }
    e
}
