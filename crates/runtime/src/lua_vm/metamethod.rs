//! Two-phase metamethod dispatch for arithmetic, comparison, indexing,
//! and concatenation: try the raw operation first, fall back to the
//! operand's metatable.

use crate::lua_value::LuaValue;

use super::error::LuaError;
use super::state::LuaState;
use super::LuaResult;

#[derive(Clone, Copy, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => a - (a / b).floor() * b,
            ArithOp::Pow => a.powf(b),
        }
    }

    fn event_name(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
        }
    }
}

fn coerce_number(state: &LuaState, v: LuaValue) -> Option<f64> {
    match v {
        LuaValue::Number(n) => Some(n),
        LuaValue::String(s) => state.pool.get_string(s).trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn metatable_of(state: &LuaState, v: LuaValue) -> Option<crate::gc::TableId> {
    match v {
        LuaValue::Table(id) => state.pool.get_table(id).metatable(),
        _ => None,
    }
}

fn lookup_event(state: &mut LuaState, mt: crate::gc::TableId, event: &str) -> LuaValue {
    let key = state.intern(event);
    state.pool.get_table(mt).get(&key)
}

pub fn arith(state: &mut LuaState, op: ArithOp, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    if let (Some(x), Some(y)) = (coerce_number(state, a), coerce_number(state, b)) {
        return Ok(LuaValue::Number(op.apply(x, y)));
    }
    if let Some(handler) = find_binary_handler(state, a, b, op.event_name()) {
        return call_handler(state, handler, a, b);
    }
    Err(LuaError::runtime(format!(
        "attempt to perform arithmetic on a {} value",
        if coerce_number(state, a).is_none() { a.type_name() } else { b.type_name() }
    )))
}

pub fn unm(state: &mut LuaState, a: LuaValue) -> LuaResult<LuaValue> {
    if let Some(x) = coerce_number(state, a) {
        return Ok(LuaValue::Number(-x));
    }
    if let Some(handler) = find_binary_handler(state, a, a, "__unm") {
        return call_handler(state, handler, a, a);
    }
    Err(LuaError::runtime(format!(
        "attempt to perform arithmetic on a {} value",
        a.type_name()
    )))
}

pub fn concat(state: &mut LuaState, values: &[LuaValue]) -> LuaResult<LuaValue> {
    // Right-to-left; only adjacent non-string/number
    // pairs consult `__concat`, but folding the whole run raw first
    // covers the common all-stringable case without extra allocation.
    let mut acc: Option<LuaValue> = None;
    for v in values.iter().rev() {
        acc = Some(match acc {
            None => *v,
            Some(rhs) => concat_pair(state, *v, rhs)?,
        });
    }
    Ok(acc.unwrap_or_else(|| state.intern("")))
}

fn concat_pair(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    let stringable = |v: LuaValue| matches!(v, LuaValue::String(_) | LuaValue::Number(_));
    if stringable(a) && stringable(b) {
        let sa = state.tostring_value(a);
        let sb = state.tostring_value(b);
        return Ok(state.intern(&format!("{}{}", sa, sb)));
    }
    if let Some(handler) = find_binary_handler(state, a, b, "__concat") {
        return call_handler(state, handler, a, b);
    }
    let bad = if stringable(a) { b } else { a };
    Err(LuaError::runtime(format!(
        "attempt to concatenate a {} value",
        bad.type_name()
    )))
}

/// `EQ`: identical tag+payload short-circuits true; otherwise (tables
/// only) consult `__eq` if both operands share it.
pub fn eq(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if a.raw_equal(&b) {
        return Ok(true);
    }
    if let (LuaValue::Table(_), LuaValue::Table(_)) = (a, b) {
        if let Some(handler) = find_binary_handler(state, a, b, "__eq") {
            let result = call_handler(state, handler, a, b)?;
            return Ok(result.is_truthy());
        }
    }
    Ok(false)
}

pub fn lt(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => {
            Ok(state.pool.get_string(x) < state.pool.get_string(y))
        }
        _ => {
            if let Some(handler) = find_binary_handler(state, a, b, "__lt") {
                let result = call_handler(state, handler, a, b)?;
                return Ok(result.is_truthy());
            }
            Err(LuaError::runtime(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            )))
        }
    }
}

pub fn le(state: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => {
            Ok(state.pool.get_string(x) <= state.pool.get_string(y))
        }
        _ => {
            if let Some(handler) = find_binary_handler(state, a, b, "__le") {
                let result = call_handler(state, handler, a, b)?;
                return Ok(result.is_truthy());
            }
            Err(LuaError::runtime(format!(
                "attempt to compare {} with {}",
                a.type_name(),
                b.type_name()
            )))
        }
    }
}

fn find_binary_handler(state: &mut LuaState, a: LuaValue, b: LuaValue, event: &str) -> Option<LuaValue> {
    if let Some(mt) = metatable_of(state, a) {
        let h = lookup_event(state, mt, event);
        if !h.is_nil() {
            return Some(h);
        }
    }
    if let Some(mt) = metatable_of(state, b) {
        let h = lookup_event(state, mt, event);
        if !h.is_nil() {
            return Some(h);
        }
    }
    None
}

fn call_handler(state: &mut LuaState, handler: LuaValue, a: LuaValue, b: LuaValue) -> LuaResult<LuaValue> {
    let base = state.top();
    state.push(handler);
    state.push(a);
    state.push(b);
    state.call(2, 1)?;
    let result = state.peek(state.top() - 1);
    state.set_top(base);
    Ok(result)
}

/// `GETTABLE`: raw access, falling back to `__index` (table → recurse,
/// function → invoke) on a missing key.
pub fn index_get(state: &mut LuaState, table: LuaValue, key: LuaValue) -> LuaResult<LuaValue> {
    if let LuaValue::Table(id) = table {
        let raw = state.pool.get_table(id).get(&key);
        if !raw.is_nil() {
            return Ok(raw);
        }
        if let Some(mt) = state.pool.get_table(id).metatable() {
            let handler_key = state.intern("__index");
            let handler = state.pool.get_table(mt).get(&handler_key);
            return match handler {
                LuaValue::Nil => Ok(LuaValue::Nil),
                LuaValue::Table(_) => index_get(state, handler, key),
                LuaValue::Function(_) => {
                    let base = state.top();
                    state.push(handler);
                    state.push(table);
                    state.push(key);
                    state.call(2, 1)?;
                    let result = state.peek(state.top() - 1);
                    state.set_top(base);
                    Ok(result)
                }
                _ => Ok(LuaValue::Nil),
            };
        }
        Ok(LuaValue::Nil)
    } else {
        Err(LuaError::runtime(format!(
            "attempt to index a {} value",
            table.type_name()
        )))
    }
}

/// `SETTABLE`: raw write, falling back to `__newindex` when the field is
/// currently absent.
pub fn index_set(state: &mut LuaState, table: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<()> {
    if let LuaValue::Table(id) = table {
        let present = !state.pool.get_table(id).get(&key).is_nil();
        if present {
            state.pool.get_table_mut(id).set(key, value);
            return Ok(());
        }
        if let Some(mt) = state.pool.get_table(id).metatable() {
            let handler_key = state.intern("__newindex");
            let handler = state.pool.get_table(mt).get(&handler_key);
            match handler {
                LuaValue::Nil => {
                    state.pool.get_table_mut(id).set(key, value);
                    Ok(())
                }
                LuaValue::Table(_) => index_set(state, handler, key, value),
                LuaValue::Function(_) => {
                    let base = state.top();
                    state.push(handler);
                    state.push(table);
                    state.push(key);
                    state.push(value);
                    state.call(3, 0)?;
                    state.set_top(base);
                    Ok(())
                }
                _ => Ok(()),
            }
        } else {
            state.pool.get_table_mut(id).set(key, value);
            Ok(())
        }
    } else {
        Err(LuaError::runtime(format!(
            "attempt to index a {} value",
            table.type_name()
        )))
    }
}

/// Length `#`: byte length for strings, boundary search
/// for tables.
pub fn length(state: &mut LuaState, v: LuaValue) -> LuaResult<LuaValue> {
    match v {
        LuaValue::String(s) => Ok(LuaValue::Number(state.pool.get_string(s).len() as f64)),
        LuaValue::Table(id) => Ok(LuaValue::Number(state.pool.get_table(id).len() as f64)),
        _ => Err(LuaError::runtime(format!(
            "attempt to get length of a {} value",
            v.type_name()
        ))),
    }
}
