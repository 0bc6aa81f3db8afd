//! Basic library: the global functions every Lua 5.1 script assumes
//! exist without `require` — `print`, `type`, `pairs`/`ipairs`, raw
//! table access, metatables, and protected calls.

use crate::lua_value::LuaValue;
use crate::lua_vm::error::{ErrorKind, LuaError};
use crate::lua_vm::{LuaResult, LuaState};

pub fn install(state: &mut LuaState) {
    state.register_fn("print", print);
    state.register_fn("type", type_);
    state.register_fn("tostring", tostring);
    state.register_fn("tonumber", tonumber);
    state.register_fn("pairs", pairs);
    state.register_fn("ipairs", ipairs);
    state.register_fn("next", next);
    state.register_fn("rawget", rawget);
    state.register_fn("rawset", rawset);
    state.register_fn("rawequal", rawequal);
    state.register_fn("setmetatable", setmetatable);
    state.register_fn("getmetatable", getmetatable);
    state.register_fn("assert", assert_);
    state.register_fn("error", error);
    state.register_fn("pcall", pcall);
    state.register_fn("xpcall", xpcall);
    state.register_fn("select", select);
    state.register_fn("unpack", unpack);
    state.register_fn("__inext", inext);
}

/// Returns the call frame to `top == base`, ready for the caller to
/// push its own results.
fn reset_results(state: &mut LuaState) {
    let base = state.current_base();
    state.set_top(base);
}

fn print(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.arg_count();
    let mut parts = Vec::with_capacity(n);
    for i in 1..=n {
        parts.push(state.tostring_value(state.arg(i)));
    }
    println!("{}", parts.join("\t"));
    reset_results(state);
    Ok(0)
}

fn type_(state: &mut LuaState) -> LuaResult<usize> {
    let name = state.arg(1).type_name();
    let v = state.intern(name);
    reset_results(state);
    state.push(v);
    Ok(1)
}

fn tostring(state: &mut LuaState) -> LuaResult<usize> {
    let s = state.tostring_value(state.arg(1));
    let v = state.intern(&s);
    reset_results(state);
    state.push(v);
    Ok(1)
}

fn tonumber(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.arg(1);
    let base_arg = state.arg(2);
    let result = match (v, base_arg) {
        (LuaValue::Number(n), LuaValue::Nil) => Some(n),
        (LuaValue::String(s), LuaValue::Nil) => {
            let text = state.pool.get_string(s).trim().to_string();
            parse_lua_number(&text)
        }
        (LuaValue::String(s), LuaValue::Number(b)) => {
            let text = state.pool.get_string(s).trim().to_string();
            i64::from_str_radix(&text, b as u32).ok().map(|n| n as f64)
        }
        _ => None,
    };
    reset_results(state);
    state.push(result.map(LuaValue::Number).unwrap_or(LuaValue::Nil));
    Ok(1)
}

fn parse_lua_number(text: &str) -> Option<f64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    text.parse::<f64>().ok()
}

fn pairs(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let next_fn = state.get_global("next");
    reset_results(state);
    state.push(next_fn);
    state.push(t);
    state.push(LuaValue::Nil);
    Ok(3)
}

fn ipairs(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let inext_fn = state.get_global("__inext");
    reset_results(state);
    state.push(inext_fn);
    state.push(t);
    state.push(LuaValue::Number(0.0));
    Ok(3)
}

fn inext(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let i = state.arg(2).as_number().unwrap_or(0.0) + 1.0;
    let v = state.get_array(t, i as i64);
    reset_results(state);
    if v.is_nil() {
        state.push(LuaValue::Nil);
        Ok(1)
    } else {
        state.push(LuaValue::Number(i));
        state.push(v);
        Ok(2)
    }
}

fn next(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let key = state.arg(2);
    let result = t.as_table().and_then(|id| state.pool.get_table(id).next(&key));
    reset_results(state);
    match result {
        Some((k, v)) => {
            state.push(k);
            state.push(v);
            Ok(2)
        }
        None => {
            state.push(LuaValue::Nil);
            Ok(1)
        }
    }
}

fn rawget(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let k = state.arg(2);
    let v = t.as_table().map(|id| state.pool.get_table(id).get(&k)).unwrap_or(LuaValue::Nil);
    reset_results(state);
    state.push(v);
    Ok(1)
}

fn rawset(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let k = state.arg(2);
    let v = state.arg(3);
    if let Some(id) = t.as_table() {
        state.pool.get_table_mut(id).set(k, v);
    }
    reset_results(state);
    state.push(t);
    Ok(1)
}

fn rawequal(state: &mut LuaState) -> LuaResult<usize> {
    let eq = state.arg(1).raw_equal(&state.arg(2));
    reset_results(state);
    state.push(LuaValue::Boolean(eq));
    Ok(1)
}

fn setmetatable(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let mt = state.arg(2);
    let id = t
        .as_table()
        .ok_or_else(|| LuaError::runtime("bad argument #1 to 'setmetatable' (table expected)"))?;
    state.pool.get_table_mut(id).set_metatable(mt.as_table());
    reset_results(state);
    state.push(t);
    Ok(1)
}

fn getmetatable(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let mt = t.as_table().and_then(|id| state.pool.get_table(id).metatable());
    reset_results(state);
    state.push(mt.map(LuaValue::Table).unwrap_or(LuaValue::Nil));
    Ok(1)
}

fn assert_(state: &mut LuaState) -> LuaResult<usize> {
    let v = state.arg(1);
    if v.is_truthy() {
        let n = state.arg_count();
        let args: Vec<LuaValue> = (1..=n).map(|i| state.arg(i)).collect();
        reset_results(state);
        for a in args {
            state.push(a);
        }
        Ok(n)
    } else {
        let msg = state.arg(2);
        let text = if msg.is_nil() {
            "assertion failed!".to_string()
        } else {
            state.tostring_value(msg)
        };
        Err(LuaError::runtime(text))
    }
}

fn error(state: &mut LuaState) -> LuaResult<usize> {
    let msg = state.arg(1);
    let level = state.arg(2).as_number().unwrap_or(1.0);
    let text = state.tostring_value(msg);
    if level > 0.0 && msg.is_string() {
        // The host frame `error` itself runs in carries no useful pc; the
        // Lua frame that called `error(...)` is one level up.
        let line = if state.call_stack.len() >= 2 {
            state.call_stack[state.call_stack.len() - 2].pc as u32
        } else {
            0
        };
        Err(LuaError::new(ErrorKind::Runtime, text).at(&state.chunk_name, line))
    } else {
        Err(LuaError::runtime(text))
    }
}

fn pcall(state: &mut LuaState) -> LuaResult<usize> {
    let base = state.current_base();
    let n = state.arg_count();
    if n == 0 {
        return Err(LuaError::runtime("bad argument #1 to 'pcall' (value expected)"));
    }
    let nargs = n - 1;
    let ok = state.pcall(nargs, -1);
    let nret = state.top() - base;
    for i in (0..nret).rev() {
        state.stack[base + i + 1] = state.stack[base + i];
    }
    state.stack[base] = LuaValue::Boolean(ok);
    state.set_top(base + 1 + nret);
    Ok(1 + nret)
}

fn xpcall(state: &mut LuaState) -> LuaResult<usize> {
    let base = state.current_base();
    let n = state.arg_count();
    if n < 2 {
        return Err(LuaError::runtime("bad argument #2 to 'xpcall' (value expected)"));
    }
    let handler = state.arg(2);
    let nargs = n - 2;
    for i in 0..nargs {
        state.stack[base + 1 + i] = state.stack[base + 2 + i];
    }
    state.set_top(base + 1 + nargs);
    let ok = state.pcall(nargs, -1);
    if ok {
        let nret = state.top() - base;
        for i in (0..nret).rev() {
            state.stack[base + i + 1] = state.stack[base + i];
        }
        state.stack[base] = LuaValue::Boolean(true);
        state.set_top(base + 1 + nret);
        Ok(1 + nret)
    } else {
        let err = state.stack[base];
        state.set_top(base);
        state.push(handler);
        state.push(err);
        state.call(1, -1)?;
        let nret = state.top() - base;
        for i in (0..nret).rev() {
            state.stack[base + i + 1] = state.stack[base + i];
        }
        state.stack[base] = LuaValue::Boolean(false);
        state.set_top(base + 1 + nret);
        Ok(1 + nret)
    }
}

fn select(state: &mut LuaState) -> LuaResult<usize> {
    let n = state.arg_count();
    let selector = state.arg(1);
    if let LuaValue::String(s) = selector {
        if state.pool.get_string(s) == "#" {
            reset_results(state);
            state.push(LuaValue::Number((n.saturating_sub(1)) as f64));
            return Ok(1);
        }
    }
    let idx = selector.as_number().unwrap_or(1.0) as i64;
    let total = (n - 1) as i64;
    let start = if idx < 0 { (total + idx).max(0) + 1 } else { idx };
    let mut results = Vec::new();
    let mut i = start;
    while i <= total {
        results.push(state.arg(1 + i as usize));
        i += 1;
    }
    let count = results.len();
    reset_results(state);
    for v in results {
        state.push(v);
    }
    Ok(count)
}

fn unpack(state: &mut LuaState) -> LuaResult<usize> {
    let t = state.arg(1);
    let i = state.arg(2).as_number().unwrap_or(1.0) as i64;
    let j = match state.arg(3) {
        LuaValue::Number(n) => n as i64,
        _ => t.as_table().map(|id| state.pool.get_table(id).len() as i64).unwrap_or(0),
    };
    let mut results = Vec::new();
    let mut k = i;
    while k <= j {
        results.push(state.get_array(t, k));
        k += 1;
    }
    let count = results.len();
    reset_results(state);
    for v in results {
        state.push(v);
    }
    Ok(count)
}
