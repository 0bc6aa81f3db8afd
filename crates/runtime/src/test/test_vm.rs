use crate::{LuaState, LuaValue};

fn eval(source: &str) -> Vec<LuaValue> {
    let mut state = LuaState::new();
    state.open_libs();
    state.do_string(source).expect("script runs without error")
}

#[test]
fn arithmetic_follows_standard_precedence() {
    let r = eval("return 2 + 3 * 4");
    assert_eq!(r[0].as_number(), Some(14.0));
}

#[test]
fn string_coercion_in_arithmetic() {
    let r = eval(r#"return "10" + 5"#);
    assert_eq!(r[0].as_number(), Some(15.0));
}

#[test]
fn concat_builds_strings_left_to_right() {
    let mut state = LuaState::new();
    state.open_libs();
    let r = state.do_string(r#"return "a" .. "b" .. "c""#).unwrap();
    assert_eq!(state.tostring_value(r[0]), "abc");
}

#[test]
fn closures_capture_locals_by_reference() {
    let r = eval(
        r#"
        local function counter()
            local n = 0
            return function()
                n = n + 1
                return n
            end
        end
        local c = counter()
        c()
        c()
        return c()
        "#,
    );
    assert_eq!(r[0].as_number(), Some(3.0));
}

#[test]
fn upvalues_shared_between_sibling_closures() {
    let r = eval(
        r#"
        local function pair()
            local n = 0
            local function inc() n = n + 1 end
            local function get() return n end
            return inc, get
        end
        local inc, get = pair()
        inc()
        inc()
        return get()
        "#,
    );
    assert_eq!(r[0].as_number(), Some(2.0));
}

#[test]
fn varargs_forward_through_call() {
    let r = eval(
        r#"
        local function sum(...)
            local s = 0
            local args = {...}
            for i = 1, #args do
                s = s + args[i]
            end
            return s
        end
        return sum(1, 2, 3, 4)
        "#,
    );
    assert_eq!(r[0].as_number(), Some(10.0));
}

#[test]
fn multiple_return_values_adjust_to_call_context() {
    let r = eval(
        r#"
        local function two() return 1, 2 end
        local a, b, c = two()
        return a, b, c
        "#,
    );
    assert_eq!(r[0].as_number(), Some(1.0));
    assert_eq!(r[1].as_number(), Some(2.0));
    assert!(r[2].is_nil());
}

#[test]
fn metatable_index_function_handles_missing_keys() {
    let r = eval(
        r#"
        local t = setmetatable({}, { __index = function(_, k) return k .. "!" end })
        return t.missing
        "#,
    );
    assert!(matches!(r[0], LuaValue::String(_)));
}

#[test]
fn metatable_add_metamethod_handles_non_numbers() {
    let mut state = LuaState::new();
    state.open_libs();
    let r = state
        .do_string(
            r#"
            local mt = { __add = function(a, b) return 42 end }
            local t = setmetatable({}, mt)
            return t + 1
            "#,
        )
        .unwrap();
    assert_eq!(r[0].as_number(), Some(42.0));
}

#[test]
fn generic_for_iterates_pairs_of_a_table() {
    let r = eval(
        r#"
        local t = { a = 1, b = 2, c = 3 }
        local count = 0
        for k, v in pairs(t) do
            count = count + v
        end
        return count
        "#,
    );
    assert_eq!(r[0].as_number(), Some(6.0));
}

#[test]
fn ipairs_stops_at_first_nil_hole() {
    let r = eval(
        r#"
        local t = {1, 2, 3}
        t[5] = 5
        local count = 0
        for i, v in ipairs(t) do
            count = count + 1
        end
        return count
        "#,
    );
    assert_eq!(r[0].as_number(), Some(3.0));
}

#[test]
fn pcall_catches_runtime_errors() {
    let r = eval(
        r#"
        local ok, err = pcall(function() error("boom") end)
        return ok, err
        "#,
    );
    assert!(matches!(r[0], LuaValue::Boolean(false)));
    assert!(r[1].is_string());
}

#[test]
fn pcall_returns_true_and_results_on_success() {
    let r = eval(
        r#"
        local ok, a, b = pcall(function() return 1, 2 end)
        return ok, a, b
        "#,
    );
    assert!(matches!(r[0], LuaValue::Boolean(true)));
    assert_eq!(r[1].as_number(), Some(1.0));
    assert_eq!(r[2].as_number(), Some(2.0));
}

#[test]
fn recursive_local_function_can_call_itself() {
    let r = eval(
        r#"
        local function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)
        end
        return fact(5)
        "#,
    );
    assert_eq!(r[0].as_number(), Some(120.0));
}

#[test]
fn while_and_repeat_loops_terminate() {
    let r = eval(
        r#"
        local i = 0
        while i < 5 do
            i = i + 1
        end
        local j = 0
        repeat
            j = j + 1
        until j >= 5
        return i, j
        "#,
    );
    assert_eq!(r[0].as_number(), Some(5.0));
    assert_eq!(r[1].as_number(), Some(5.0));
}
