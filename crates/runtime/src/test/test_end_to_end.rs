use crate::{LuaState, LuaValue};

fn run(source: &str) -> Vec<LuaValue> {
    let mut state = LuaState::new();
    state.open_libs();
    state.do_string(source).expect("script runs without error")
}

#[test]
fn fibonacci_via_recursive_local_function() {
    let r = run(
        r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        return fib(10)
        "#,
    );
    assert_eq!(r[0].as_number(), Some(55.0));
}

#[test]
fn pcall_isolates_a_failing_script_from_the_host() {
    let mut state = LuaState::new();
    state.open_libs();
    let r = state
        .do_string(
            r#"
            local ok, err = pcall(function()
                local t = nil
                return t.field
            end)
            return ok, err
            "#,
        )
        .expect("do_string itself succeeds even though the inner call fails");
    assert!(matches!(r[0], LuaValue::Boolean(false)));
    assert!(r[1].is_string());
}

#[test]
fn object_oriented_style_via_metatables_and_colon_calls() {
    let r = run(
        r#"
        local Account = {}
        Account.__index = Account

        function Account.new(balance)
            return setmetatable({ balance = balance }, Account)
        end

        function Account:deposit(amount)
            self.balance = self.balance + amount
        end

        function Account:get()
            return self.balance
        end

        local a = Account.new(100)
        a:deposit(50)
        return a:get()
        "#,
    );
    assert_eq!(r[0].as_number(), Some(150.0));
}

#[test]
fn closures_over_a_loop_variable_each_capture_their_own_binding() {
    let r = run(
        r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        return fns[1](), fns[2](), fns[3]()
        "#,
    );
    assert_eq!(r[0].as_number(), Some(1.0));
    assert_eq!(r[1].as_number(), Some(2.0));
    assert_eq!(r[2].as_number(), Some(3.0));
}

#[test]
fn string_library_free_concatenation_and_coercion_round_trip() {
    let mut state = LuaState::new();
    state.open_libs();
    let r = state
        .do_string(
            r#"
            local parts = {}
            for i = 1, 5 do
                parts[i] = tostring(i)
            end
            local out = ""
            for i = 1, #parts do
                out = out .. parts[i]
            end
            return out
            "#,
        )
        .unwrap();
    assert_eq!(state.tostring_value(r[0]), "12345");
}

#[test]
fn unhandled_runtime_error_propagates_to_the_host_as_an_error() {
    let mut state = LuaState::new();
    state.open_libs();
    let err = state
        .do_string("local x = nil\nreturn x + 1")
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains(':'));
}

#[test]
fn a_table_used_as_a_simple_stack() {
    let r = run(
        r#"
        local stack = {}
        local function push(v) stack[#stack + 1] = v end
        local function pop()
            local v = stack[#stack]
            stack[#stack] = nil
            return v
        end
        push(1)
        push(2)
        push(3)
        local a = pop()
        local b = pop()
        return a, b, #stack
        "#,
    );
    assert_eq!(r[0].as_number(), Some(3.0));
    assert_eq!(r[1].as_number(), Some(2.0));
    assert_eq!(r[2].as_number(), Some(1.0));
}
