use crate::LuaState;

fn run(source: &str) -> crate::LuaResult<Vec<crate::LuaValue>> {
    let mut state = LuaState::new();
    state.open_libs();
    state.do_string(source)
}

#[test]
fn constant_pool_deduplicates_equal_values() {
    let mut state = LuaState::new();
    state.open_libs();
    let result = state.do_string(
        r#"
        local a = "hi"
        local b = "hi"
        return a == b
        "#,
    );
    let values = result.expect("compiles and runs");
    assert!(matches!(values[0], crate::LuaValue::Boolean(true)));
}

#[test]
fn register_allocator_reuses_freed_slots_across_scopes() {
    let result = run(
        r#"
        do
            local a = 1
        end
        do
            local b = 2
        end
        return 1
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn numeric_for_loop_sums_correctly() {
    let result = run(
        r#"
        local sum = 0
        for i = 1, 10 do
            sum = sum + i
        end
        return sum
        "#,
    )
    .unwrap();
    assert_eq!(result[0].as_number(), Some(55.0));
}

#[test]
fn break_exits_the_innermost_loop_only() {
    let result = run(
        r#"
        local count = 0
        for i = 1, 3 do
            for j = 1, 3 do
                if j == 2 then break end
                count = count + 1
            end
        end
        return count
        "#,
    )
    .unwrap();
    assert_eq!(result[0].as_number(), Some(3.0));
}

#[test]
fn short_circuit_and_or_skip_unevaluated_side() {
    let result = run(
        r#"
        local log = {}
        local function mark(v, tag)
            log[#log + 1] = tag
            return v
        end
        local _ = mark(false, "a") and mark(true, "b")
        local _ = mark(true, "c") or mark(true, "d")
        return #log
        "#,
    )
    .unwrap();
    assert_eq!(result[0].as_number(), Some(2.0));
}

#[test]
fn compile_error_is_reported_with_location() {
    let mut state = LuaState::new();
    let err = state.do_string("local x = ").unwrap_err();
    assert!(err.to_string().contains(':'));
}
