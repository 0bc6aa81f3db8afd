use crate::gc::{GcRoots, ObjectPool};
use crate::LuaState;

#[test]
fn unreachable_cyclic_tables_are_collected() {
    let mut pool = ObjectPool::new();
    let globals = pool.new_table();

    let a = pool.new_table();
    let b = pool.new_table();
    let a_val = crate::LuaValue::Table(a);
    let b_val = crate::LuaValue::Table(b);
    let key = pool.intern_string("other");
    pool.get_table_mut(a).set(crate::LuaValue::String(key), b_val);
    pool.get_table_mut(b).set(crate::LuaValue::String(key), a_val);

    // Nothing on the stack or in globals points at `a`/`b` anymore; the
    // cycle between them must not keep either alive.
    pool.collect(GcRoots {
        stack: &[],
        globals,
        frame_closures: &[],
        open_upvalues: &[],
    });

    assert!(!pool.tables.is_live(a.0));
    assert!(!pool.tables.is_live(b.0));
}

#[test]
fn reachable_table_survives_collection() {
    let mut pool = ObjectPool::new();
    let globals = pool.new_table();
    let kept = pool.new_table();
    let key = pool.intern_string("kept");
    pool.get_table_mut(globals).set(crate::LuaValue::String(key), crate::LuaValue::Table(kept));

    pool.collect(GcRoots {
        stack: &[],
        globals,
        frame_closures: &[],
        open_upvalues: &[],
    });

    assert!(pool.tables.is_live(kept.0));
}

#[test]
fn interned_strings_are_deduplicated() {
    let mut pool = ObjectPool::new();
    let a = pool.intern_string("same");
    let b = pool.intern_string("same");
    assert_eq!(a.0, b.0);
}

#[test]
fn unreferenced_interned_string_is_freed_on_collection() {
    let mut pool = ObjectPool::new();
    let globals = pool.new_table();
    let id = pool.intern_string("throwaway");

    pool.collect(GcRoots {
        stack: &[],
        globals,
        frame_closures: &[],
        open_upvalues: &[],
    });

    assert!(!pool.strings.is_live(id.0));
    // A fresh intern of the same text must get a different id: the
    // previous slot was swept and no longer appears in the interner.
    let id2 = pool.intern_string("throwaway");
    assert!(pool.strings.is_live(id2.0));
}

#[test]
fn collect_through_lua_state_increases_collections_run() {
    let mut state = LuaState::new();
    state.open_libs();
    state
        .do_string(
            r#"
            for i = 1, 50 do
                local t = { i, i * 2, "garbage" .. i }
            end
            "#,
        )
        .unwrap();
    let before = state.pool.collections_run();
    state.collect();
    assert_eq!(state.pool.collections_run(), before + 1);
}

#[test]
fn values_reachable_only_through_an_open_upvalue_survive() {
    let mut pool = ObjectPool::new();
    let globals = pool.new_table();
    let held = pool.new_table();
    let up = pool.new_open_upvalue(0);
    let stack = vec![crate::LuaValue::Table(held)];

    pool.collect(GcRoots {
        stack: &stack,
        globals,
        frame_closures: &[],
        open_upvalues: &[up],
    });

    assert!(pool.tables.is_live(held.0));
}
