//! Lua 5.1-compatible lexer, parser, bytecode compiler, register VM and
//! tracing garbage collector, organized into `gc`, `lua_value`, `lua_vm`,
//! `compiler`, and `stdlib` modules.

pub mod compiler;
pub mod gc;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use gc::{FunctionId, StringId, TableId, UpvalueId};
pub use lua_value::{LuaClosure, LuaString, LuaTable, LuaValue, Prototype};
pub use lua_vm::{CFunction, ErrorKind, LuaError, LuaResult, LuaState};

#[cfg(test)]
mod test;
