//! Compiler facade: lexer → parser → codegen.

pub(crate) mod ast;
mod codegen;
pub(crate) mod lexer;
pub(crate) mod parser;

use std::rc::Rc;

use crate::gc::ObjectPool;
use crate::lua_value::Prototype;
use crate::lua_vm::error::{LuaError, LuaResult};

use codegen::Codegen;
use parser::Parser;

pub struct Compiler;

impl Compiler {
    /// Compiles `source` into a chunk prototype. The parser collects a
    /// full `Vec<LuaError>` across statement-boundary recovery points,
    /// but codegen never runs over a syntactically broken tree, so only
    /// the first diagnostic is surfaced here — the rest would just be
    /// noise downstream of the first real failure.
    pub fn compile(source: &str, source_name: &str, pool: &mut ObjectPool) -> LuaResult<Rc<Prototype>> {
        let parser = Parser::new(source, source_name);
        let (block, errors) = parser.parse_chunk();
        if let Some(first) = errors.into_iter().next() {
            return Err(first);
        }
        let codegen = Codegen::new(source_name, pool);
        codegen
            .compile_chunk(&block)
            .map_err(|errs| errs.into_iter().next().unwrap_or_else(|| LuaError::compile("compile error")))
    }
}
