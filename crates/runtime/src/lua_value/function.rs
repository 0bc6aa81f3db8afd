//! Compile-time function artifacts: a compiled prototype and the
//! runtime closure that pairs one with captured upvalues.

use crate::gc::UpvalueId;
use crate::lua_value::LuaValue;
use crate::lua_vm::opcode::Instruction;
use std::rc::Rc;

/// Where a closure's upvalue comes from at `CLOSURE` time: a slot in the
/// *defining* function's own frame, or an entry already captured in the
/// defining function's own upvalue vector.
#[derive(Clone, Copy, Debug)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u32,
}

/// One compiled function body. Prototypes form a DAG (a function's
/// source text strictly contains its children's), so they are never
/// cyclic and are kept alive by plain `Rc` ownership from the closures
/// that reference them rather than as separate GC-arena objects — a
/// closure keeps its prototype alive for as long as the closure lives,
/// which `Rc` already guarantees without adding prototypes to the
/// traced object graph.
pub struct Prototype {
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub child_protos: Vec<Rc<Prototype>>,
    pub upvalues: Vec<UpvalueDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub source_name: Rc<str>,
    /// `line_info[pc]` is the source line the instruction at `pc` was
    /// compiled from, used for error messages.
    pub line_info: Vec<u32>,
}

impl Prototype {
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }
}

/// Runtime pairing of a prototype with its captured upvalues. Host
/// functions are represented separately in `gc::FunctionKind` since they
/// have no prototype at all.
pub struct LuaClosure {
    pub proto: Rc<Prototype>,
    pub upvalues: Vec<UpvalueId>,
}
