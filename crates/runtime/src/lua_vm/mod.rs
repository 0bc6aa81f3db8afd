//! Register-based virtual machine, split into `state` (the public VM
//! handle), `dispatch` (the instruction loop), `error` and `limits`
//! (the error model and configurable limits), and `call_info` (activation
//! records) — all operating over a single `f64` number domain.

pub mod call_info;
pub mod dispatch;
pub mod error;
pub mod limits;
pub mod metamethod;
pub mod opcode;
mod state;

pub use call_info::{CallInfo, ExpectedResults, VarargInfo};
pub use error::{ErrorKind, LuaError, LuaResult};
pub use opcode::{Instruction, OpCode};
pub use state::LuaState;

/// A host function: given a view of the VM state (arguments sit at the
/// top of the stack, pushed by the caller), returns how many result
/// values it left on the stack, which stay on the stack rather than
/// being collected into a separate multi-value type.
pub type CFunction = fn(&mut LuaState) -> LuaResult<usize>;
