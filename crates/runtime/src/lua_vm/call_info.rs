//! Activation records for each Lua or host function call on the stack.

use crate::gc::FunctionId;

/// Where a call's "extra" arguments (beyond the declared parameter
/// count of a vararg function) live on the stack, so `VARARG` can copy
/// them without re-deriving the count from the prototype every time.
#[derive(Clone, Copy, Debug)]
pub struct VarargInfo {
    pub base: usize,
    pub count: usize,
}

#[derive(Clone, Copy, Debug)]
pub enum ExpectedResults {
    Exact(usize),
    All,
}

pub struct CallInfo {
    pub closure: FunctionId,
    /// Stack index of register 0 for this activation.
    pub base: usize,
    /// This frame's own instruction pointer, advanced as dispatch runs.
    pub pc: usize,
    pub expected_results: ExpectedResults,
    pub varargs: Option<VarargInfo>,
    /// True when this frame was pushed by `call`/`pcall` entry from the
    /// host rather than a Lua `CALL` instruction; used to know where to
    /// stop unwinding on error.
    pub is_protected_boundary: bool,
}
