//! The compiler's output type.

use crate::opcode::Instruction;
use crate::value::{SourcePos, Value};

/// A compiled function body: instructions, shape (arity/locals/variadic/
/// free-count), and a source-position table addressed in parallel with
/// `instructions` for error reporting.
#[derive(Debug)]
pub struct CompiledFunction {
    pub instructions: Vec<Instruction>,
    pub num_params: u32,
    /// Number of leading parameters a caller must supply: `num_params` minus
    /// however many trailing parameters declared a default value. A
    /// non-variadic call is valid for any argument count in
    /// `[num_required_params, num_params]`; missing trailing slots are
    /// left `Undefined` for the function prologue's own per-parameter
    /// default-value check to fill in. Arities outside that range raise
    /// `WrongNumberOfArguments`.
    pub num_required_params: u32,
    /// Includes parameters; the frame allocates exactly this many local
    /// slots.
    pub num_locals: u32,
    pub variadic: bool,
    pub num_free: u32,
    /// Largest operand-stack depth reached while compiling this function,
    /// tracked instruction-by-instruction via `opcode::stack_effect`. Lets
    /// the VM size a frame's stack window up front instead of growing a
    /// shared stack reactively.
    pub max_stack_size: u32,
    pub positions: Vec<SourcePos>,
    /// Purely diagnostic; not used by execution.
    pub name: Option<String>,
}

impl CompiledFunction {
    pub fn position_of(&self, ip: usize) -> Option<SourcePos> {
        self.positions.get(ip).copied()
    }
}

/// The compiler's complete output for one module.
#[derive(Debug)]
pub struct Bytecode {
    pub main: CompiledFunction,
    pub constants: Vec<Value>,
    /// Width of the VM's module-cache slot array.
    pub num_modules: u32,
    /// The module path this bytecode was compiled from, for error
    /// reporting.
    pub module_path: String,
}
