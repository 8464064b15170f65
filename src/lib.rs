//! `embergo`: a bytecode compiler and stack-based virtual machine for an
//! embeddable, dynamically-typed scripting language.
//!
//! An embedder drives the pipeline in three steps: build a
//! [`modules::ModuleMap`] describing what `import(...)` can resolve,
//! [`compiler::compile`] an already-parsed [`compiler::ast::Program`]
//! against it into a [`bytecode::Bytecode`], then hand that to
//! [`vm::Vm::new`] and call [`vm::Vm::run`]. Lexing and parsing a
//! surface syntax into that `Program` is out of scope here
//! -- this crate starts from the AST.

pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod modules;
pub mod opcode;
pub mod symtab;
pub mod value;
pub mod vm;

pub use bytecode::Bytecode;
pub use compiler::{compile, CompilerOptions};
pub use modules::{ExtImporter, ModuleKind, ModuleMap};
pub use value::Value;
pub use vm::{AbortHandle, RunError, VMOptions, Vm};
