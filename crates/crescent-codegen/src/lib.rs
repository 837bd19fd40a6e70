//! Crescent code generator: Lua 5.3 AST to register-machine bytecode.

pub mod ast;
pub mod codegen;
pub mod disasm;
pub mod opcode;
pub mod proto;
