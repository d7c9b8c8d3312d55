//! Compiled-function descriptors and the wordcode format they carry.

pub mod assembler;
pub mod constant;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod lnotab;
pub mod opcode;
pub mod schema;
pub mod source;

pub use assembler::{Assembler, Label};
pub use constant::Constant;
pub use descriptor::{ByteField, CodeDescriptor, CompiledCallable, DescriptorLayout};
pub use error::CodeError;
pub use format::format_descriptor;
pub use opcode::{decode_instructions, CompareOp, Instruction, Opcode};
pub use schema::{FieldError, Record, Schema, SchemaValidator, StructuralValidator};
pub use source::{DescriptorSource, FileSource, MemorySource};
