//! Code generation backends. The core's codegen only needs a collaborator
//! that can turn an IR module into relocatable object bytes; Cranelift is
//! the one shipped here.

#[cfg(feature = "cranelift-backend")]
pub mod cranelift;

use crate::ir::Module;
use crate::CompileError;

pub trait Backend {
    /// Generate relocatable object bytes from IR.
    fn generate(&self, module: &Module) -> Result<Vec<u8>, CompileError>;

    fn name(&self) -> &'static str;

    fn supported_targets(&self) -> &[&str];
}
