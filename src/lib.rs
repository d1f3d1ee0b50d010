//! Sable - an ahead-of-time compiler for the Sable language.
//!
//! The pipeline is strictly linear: source bytes are parsed into an AST,
//! lowered to a typed IR, and handed to the Cranelift backend for object
//! emission. `Compiler` is the front door for all of it.

pub mod backend;
pub mod codegen;
pub mod ir;
pub mod lexer;
pub mod optimize;
pub mod parser;

use std::error::Error;
use std::fmt;

use parser::ast::DeclarationSequence;
use parser::{ParseError, Parser};

/// Compiler version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main compiler interface.
pub struct Compiler {
    /// Run the IR pass pipeline and raise the backend optimization level.
    pub optimize: bool,
}

impl Compiler {
    pub fn new() -> Self {
        Self { optimize: false }
    }

    pub fn with_optimization(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Parse source text into a declaration sequence.
    pub fn parse_source(&self, source: &str) -> Result<DeclarationSequence, CompileError> {
        let mut parser = Parser::new(source);
        parser.parse_program().map_err(CompileError::Parse)
    }

    /// Compile source text into an IR module.
    pub fn compile_source(
        &self,
        source: &str,
        module_name: &str,
    ) -> Result<ir::Module, CompileError> {
        let sequence = self.parse_source(source)?;
        self.compile_sequence(&sequence, module_name)
    }

    /// Lower a parsed sequence into an IR module, running the optimization
    /// pipeline when requested.
    pub fn compile_sequence(
        &self,
        sequence: &DeclarationSequence,
        module_name: &str,
    ) -> Result<ir::Module, CompileError> {
        let mut lowering = codegen::Lowering::new();
        let mut module = lowering.lower_sequence(sequence, module_name)?;
        if self.optimize {
            optimize::PassManager::standard().run(&mut module)?;
        }
        Ok(module)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Compilation errors, by pipeline stage.
#[derive(Debug)]
pub enum CompileError {
    /// The deepest parse error.
    Parse(ParseError),
    /// Lowering rejected the program.
    Codegen(String),
    /// The IR handed to the backend is malformed.
    InvalidIr(String),
    /// The backend could not produce native code.
    Backend(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(error) => write!(f, "{}", error),
            CompileError::Codegen(message) => write!(f, "codegen error: {}", message),
            CompileError::InvalidIr(message) => write!(f, "invalid IR: {}", message),
            CompileError::Backend(message) => write!(f, "backend error: {}", message),
        }
    }
}

impl Error for CompileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CompileError::Parse(error) => Some(error),
            _ => None,
        }
    }
}
