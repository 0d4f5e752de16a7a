//! `adderc` library crate.
//!
//! High-level layout:
//! - frontend: `lexer` + `parser` produce the AST (`ast`)
//! - resolution: `analyzer` binds the AST against the host `runtime`
//!   manifest and produces the typed program
//! - backend: `assembler` lowers to labeled instructions and the interned
//!   `cpool`; `encoder` serializes the ABI v4 container
//! - tooling: `pretty` (source printer), `disasm` (listing printer),
//!   `project` (batch driver)
pub mod analyzer;
pub mod assembler;
pub mod ast;
pub mod cpool;
pub mod disasm;
pub mod encoder;
pub mod lexer;
pub mod parser;
pub mod pretty;
pub mod project;
pub mod runtime;
pub mod token;
pub mod types;

use anyhow::Result;

use assembler::Artifact;
use runtime::RuntimeManifest;

/// Runs the pipeline up to assembly, for callers that want to inspect or
/// disassemble the program before encoding.
pub fn compile_artifact(source: &str, manifest: &RuntimeManifest) -> Result<Artifact> {
    let tokens = lexer::tokenize(source)?;
    let items = parser::parse(source, tokens)?;
    let program = analyzer::analyze(manifest, &items)?;
    assembler::assemble(&program)
}

/// Compiles one source file to ABI v4 container bytes.
pub fn compile_source(source: &str, manifest: &RuntimeManifest) -> Result<Vec<u8>> {
    let artifact = compile_artifact(source, manifest)?;
    encoder::encode(&artifact)
}
