//! Batch driver: compiles every `.adr` file under `<root>/src` against
//! `<root>/runtime.arl`, mirroring outputs into `<root>/bin` with the `.abf`
//! extension. The first failure aborts the batch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::runtime::parse_manifest;
use crate::{compile_artifact, disasm, encoder};

pub fn compile_project(root: &Path, dump_asm: bool) -> Result<usize> {
    let manifest_path = root.join("runtime.arl");
    let manifest_text = fs::read_to_string(&manifest_path)
        .with_context(|| format!("Reading {}", manifest_path.display()))?;
    let manifest = parse_manifest(&manifest_text)
        .with_context(|| format!("Parsing {}", manifest_path.display()))?;

    let src_dir = root.join("src");
    let bin_dir = root.join("bin");
    let mut compiled = 0;

    for entry in WalkDir::new(&src_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Walking {}", src_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("adr") {
            continue;
        }

        let source = fs::read_to_string(path)
            .with_context(|| format!("Reading {}", path.display()))?;
        let artifact = compile_artifact(&source, &manifest)
            .with_context(|| format!("Compiling {}", path.display()))?;
        if dump_asm {
            println!("; {}", path.display());
            println!("{}", disasm::disassemble(&artifact, &manifest));
        }
        let bytes = encoder::encode(&artifact)
            .with_context(|| format!("Encoding {}", path.display()))?;

        let relative = path
            .strip_prefix(&src_dir)
            .expect("walked path is under the source directory");
        let output = bin_dir.join(relative).with_extension("abf");
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating {}", parent.display()))?;
        }
        write_atomically(&output, &bytes)?;
        compiled += 1;
    }

    Ok(compiled)
}

/// Writes through a sibling temp file and renames it into place, so readers
/// never observe a half-written artifact.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("abf.tmp");
    fs::write(&tmp, bytes).with_context(|| format!("Writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Moving {} into place", path.display()))?;
    Ok(())
}
