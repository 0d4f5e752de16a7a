use std::path::PathBuf;

use anyhow::{Result, bail};

use adderc::project;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut dump_asm = false;
    let mut project_dir: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-asm" => {
                dump_asm = true;
            }
            _ => {
                project_dir = Some(PathBuf::from(arg));
                if args.next().is_some() {
                    bail!("Only one project directory is supported");
                }
                break;
            }
        }
    }

    let Some(root) = project_dir else {
        bail!("Usage: adderc [--dump-asm] <project_directory>");
    };

    let compiled = project::compile_project(&root, dump_asm)?;
    eprintln!("Compiled {compiled} script(s) into {}", root.join("bin").display());
    Ok(())
}
