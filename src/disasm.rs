//! Human-readable listing of an assembled program, printed by the CLI's
//! `--dump-asm` flag.

use std::fmt::Write;

use crate::assembler::{Artifact, Instruction, Opcode};
use crate::cpool::PoolValue;
use crate::runtime::RuntimeManifest;

pub fn disassemble(artifact: &Artifact, manifest: &RuntimeManifest) -> String {
    let mut out = String::new();

    out.push_str("methods:\n");
    for method in &artifact.methods {
        writeln!(
            out,
            "    {}: {} ({} instructions, entry {})",
            method.index,
            method.name,
            method.encoded_len(),
            method.entry_address
        )
        .unwrap();
        for (slot, name) in method.local_names.iter().enumerate() {
            let role = if slot < method.params {
                "parameter"
            } else {
                "local"
            };
            writeln!(out, "        {role} {slot}: {name}").unwrap();
        }
    }

    out.push_str("\ncode:\n");
    let mut address = 0;
    for method in &artifact.methods {
        writeln!(out, "    {}:", method.name).unwrap();
        for instruction in &method.code {
            match instruction {
                Instruction::Label(_) => {
                    writeln!(out, "    L{address}:").unwrap();
                }
                Instruction::Op(opcode, operand) => {
                    let comment = describe_operand(artifact, manifest, method, *opcode, *operand);
                    match (opcode.operand_width(), comment) {
                        (crate::assembler::OperandWidth::None, _) => {
                            writeln!(out, "    {address:04}: {}", opcode.mnemonic()).unwrap();
                        }
                        (_, Some(comment)) => {
                            writeln!(
                                out,
                                "    {address:04}: {} {operand}\t; {comment}",
                                opcode.mnemonic()
                            )
                            .unwrap();
                        }
                        (_, None) => {
                            writeln!(out, "    {address:04}: {} {operand}", opcode.mnemonic())
                                .unwrap();
                        }
                    }
                    address += 1;
                }
            }
        }
        out.push('\n');
    }

    if !artifact.triggers.is_empty() {
        out.push_str("triggers:\n");
        for trigger in &artifact.triggers {
            writeln!(
                out,
                "    listener {} -> entry {}, values [{}]",
                trigger.listener_id,
                trigger.entry_address,
                trigger
                    .values
                    .iter()
                    .map(describe_value)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
            .unwrap();
        }
    }

    out
}

fn describe_operand(
    artifact: &Artifact,
    manifest: &RuntimeManifest,
    method: &crate::assembler::AssembledMethod,
    opcode: Opcode,
    operand: i32,
) -> Option<String> {
    match opcode {
        Opcode::PushConst => artifact
            .cpool
            .get(usize::try_from(operand).ok()?)
            .map(describe_value),
        Opcode::NativeCall => manifest
            .find_function_by_id(operand)
            .map(|function| function.name.clone()),
        Opcode::GetLocal | Opcode::SetLocal => method
            .local_names
            .get(usize::try_from(operand).ok()?)
            .cloned(),
        _ => None,
    }
}

fn describe_value(value: &PoolValue) -> String {
    match value {
        PoolValue::I32(v) => format!("int {v}"),
        PoolValue::I64(v) => format!("long {v}"),
        PoolValue::Str(v) => format!("string {v:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::assembler::assemble;
    use crate::lexer::tokenize;
    use crate::parser;
    use crate::runtime::parse_manifest;
    use indoc::indoc;

    #[test]
    fn lists_methods_code_and_triggers() {
        let manifest = parse_manifest(indoc! {"
            listener jump(int height) -> 7;
            void log(string message) -> 3;
        "})
        .expect("manifest should parse");
        let source = indoc! {r#"
            on jump(42) {
                int x = 1;
                log("up");
            }
        "#};
        let tokens = tokenize(source).expect("tokenize");
        let items = parser::parse(source, tokens).expect("parse");
        let program = analyze(&manifest, &items).expect("analyze");
        let artifact = assemble(&program).expect("assemble");

        let listing = disassemble(&artifact, &manifest);
        assert!(listing.contains("@jump@42@0"), "got:\n{listing}");
        assert!(listing.contains("PUSHCONST 0\t; int 1"), "got:\n{listing}");
        assert!(listing.contains("NATIVECALL 3\t; log"), "got:\n{listing}");
        assert!(listing.contains("SETLOCAL 0\t; x"), "got:\n{listing}");
        assert!(
            listing.contains("listener 7 -> entry 0, values [long 42]"),
            "got:\n{listing}"
        );
        assert!(listing.contains("RETURN"), "got:\n{listing}");
    }
}
