use anyhow::{Result, bail};

use crate::assembler::{Artifact, Instruction, OperandWidth};
use crate::cpool::PoolValue;

/// Single version byte at the start of every `.abf` container.
pub const ABI_VERSION: u8 = 4;

/// Serializes an assembled program into the big-endian ABI v4 container:
/// version byte, trigger table, method table, constant pool, then the flat
/// instruction stream. Labels are compiler-internal and contribute nothing.
pub fn encode(artifact: &Artifact) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.push(ABI_VERSION);

    let trigger_count = u16::try_from(artifact.triggers.len())
        .map_err(|_| anyhow::anyhow!("too many triggers to encode"))?;
    put_u16(&mut out, trigger_count);
    for trigger in &artifact.triggers {
        put_i32(&mut out, trigger.listener_id);
        put_i32(&mut out, trigger.entry_address);
        let value_count = i8::try_from(trigger.values.len())
            .map_err(|_| anyhow::anyhow!("too many trigger values to encode"))?;
        put_i8(&mut out, value_count);
        for value in &trigger.values {
            put_value(&mut out, value)?;
        }
    }

    let method_count = u16::try_from(artifact.methods.len())
        .map_err(|_| anyhow::anyhow!("too many methods to encode"))?;
    put_u16(&mut out, method_count);
    for method in &artifact.methods {
        let index = i16::try_from(method.index)
            .map_err(|_| anyhow::anyhow!("method index {} exceeds i16", method.index))?;
        put_i16(&mut out, index);
        put_i32(&mut out, method.entry_address);
    }

    let pool_count = i16::try_from(artifact.cpool.len())
        .map_err(|_| anyhow::anyhow!("constant pool exceeds i16 entries"))?;
    put_i16(&mut out, pool_count);
    for value in artifact.cpool.values() {
        put_value(&mut out, value)?;
    }

    let instruction_count: usize = artifact.methods.iter().map(|m| m.encoded_len()).sum();
    let instruction_count = i32::try_from(instruction_count)
        .map_err(|_| anyhow::anyhow!("instruction stream exceeds i32 entries"))?;
    put_i32(&mut out, instruction_count);

    for method in &artifact.methods {
        for instruction in &method.code {
            let Instruction::Op(opcode, operand) = instruction else {
                continue;
            };
            out.push(*opcode as u8);
            match opcode.operand_width() {
                OperandWidth::None => {}
                OperandWidth::Short => {
                    let operand = i16::try_from(*operand).map_err(|_| {
                        anyhow::anyhow!(
                            "{} operand {} exceeds i16",
                            opcode.mnemonic(),
                            operand
                        )
                    })?;
                    put_i16(&mut out, operand);
                }
                OperandWidth::Wide => put_i32(&mut out, *operand),
            }
        }
    }

    Ok(out)
}

fn put_value(out: &mut Vec<u8>, value: &PoolValue) -> Result<()> {
    match value {
        PoolValue::I32(v) => {
            put_i8(out, 0);
            put_i32(out, *v);
        }
        PoolValue::I64(v) => {
            put_i8(out, 1);
            put_i64(out, *v);
        }
        PoolValue::Str(v) => {
            let bytes = v.as_bytes();
            let Ok(length) = u16::try_from(bytes.len()) else {
                bail!("string constant of {} bytes exceeds u16 length", bytes.len());
            };
            put_i8(out, 2);
            put_u16(out, length);
            out.extend_from_slice(bytes);
        }
    }
    Ok(())
}

fn put_i8(out: &mut Vec<u8>, value: i8) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_be_bytes());
}
