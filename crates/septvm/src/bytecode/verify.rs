//! Bytecode verification.
//!
//! Runs at module installation over every code block, whether it came from a
//! module file or a builder. The verifier walks the instruction stream once
//! to decode instruction boundaries and validate operands, then runs a
//! worklist dataflow over stack depths. Its output is the block's declared
//! `max_stack`; its failures are all `EMalformedModuleFile`.
//!
//! Verification is what lets the interpreter treat stack underflow as a
//! fatal VM bug rather than a recoverable error: verified code cannot
//! underflow, so an underflow at run time means the VM itself is broken.

use super::op::{ARG_KNOWN_BITS, ARG_NAMED, Opcode, SLOT_KNOWN_BITS};
use crate::{
    exceptions::{ExcType, SepResult},
    module::{BlockImage, ConstantValue},
};

/// One decoded instruction, reduced to what the dataflow needs.
#[derive(Debug)]
struct DecodedInstr {
    /// Offset just past this instruction.
    end: usize,
    pops: usize,
    pushes: usize,
    /// Absolute branch target, if any.
    branch_target: Option<usize>,
    /// Handler entry point registered by `PushHandler`.
    handler_target: Option<usize>,
    /// True when control never falls through (`Branch`, `Return`, `Raise`).
    terminator: bool,
}

fn read_u16(code: &[u8], at: usize) -> SepResult<u16> {
    match code.get(at..at + 2) {
        Some(&[lo, hi]) => Ok(u16::from_le_bytes([lo, hi])),
        _ => Err(ExcType::malformed_module("truncated instruction")),
    }
}

fn read_u8(code: &[u8], at: usize) -> SepResult<u8> {
    code.get(at)
        .copied()
        .ok_or_else(|| ExcType::malformed_module("truncated instruction"))
}

fn check_name_constant(constants: &[ConstantValue], index: u16) -> SepResult<()> {
    match constants.get(usize::from(index)) {
        Some(ConstantValue::Str(_)) => Ok(()),
        Some(_) => Err(ExcType::malformed_module("name operand refers to a non-string constant")),
        None => Err(ExcType::malformed_module("constant index out of range")),
    }
}

/// Verifies one block and returns its `max_stack`.
pub(crate) fn verify_block(image: &BlockImage, constants: &[ConstantValue], block_count: usize) -> SepResult<u16> {
    for (index, param) in image.params.iter().enumerate() {
        check_name_constant(constants, param.name)?;
        if let Some(block) = param.default_block
            && usize::from(block) >= block_count
        {
            return Err(ExcType::malformed_module("default thunk block index out of range"));
        }
        // Names may be equal through distinct pool entries, so compare text.
        let text = &constants[usize::from(param.name)];
        if image.params[..index]
            .iter()
            .any(|earlier| &constants[usize::from(earlier.name)] == text)
        {
            return Err(ExcType::malformed_module("duplicate parameter name"));
        }
    }

    let code = &image.code;
    if code.is_empty() {
        return Err(ExcType::malformed_module("empty code block"));
    }

    // Pass 1: decode instruction boundaries and validate operands.
    let mut instrs: Vec<DecodedInstr> = Vec::new();
    let mut index_at_offset: Vec<Option<usize>> = vec![None; code.len()];
    let mut offset = 0usize;
    while offset < code.len() {
        index_at_offset[offset] = Some(instrs.len());
        let opcode = Opcode::from_repr(code[offset])
            .ok_or_else(|| ExcType::malformed_module(format!("unknown opcode 0x{:02x}", code[offset])))?;
        let operands_at = offset + 1;

        let mut end = operands_at + opcode.operand_bytes().unwrap_or(0);
        let mut pops = 0usize;
        let mut pushes = 0usize;
        let mut branch_target = None;
        let mut handler_target = None;
        let mut terminator = false;

        match opcode {
            Opcode::Nop => {}
            Opcode::Pop => pops = 1,
            Opcode::PushConst => {
                let index = read_u16(code, operands_at)?;
                if usize::from(index) >= constants.len() {
                    return Err(ExcType::malformed_module("constant index out of range"));
                }
                pushes = 1;
            }
            Opcode::PushLocal => {
                check_name_constant(constants, read_u16(code, operands_at)?)?;
                pushes = 1;
            }
            Opcode::StoreLocal => {
                check_name_constant(constants, read_u16(code, operands_at)?)?;
                pops = 1;
            }
            Opcode::CreateSlot => {
                check_name_constant(constants, read_u16(code, operands_at)?)?;
                let flags = read_u8(code, operands_at + 2)?;
                if flags & !SLOT_KNOWN_BITS != 0 {
                    return Err(ExcType::malformed_module("unknown slot flags"));
                }
                pops = 1;
            }
            Opcode::FetchProp => {
                check_name_constant(constants, read_u16(code, operands_at)?)?;
                pops = 1;
                pushes = 1;
            }
            Opcode::StoreProp => {
                check_name_constant(constants, read_u16(code, operands_at)?)?;
                pops = 2;
            }
            Opcode::Call => {
                let argc = read_u8(code, operands_at)?;
                let mut cursor = operands_at + 1;
                for _ in 0..argc {
                    let flags = read_u8(code, cursor)?;
                    cursor += 1;
                    if flags & !ARG_KNOWN_BITS != 0 {
                        return Err(ExcType::malformed_module("unknown argument record flags"));
                    }
                    if flags & ARG_NAMED != 0 {
                        check_name_constant(constants, read_u16(code, cursor)?)?;
                        cursor += 2;
                    }
                }
                end = cursor;
                pops = usize::from(argc) + 1;
                pushes = 1;
            }
            Opcode::Return => {
                pops = 1;
                terminator = true;
            }
            Opcode::CreateFunc | Opcode::Lazy => {
                let block = read_u16(code, operands_at)?;
                if usize::from(block) >= block_count {
                    return Err(ExcType::malformed_module("function block index out of range"));
                }
                pushes = 1;
            }
            Opcode::Branch => {
                let rel = read_u16(code, operands_at)? as i16;
                branch_target = Some(absolute_target(end, rel, code.len())?);
                terminator = true;
            }
            Opcode::BranchIf | Opcode::BranchIfNot => {
                let rel = read_u16(code, operands_at)? as i16;
                branch_target = Some(absolute_target(end, rel, code.len())?);
                pops = 1;
            }
            Opcode::PushHandler => {
                let target = read_u16(code, operands_at)?;
                if usize::from(target) >= code.len() {
                    return Err(ExcType::malformed_module("handler target out of range"));
                }
                handler_target = Some(usize::from(target));
            }
            Opcode::PopHandler => {}
            Opcode::Raise => {
                pops = 1;
                terminator = true;
            }
        }

        if end > code.len() {
            return Err(ExcType::malformed_module("truncated instruction"));
        }
        instrs.push(DecodedInstr {
            end,
            pops,
            pushes,
            branch_target,
            handler_target,
            terminator,
        });
        offset = end;
    }

    let instr_at = |target: usize| -> SepResult<usize> {
        index_at_offset
            .get(target)
            .copied()
            .flatten()
            .ok_or_else(|| ExcType::malformed_module("jump into the middle of an instruction"))
    };

    // Pass 2: worklist dataflow over stack depths.
    let mut depth_at: Vec<Option<usize>> = vec![None; instrs.len()];
    let mut work_list = vec![0usize];
    depth_at[0] = Some(0);
    let mut max_stack = 0usize;

    let flow_to = |depth_at: &mut Vec<Option<usize>>, work_list: &mut Vec<usize>, target: usize, depth: usize| {
        match depth_at[target] {
            Some(existing) if existing != depth => Err(ExcType::malformed_module("inconsistent stack depth")),
            Some(_) => Ok(()),
            None => {
                depth_at[target] = Some(depth);
                work_list.push(target);
                Ok(())
            }
        }
    };

    while let Some(index) = work_list.pop() {
        let instr = &instrs[index];
        let depth = depth_at[index].expect("worklist entry without a depth");
        if depth < instr.pops {
            return Err(ExcType::malformed_module("operand stack underflow"));
        }
        let after = depth - instr.pops + instr.pushes;
        max_stack = max_stack.max(after);

        if let Some(target) = instr.branch_target {
            flow_to(&mut depth_at, &mut work_list, instr_at(target)?, after)?;
        }
        if let Some(target) = instr.handler_target {
            // A caught exception truncates to the recorded depth and pushes
            // the exception, so the handler entry sees one extra value.
            flow_to(&mut depth_at, &mut work_list, instr_at(target)?, after + 1)?;
        }
        if !instr.terminator {
            let Some(next) = index_at_offset.get(instr.end).copied().flatten() else {
                return Err(ExcType::malformed_module("control flow runs off the end of the block"));
            };
            flow_to(&mut depth_at, &mut work_list, next, after)?;
        }
    }

    u16::try_from(max_stack).map_err(|_| ExcType::malformed_module("operand stack too deep"))
}

fn absolute_target(from: usize, rel: i16, len: usize) -> SepResult<usize> {
    let target = from as i64 + i64::from(rel);
    if (0..len as i64).contains(&target) {
        Ok(usize::try_from(target).expect("target bounds already checked"))
    } else {
        Err(ExcType::malformed_module("branch target out of range"))
    }
}
