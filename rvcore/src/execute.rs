//! Instruction semantics: one handler per [`Bytecode`] tag, operating on a
//! decoder-cache entry's already-rewritten operand bits.
//!
//! Each handler is a small, pure function of `(registers, memory, packed
//! operands)`. Faults propagate through `?` exactly as the rest of the
//! crate's fallible surface does; nothing here panics on guest-controlled
//! input.

use crate::cpu::Cpu;
use crate::decoder::{Bytecode, DecoderEntry};
use crate::error::{Kind, MachineException, Result};
use crate::memory::Memory;
use crate::rewriter::{FasterItype, FasterOpType, FasterJtype};
use crate::xlen::{Word, Xlen};

/// What happened after executing one slot, for the caller's PC bookkeeping.
pub enum Effect {
    /// PC should advance by `opcode_length`.
    Next,
    /// The handler already set PC to its final value (branch/jump taken).
    Jumped,
    /// `ECALL` requested the machine stop.
    Stop,
}

pub fn execute<X: Xlen>(
    cpu: &mut Cpu<X>,
    mem: &mut Memory<X>,
    entry: &DecoderEntry,
    pc: u64,
    on_ecall: &mut dyn FnMut(&mut Cpu<X>, &mut Memory<X>) -> Result<bool>,
) -> Result<Effect> {
    use Bytecode::*;
    match entry.handler {
        Lui => {
            let op = FasterItype::unpack(entry.bits);
            cpu.regs.set(op.rs2, X::Reg::from_i64(op.imm as i64));
            Ok(Effect::Next)
        }
        Auipc => {
            let op = FasterItype::unpack(entry.bits);
            let v = pc.wrapping_add(op.imm as i64 as u64);
            cpu.regs.set(op.rs2, X::Reg::from_u64(v));
            Ok(Effect::Next)
        }
        Jal => {
            let op = FasterJtype::unpack(entry.bits);
            let target = pc.wrapping_add(op.offset as i64 as u64);
            check_aligned(target)?;
            cpu.regs.set(op.rd, X::Reg::from_u64(pc.wrapping_add(entry.opcode_length as u64)));
            cpu.regs.pc = X::Reg::from_u64(target);
            Ok(Effect::Jumped)
        }
        FastJal => {
            let target = entry.bits;
            check_aligned(target)?;
            cpu.regs.pc = X::Reg::from_u64(target);
            Ok(Effect::Jumped)
        }
        Jalr => {
            let op = FasterItype::unpack(entry.bits);
            let base = cpu.regs.get(op.rs1).as_u64();
            let target = base.wrapping_add(op.imm as i64 as u64) & !1u64;
            check_aligned(target)?;
            cpu.regs.set(op.rs2, X::Reg::from_u64(pc.wrapping_add(entry.opcode_length as u64)));
            cpu.regs.pc = X::Reg::from_u64(target);
            Ok(Effect::Jumped)
        }
        Beq | Bne | Blt | Bge | Bltu | Bgeu => {
            let op = FasterItype::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1);
            let b = cpu.regs.get(op.rs2);
            let taken = match entry.handler {
                Beq => a == b,
                Bne => a != b,
                Blt => a.as_i64() < b.as_i64(),
                Bge => a.as_i64() >= b.as_i64(),
                Bltu => a.as_u64() < b.as_u64(),
                Bgeu => a.as_u64() >= b.as_u64(),
                _ => unreachable!(),
            };
            if taken {
                let target = pc.wrapping_add(op.imm as i64 as u64);
                check_aligned(target)?;
                cpu.regs.pc = X::Reg::from_u64(target);
                Ok(Effect::Jumped)
            } else {
                Ok(Effect::Next)
            }
        }
        Lb | Lh | Lw | Lbu | Lhu | Lwu | Ld => {
            let op = FasterItype::unpack(entry.bits);
            let addr = cpu.regs.get(op.rs1).as_u64().wrapping_add(op.imm as i64 as u64);
            let v: i64 = match entry.handler {
                Lb => mem.read_u8_cached(addr, &mut cpu.data_cache)? as i8 as i64,
                Lh => mem.read_u16_cached(addr, &mut cpu.data_cache)? as i16 as i64,
                Lw => mem.read_u32_cached(addr, &mut cpu.data_cache)? as i32 as i64,
                Lbu => mem.read_u8_cached(addr, &mut cpu.data_cache)? as i64,
                Lhu => mem.read_u16_cached(addr, &mut cpu.data_cache)? as i64,
                Lwu => mem.read_u32_cached(addr, &mut cpu.data_cache)? as i64,
                Ld => mem.read_u64_cached(addr, &mut cpu.data_cache)? as i64,
                _ => unreachable!(),
            };
            cpu.regs.set(op.rs2, X::Reg::from_i64(v));
            Ok(Effect::Next)
        }
        Sb | Sh | Sw | Sd => {
            let op = FasterItype::unpack(entry.bits);
            let addr = cpu.regs.get(op.rs1).as_u64().wrapping_add(op.imm as i64 as u64);
            let v = cpu.regs.get(op.rs2).as_u64();
            match entry.handler {
                Sb => mem.write_u8_cached(addr, v as u8, &mut cpu.data_cache)?,
                Sh => mem.write_u16_cached(addr, v as u16, &mut cpu.data_cache)?,
                Sw => mem.write_u32_cached(addr, v as u32, &mut cpu.data_cache)?,
                Sd => mem.write_u64_cached(addr, v, &mut cpu.data_cache)?,
                _ => unreachable!(),
            }
            Ok(Effect::Next)
        }
        Addi | Slti | Sltiu | Xori | Ori | Andi => {
            let op = FasterItype::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1);
            let imm = X::Reg::from_i64(op.imm as i64);
            let v = match entry.handler {
                Addi => a.wrapping_add(imm),
                Slti => bool_reg::<X>(a.as_i64() < imm.as_i64()),
                Sltiu => bool_reg::<X>(a.as_u64() < imm.as_u64()),
                Xori => a ^ imm,
                Ori => a | imm,
                Andi => a & imm,
                _ => unreachable!(),
            };
            cpu.regs.set(op.rs2, v);
            Ok(Effect::Next)
        }
        Addiw => {
            let op = FasterItype::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1).as_u64() as i32;
            let v = a.wrapping_add(op.imm);
            cpu.regs.set(op.rs2, X::Reg::from_i64(v as i64));
            Ok(Effect::Next)
        }
        Slli | Srli | Srai => {
            let op = FasterItype::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1);
            let shamt = op.imm as u32;
            let v = match entry.handler {
                Slli => a << shamt,
                Srli => a >> shamt,
                Srai => X::Reg::from_i64(a.as_i64() >> shamt),
                _ => unreachable!(),
            };
            cpu.regs.set(op.rs2, v);
            Ok(Effect::Next)
        }
        Slliw | Srliw | Sraiw => {
            let op = FasterItype::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1).as_u64() as i32;
            let shamt = (op.imm as u32) & 0x1f;
            let v = match entry.handler {
                Slliw => a.wrapping_shl(shamt),
                Srliw => ((a as u32) >> shamt) as i32,
                Sraiw => a >> shamt,
                _ => unreachable!(),
            };
            cpu.regs.set(op.rs2, X::Reg::from_i64(v as i64));
            Ok(Effect::Next)
        }
        Add | Sub | Sll | Slt | Sltu | Xor | Srl | Sra | Or | And => {
            let op = FasterOpType::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1);
            let b = cpu.regs.get(op.rs2);
            let v = match entry.handler {
                Add => a.wrapping_add(b),
                Sub => a.wrapping_sub(b),
                Sll => a << (b.as_u64() as u32 & shift_mask::<X>()),
                Slt => bool_reg::<X>(a.as_i64() < b.as_i64()),
                Sltu => bool_reg::<X>(a.as_u64() < b.as_u64()),
                Xor => a ^ b,
                Srl => a >> (b.as_u64() as u32 & shift_mask::<X>()),
                Sra => X::Reg::from_i64(a.as_i64() >> (b.as_u64() as u32 & shift_mask::<X>())),
                Or => a | b,
                And => a & b,
                _ => unreachable!(),
            };
            cpu.regs.set(op.rd, v);
            Ok(Effect::Next)
        }
        Addw | Subw | Sllw | Srlw | Sraw => {
            let op = FasterOpType::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1).as_u64() as i32;
            let b = cpu.regs.get(op.rs2).as_u64() as i32;
            let v = match entry.handler {
                Addw => a.wrapping_add(b),
                Subw => a.wrapping_sub(b),
                Sllw => a.wrapping_shl(b as u32 & 0x1f),
                Srlw => ((a as u32) >> (b as u32 & 0x1f)) as i32,
                Sraw => a >> (b as u32 & 0x1f),
                _ => unreachable!(),
            };
            cpu.regs.set(op.rd, X::Reg::from_i64(v as i64));
            Ok(Effect::Next)
        }
        Mul | Mulh | Mulhsu | Mulhu | Div | Divu | Rem | Remu => {
            let op = FasterOpType::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1);
            let b = cpu.regs.get(op.rs2);
            let v = match entry.handler {
                Mul => a.wrapping_mul(b),
                Mulh => X::Reg::from_i64(mulh(a.as_i64(), b.as_i64())),
                Mulhsu => X::Reg::from_i64(mulhsu(a.as_i64(), b.as_u64())),
                Mulhu => X::Reg::from_u64(mulhu(a.as_u64(), b.as_u64())),
                Div => {
                    if b.is_zero() {
                        X::Reg::from_i64(-1)
                    } else {
                        X::Reg::from_i64(a.as_i64().wrapping_div(b.as_i64()))
                    }
                }
                Divu => {
                    if b.is_zero() {
                        X::Reg::from_u64(u64::MAX)
                    } else {
                        X::Reg::from_u64(a.as_u64().wrapping_div(b.as_u64()))
                    }
                }
                Rem => {
                    if b.is_zero() {
                        a
                    } else {
                        X::Reg::from_i64(a.as_i64().wrapping_rem(b.as_i64()))
                    }
                }
                Remu => {
                    if b.is_zero() {
                        a
                    } else {
                        X::Reg::from_u64(a.as_u64().wrapping_rem(b.as_u64()))
                    }
                }
                _ => unreachable!(),
            };
            cpu.regs.set(op.rd, v);
            Ok(Effect::Next)
        }
        Mulw | Divw | Divuw | Remw | Remuw => {
            let op = FasterOpType::unpack(entry.bits);
            let a = cpu.regs.get(op.rs1).as_u64() as i32;
            let b = cpu.regs.get(op.rs2).as_u64() as i32;
            let v: i32 = match entry.handler {
                Mulw => a.wrapping_mul(b),
                Divw => {
                    if b == 0 {
                        -1
                    } else {
                        a.wrapping_div(b)
                    }
                }
                Divuw => {
                    if b == 0 {
                        -1i32
                    } else {
                        ((a as u32).wrapping_div(b as u32)) as i32
                    }
                }
                Remw => {
                    if b == 0 {
                        a
                    } else {
                        a.wrapping_rem(b)
                    }
                }
                Remuw => {
                    if b == 0 {
                        a
                    } else {
                        ((a as u32).wrapping_rem(b as u32)) as i32
                    }
                }
                _ => unreachable!(),
            };
            cpu.regs.set(op.rd, X::Reg::from_i64(v as i64));
            Ok(Effect::Next)
        }
        LrW | LrD => {
            let op = FasterOpType::unpack(entry.bits);
            let addr = cpu.regs.get(op.rs1).as_u64();
            let v = if entry.handler == LrW {
                mem.read_u32(addr)? as i32 as i64
            } else {
                mem.read_u64(addr)? as i64
            };
            cpu.reservation = Some(addr);
            cpu.regs.set(op.rd, X::Reg::from_i64(v));
            Ok(Effect::Next)
        }
        ScW | ScD => {
            let op = FasterOpType::unpack(entry.bits);
            let addr = cpu.regs.get(op.rs1).as_u64();
            if cpu.reservation == Some(addr) {
                let v = cpu.regs.get(op.rs2).as_u64();
                if entry.handler == ScW {
                    mem.write_u32(addr, v as u32)?;
                } else {
                    mem.write_u64(addr, v)?;
                }
                cpu.reservation = None;
                cpu.regs.set(op.rd, X::Reg::ZERO);
            } else {
                cpu.regs.set(op.rd, X::Reg::ONE);
            }
            Ok(Effect::Next)
        }
        AmoswapW | AmoaddW | AmoxorW | AmoandW | AmoorW | AmominW | AmomaxW | AmominuW
        | AmomaxuW | AmoswapD | AmoaddD | AmoxorD | AmoandD | AmoorD | AmominD | AmomaxD
        | AmominuD | AmomaxuD => {
            let op = FasterOpType::unpack(entry.bits);
            let addr = cpu.regs.get(op.rs1).as_u64();
            let is_word = matches!(
                entry.handler,
                AmoswapW | AmoaddW | AmoxorW | AmoandW | AmoorW | AmominW | AmomaxW | AmominuW
                    | AmomaxuW
            );
            let rs2 = cpu.regs.get(op.rs2).as_u64();
            let (old, new) = if is_word {
                let old = mem.read_u32(addr)? as i32;
                let rhs = rs2 as i32;
                let new = amo_op(entry.handler, old as i64, rhs as i64) as i32;
                mem.write_u32(addr, new as u32)?;
                (old as i64, new as i64)
            } else {
                let old = mem.read_u64(addr)? as i64;
                let rhs = rs2 as i64;
                let new = amo_op(entry.handler, old, rhs);
                mem.write_u64(addr, new as u64)?;
                (old, new)
            };
            let _ = new;
            cpu.regs.set(op.rd, X::Reg::from_i64(old));
            Ok(Effect::Next)
        }
        Fence | FenceI => Ok(Effect::Next),
        Ecall => {
            let stop = on_ecall(cpu, mem)?;
            if stop {
                Ok(Effect::Stop)
            } else {
                Ok(Effect::Next)
            }
        }
        Ebreak => Err(MachineException::new(Kind::UnimplementedInstruction, pc)),
        Unimplemented => Err(MachineException::new(Kind::UnimplementedInstruction, pc)),
        Illegal => Err(MachineException::new(Kind::IllegalOpcode, pc)),
    }
}

fn check_aligned(target: u64) -> Result<()> {
    if target % 2 != 0 {
        Err(MachineException::new(Kind::MisalignedInstruction, target))
    } else {
        Ok(())
    }
}

fn bool_reg<X: Xlen>(cond: bool) -> X::Reg {
    if cond {
        X::Reg::ONE
    } else {
        X::Reg::ZERO
    }
}

fn shift_mask<X: Xlen>() -> u32 {
    (X::Reg::BYTES as u32 * 8) - 1
}

fn mulh(a: i64, b: i64) -> i64 {
    (((a as i128) * (b as i128)) >> 64) as i64
}

fn mulhu(a: u64, b: u64) -> u64 {
    (((a as u128) * (b as u128)) >> 64) as u64
}

fn mulhsu(a: i64, b: u64) -> i64 {
    (((a as i128) * (b as i128)) >> 64) as i64
}

fn amo_op(handler: Bytecode, old: i64, rhs: i64) -> i64 {
    use Bytecode::*;
    match handler {
        AmoswapW | AmoswapD => rhs,
        AmoaddW | AmoaddD => old.wrapping_add(rhs),
        AmoxorW | AmoxorD => old ^ rhs,
        AmoandW | AmoandD => old & rhs,
        AmoorW | AmoorD => old | rhs,
        AmominW | AmominD => old.min(rhs),
        AmomaxW | AmomaxD => old.max(rhs),
        AmominuW | AmominuD => (old as u64).min(rhs as u64) as i64,
        AmomaxuW | AmomaxuD => (old as u64).max(rhs as u64) as i64,
        _ => unreachable!(),
    }
}
