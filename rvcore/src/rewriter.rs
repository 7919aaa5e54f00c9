//! Bytecode rewriter: replaces a decoder-cache slot's raw instruction bits
//! with a compact, pre-parsed operand form so the hot dispatch loop never
//! re-masks opcode fields.
//!
//! Grounded in the reference rewriter's per-bytecode packing (`FasterItype`
//! / `FasterOpType` / `FasterJtype`) and its `FAST_JAL` specialization. Each
//! packed form here is plain byte-lane packing into a `u64` rather than a
//! bit-for-bit replica of the original's C++ bitfields; the contract that
//! matters is the one the spec states: purely local per-slot rewriting that
//! never touches `idxend`/`opcode_length` or neighboring slots.

use crate::decoder::{Bytecode, DecoderEntry};
use crate::instruction::RawInstruction;

/// Packed form for I-type arithmetic, loads, stores, and conditional
/// branches. `rs1` is always the base/first source register; `rs2` is
/// overloaded as the destination register for arithmetic/loads or the
/// second source register for stores/branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FasterItype {
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i32,
}

impl FasterItype {
    pub fn pack(self) -> u64 {
        (self.rs1 as u64) | ((self.rs2 as u64) << 8) | ((self.imm as u32 as u64) << 32)
    }

    pub fn unpack(bits: u64) -> Self {
        FasterItype {
            rs1: (bits & 0xff) as u8,
            rs2: ((bits >> 8) & 0xff) as u8,
            imm: (bits >> 32) as u32 as i32,
        }
    }
}

/// Packed form for register-register ALU ops (including M-extension).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FasterOpType {
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
}

impl FasterOpType {
    pub fn pack(self) -> u64 {
        (self.rd as u64) | ((self.rs1 as u64) << 8) | ((self.rs2 as u64) << 16)
    }

    pub fn unpack(bits: u64) -> Self {
        FasterOpType {
            rd: (bits & 0xff) as u8,
            rs1: ((bits >> 8) & 0xff) as u8,
            rs2: ((bits >> 16) & 0xff) as u8,
        }
    }
}

/// Packed form for JAL: destination register plus sign-extended offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FasterJtype {
    pub rd: u8,
    pub offset: i32,
}

impl FasterJtype {
    pub fn pack(self) -> u64 {
        (self.rd as u64) | ((self.offset as u32 as u64) << 32)
    }

    pub fn unpack(bits: u64) -> Self {
        FasterJtype {
            rd: (bits & 0xff) as u8,
            offset: (bits >> 32) as u32 as i32,
        }
    }
}

/// Rewrite one decoder-cache entry in place. `pc` is the slot's absolute
/// address, needed only to evaluate the `FAST_JAL` specialization.
pub fn rewrite_slot(entry: &mut DecoderEntry, pc: u64) {
    let raw = RawInstruction::new(entry.bits as u32);
    match entry.handler {
        Bytecode::Addi
        | Bytecode::Slti
        | Bytecode::Sltiu
        | Bytecode::Xori
        | Bytecode::Ori
        | Bytecode::Andi
        | Bytecode::Addiw
        | Bytecode::Lb
        | Bytecode::Lh
        | Bytecode::Lw
        | Bytecode::Lbu
        | Bytecode::Lhu
        | Bytecode::Lwu
        | Bytecode::Ld => {
            let packed = FasterItype {
                rs1: raw.rs1(),
                rs2: raw.rd(),
                imm: raw.imm_i(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::Slli | Bytecode::Srli | Bytecode::Srai => {
            let packed = FasterItype {
                rs1: raw.rs1(),
                rs2: raw.rd(),
                imm: raw.shamt6() as i32,
            };
            entry.bits = packed.pack();
        }
        Bytecode::Slliw | Bytecode::Srliw | Bytecode::Sraiw => {
            let packed = FasterItype {
                rs1: raw.rs1(),
                rs2: raw.rd(),
                imm: raw.shamt5() as i32,
            };
            entry.bits = packed.pack();
        }
        Bytecode::Sb | Bytecode::Sh | Bytecode::Sw | Bytecode::Sd => {
            let packed = FasterItype {
                rs1: raw.rs1(),
                rs2: raw.rs2(),
                imm: raw.imm_s(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::Beq
        | Bytecode::Bne
        | Bytecode::Blt
        | Bytecode::Bge
        | Bytecode::Bltu
        | Bytecode::Bgeu => {
            let packed = FasterItype {
                rs1: raw.rs1(),
                rs2: raw.rs2(),
                imm: raw.imm_b(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::Jalr => {
            let packed = FasterItype {
                rs1: raw.rs1(),
                rs2: raw.rd(),
                imm: raw.imm_i(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::Lui | Bytecode::Auipc => {
            let packed = FasterItype {
                rs1: 0,
                rs2: raw.rd(),
                imm: raw.imm_u(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::Add
        | Bytecode::Sub
        | Bytecode::Sll
        | Bytecode::Slt
        | Bytecode::Sltu
        | Bytecode::Xor
        | Bytecode::Srl
        | Bytecode::Sra
        | Bytecode::Or
        | Bytecode::And
        | Bytecode::Addw
        | Bytecode::Subw
        | Bytecode::Sllw
        | Bytecode::Srlw
        | Bytecode::Sraw
        | Bytecode::Mul
        | Bytecode::Mulh
        | Bytecode::Mulhsu
        | Bytecode::Mulhu
        | Bytecode::Div
        | Bytecode::Divu
        | Bytecode::Rem
        | Bytecode::Remu
        | Bytecode::Mulw
        | Bytecode::Divw
        | Bytecode::Divuw
        | Bytecode::Remw
        | Bytecode::Remuw => {
            let packed = FasterOpType {
                rd: raw.rd(),
                rs1: raw.rs1(),
                rs2: raw.rs2(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::LrW | Bytecode::LrD => {
            let packed = FasterOpType {
                rd: raw.rd(),
                rs1: raw.rs1(),
                rs2: 0,
            };
            entry.bits = packed.pack();
        }
        Bytecode::ScW
        | Bytecode::AmoswapW
        | Bytecode::AmoaddW
        | Bytecode::AmoxorW
        | Bytecode::AmoandW
        | Bytecode::AmoorW
        | Bytecode::AmominW
        | Bytecode::AmomaxW
        | Bytecode::AmominuW
        | Bytecode::AmomaxuW
        | Bytecode::ScD
        | Bytecode::AmoswapD
        | Bytecode::AmoaddD
        | Bytecode::AmoxorD
        | Bytecode::AmoandD
        | Bytecode::AmoorD
        | Bytecode::AmominD
        | Bytecode::AmomaxD
        | Bytecode::AmominuD
        | Bytecode::AmomaxuD => {
            let packed = FasterOpType {
                rd: raw.rd(),
                rs1: raw.rs1(),
                rs2: raw.rs2(),
            };
            entry.bits = packed.pack();
        }
        Bytecode::Jal => {
            let offset = raw.imm_j();
            let rd = raw.rd();
            let target = pc.wrapping_add(offset as i64 as u64);
            if rd == 0 && target <= u32::MAX as u64 && target % 2 == 0 {
                entry.handler = Bytecode::FastJal;
                entry.bits = target;
            } else {
                let packed = FasterJtype { rd, offset };
                entry.bits = packed.pack();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn itype_roundtrips() {
        let f = FasterItype {
            rs1: 3,
            rs2: 7,
            imm: -42,
        };
        let back = FasterItype::unpack(f.pack());
        assert_eq!(f, back);
    }

    #[test]
    fn jal_with_rd_zero_specializes() {
        let mut entry = DecoderEntry {
            handler: Bytecode::Jal,
            bits: jal_bits(0, 8),
            idxend: 1,
            instr_count: 1,
            opcode_length: 4,
        };
        rewrite_slot(&mut entry, 0x1000);
        assert_eq!(entry.handler, Bytecode::FastJal);
        assert_eq!(entry.bits, 0x1008);
    }

    #[test]
    fn jal_with_rd_nonzero_packs_jtype() {
        let mut entry = DecoderEntry {
            handler: Bytecode::Jal,
            bits: jal_bits(1, 8),
            idxend: 1,
            instr_count: 1,
            opcode_length: 4,
        };
        rewrite_slot(&mut entry, 0x1000);
        assert_eq!(entry.handler, Bytecode::Jal);
        let unpacked = FasterJtype::unpack(entry.bits);
        assert_eq!(unpacked.rd, 1);
        assert_eq!(unpacked.offset, 8);
    }

    fn jal_bits(rd: u8, offset: i32) -> u64 {
        let imm = offset as u32;
        let b20 = (imm >> 20) & 1;
        let b19_12 = (imm >> 12) & 0xff;
        let b11 = (imm >> 11) & 1;
        let b10_1 = (imm >> 1) & 0x3ff;
        let bits = (b20 << 31)
            | (b10_1 << 21)
            | (b11 << 20)
            | (b19_12 << 12)
            | ((rd as u32) << 7)
            | 0x6f;
        bits as u64
    }
}
