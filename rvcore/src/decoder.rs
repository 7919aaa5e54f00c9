//! Decoder cache: one pre-decoded entry per reachable instruction slot.
//!
//! Built in three passes over an executable region, exactly as described by
//! the spec this module implements: decode every slot, then walk backward to
//! compute each slot's `idxend` (distance to the next basic-block
//! terminator), then hand each slot to the [`rewriter`](crate::rewriter) for
//! operand packing. `Bytecode` is a tagged enum rather than a function
//! pointer table: a dense match on a `#[repr(u16)]`-shaped enum compiles to a
//! jump table under LLVM without reaching for unsafe fn-pointer arrays, the
//! same tradeoff `libcorevm::cpu` makes by matching on its own opcode enum
//! rather than indirecting through a table.

use crate::instruction::RawInstruction;

/// Identifies which handler a decoder-cache slot dispatches to.
///
/// Compressed (`C` extension) instructions are decompressed into their
/// equivalent standard form at decode time and then classified exactly like
/// any other instruction; there is no separate compressed half of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Bytecode {
    Lui,
    Auipc,
    Jal,
    /// JAL with `rd == 0`, PC-aligned, absolute target fits the slot's packed
    /// field: the rewriter's `FAST_JAL` specialization.
    FastJal,
    Jalr,
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
    Lwu,
    Ld,
    Sb,
    Sh,
    Sw,
    Sd,
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    // RV64/128 "W"-suffixed word ops, sign-extending their 32-bit result.
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    // M extension.
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
    // A extension (word and doubleword forms).
    LrW,
    ScW,
    AmoswapW,
    AmoaddW,
    AmoxorW,
    AmoandW,
    AmoorW,
    AmominW,
    AmomaxW,
    AmominuW,
    AmomaxuW,
    LrD,
    ScD,
    AmoswapD,
    AmoaddD,
    AmoxorD,
    AmoandD,
    AmoorD,
    AmominD,
    AmomaxD,
    AmominuD,
    AmomaxuD,
    /// Decoded but intentionally unhandled: F/V-extension opcodes and any
    /// other encoding the spec scopes to register storage only.
    Unimplemented,
    /// No handler matches these opcode bits.
    Illegal,
}

impl Bytecode {
    /// True for instructions that end a basic block: branches, jumps, system
    /// calls, fences, atomic ordering points, and sentinels. Used by the
    /// backward `idxend` pass.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Bytecode::Jal
                | Bytecode::FastJal
                | Bytecode::Jalr
                | Bytecode::Beq
                | Bytecode::Bne
                | Bytecode::Blt
                | Bytecode::Bge
                | Bytecode::Bltu
                | Bytecode::Bgeu
                | Bytecode::Ecall
                | Bytecode::Ebreak
                | Bytecode::Fence
                | Bytecode::FenceI
                | Bytecode::Illegal
                | Bytecode::Unimplemented
                // Atomics are ordering boundaries; conservatively end the run.
                | Bytecode::LrW
                | Bytecode::ScW
                | Bytecode::AmoswapW
                | Bytecode::AmoaddW
                | Bytecode::AmoxorW
                | Bytecode::AmoandW
                | Bytecode::AmoorW
                | Bytecode::AmominW
                | Bytecode::AmomaxW
                | Bytecode::AmominuW
                | Bytecode::AmomaxuW
                | Bytecode::LrD
                | Bytecode::ScD
                | Bytecode::AmoswapD
                | Bytecode::AmoaddD
                | Bytecode::AmoxorD
                | Bytecode::AmoandD
                | Bytecode::AmoorD
                | Bytecode::AmominD
                | Bytecode::AmomaxD
                | Bytecode::AmominuD
                | Bytecode::AmomaxuD
        )
    }
}

/// One pre-decoded instruction slot.
#[derive(Debug, Clone, Copy)]
pub struct DecoderEntry {
    pub handler: Bytecode,
    /// Raw bits before the rewrite pass, operand-packed bits after it.
    pub bits: u64,
    /// Distance in slots to this span's terminator, inclusive.
    pub idxend: u32,
    /// True instructions covered by `idxend` (may be less than `idxend` when
    /// 32-bit instructions occupy two slots in a compressed build).
    pub instr_count: u32,
    /// 2 for a compressed instruction, 4 for a standard one.
    pub opcode_length: u8,
}

impl DecoderEntry {
    fn terminator() -> Self {
        DecoderEntry {
            handler: Bytecode::Illegal,
            bits: 0,
            idxend: 1,
            instr_count: 1,
            opcode_length: 4,
        }
    }
}

/// Pre-decoded slots for one executable region, indexed by `pc / DIVISOR`
/// relative to the region's base address.
#[derive(Clone)]
pub struct DecoderCache {
    pub base: u64,
    pub entries: Vec<DecoderEntry>,
    pub divisor: u64,
}

impl DecoderCache {
    /// Run the three-pass build algorithm over `code`, a byte slice holding
    /// the region `[base, base+code.len())`.
    pub fn build(base: u64, code: &[u8], divisor: u64) -> Self {
        let slot_count = (code.len() as u64 / divisor) as usize;
        let mut entries = vec![DecoderEntry::terminator(); slot_count.max(1)];

        // Pass 1: decode every instruction start into its slot.
        let mut offset = 0usize;
        while offset < code.len() {
            let slot = offset as u64 / divisor;
            if slot as usize >= entries.len() {
                break;
            }
            let half = u16::from_le_bytes([code[offset], *code.get(offset + 1).unwrap_or(&0)]);
            let raw = RawInstruction::new(half as u32);
            if raw.is_compressed() {
                let decompressed = decompress(half);
                let handler = decompressed
                    .map(classify)
                    .unwrap_or(Bytecode::Illegal);
                entries[slot as usize] = DecoderEntry {
                    handler,
                    bits: decompressed.map(|r| r.bits() as u64).unwrap_or(0),
                    idxend: 1,
                    instr_count: 1,
                    opcode_length: 2,
                };
                offset += 2;
            } else {
                if offset + 4 > code.len() {
                    break;
                }
                let bits = u32::from_le_bytes([
                    code[offset],
                    code[offset + 1],
                    code[offset + 2],
                    code[offset + 3],
                ]);
                let raw = RawInstruction::new(bits);
                entries[slot as usize] = DecoderEntry {
                    handler: classify(raw),
                    bits: bits as u64,
                    idxend: 1,
                    instr_count: 1,
                    opcode_length: 4,
                };
                offset += 4;
            }
        }

        // Final slot of every region is a synthesized terminator: a fast
        // run can never read past the cache's end.
        if let Some(last) = entries.last_mut() {
            *last = DecoderEntry::terminator();
        }

        // Pass 2: walk backward accumulating idxend/instr_count.
        let mut running_idx: u32 = 0;
        let mut running_instr: u32 = 0;
        for i in (0..entries.len()).rev() {
            if entries[i].handler.is_terminator() || i == entries.len() - 1 {
                running_idx = 1;
                running_instr = 1;
            } else {
                running_idx += 1;
                running_instr += 1;
            }
            entries[i].idxend = running_idx;
            entries[i].instr_count = running_instr;
        }

        let mut cache = DecoderCache {
            base,
            entries,
            divisor,
        };

        // Pass 3: rewrite each slot in place.
        for i in 0..cache.entries.len() {
            let pc = cache.base + (i as u64) * cache.divisor;
            crate::rewriter::rewrite_slot(&mut cache.entries[i], pc);
        }

        cache
    }

    #[inline]
    pub fn slot(&self, pc: u64) -> Option<&DecoderEntry> {
        let idx = pc.checked_sub(self.base)? / self.divisor;
        self.entries.get(idx as usize)
    }
}

/// Decompress a 16-bit `C`-extension instruction into its equivalent
/// standard 32-bit encoding. Returns `None` for reserved/illegal encodings.
///
/// Covers the common integer subset: `C.ADDI4SPN`, `C.LW`/`C.SW` (and
/// `C.LD`/`C.SD` for RV64), `C.ADDI`, `C.LI`, `C.ADDI16SP`, `C.LUI`,
/// arithmetic in `C.MISC-ALU`, `C.J`/`C.JAL`, `C.BEQZ`/`C.BNEZ`, `C.SLLI`,
/// `C.MV`/`C.ADD`, `C.JR`/`C.JALR`, `C.NOP`/`C.EBREAK`.
pub fn decompress(half: u16) -> Option<RawInstruction> {
    let op = half & 0b11;
    let funct3 = (half >> 13) & 0x7;
    let bits = half as u32;

    match (op, funct3) {
        // C.ADDI4SPN -> addi rd', x2, nzuimm
        (0b00, 0b000) if half != 0 => {
            let rdp = ((bits >> 2) & 0x7) + 8;
            let nzuimm = ((bits >> 7) & 0x30)
                | ((bits >> 1) & 0x3c0)
                | ((bits >> 4) & 0x4)
                | ((bits >> 2) & 0x8);
            if nzuimm == 0 {
                return None;
            }
            Some(itype(nzuimm, 2, 0, rdp as u8, 0x13))
        }
        // C.LW -> lw rd', offset(rs1')
        (0b00, 0b010) => {
            let rs1p = (((bits >> 7) & 0x7) + 8) as u8;
            let rdp = (((bits >> 2) & 0x7) + 8) as u8;
            let off = ((bits >> 7) & 0x38) | ((bits << 1) & 0x40) | ((bits >> 4) & 0x4);
            Some(itype(off, rs1p, 0b010, rdp, 0x03))
        }
        // C.SW -> sw rs2', offset(rs1')
        (0b00, 0b110) => {
            let rs1p = (((bits >> 7) & 0x7) + 8) as u8;
            let rs2p = (((bits >> 2) & 0x7) + 8) as u8;
            let off = ((bits >> 7) & 0x38) | ((bits << 1) & 0x40) | ((bits >> 4) & 0x4);
            Some(stype(off, rs1p, rs2p, 0b010, 0x23))
        }
        // C.ADDI -> addi rd, rd, nzimm
        (0b01, 0b000) => {
            let rd = ((bits >> 7) & 0x1f) as u8;
            let imm = c_imm6(bits);
            Some(itype(imm as u32 & 0xfff, rd, 0, rd, 0x13))
        }
        // C.LI -> addi rd, x0, imm
        (0b01, 0b010) => {
            let rd = ((bits >> 7) & 0x1f) as u8;
            let imm = c_imm6(bits);
            Some(itype(imm as u32 & 0xfff, 0, 0, rd, 0x13))
        }
        // C.LUI / C.ADDI16SP
        (0b01, 0b011) => {
            let rd = ((bits >> 7) & 0x1f) as u8;
            if rd == 2 {
                let imm = c_addi16sp_imm(bits);
                Some(itype(imm as u32 & 0xfff, 2, 0, 2, 0x13))
            } else if rd != 0 {
                let imm = c_imm6(bits) << 12;
                Some(RawInstruction::new(((imm as u32) & 0xffff_f000) | ((rd as u32) << 7) | 0x37))
            } else {
                None
            }
        }
        // C.J -> jal x0, offset
        (0b01, 0b101) => {
            let off = c_j_imm(bits);
            Some(jtype(off, 0))
        }
        // C.JAL (RV32 only) -> jal x1, offset
        (0b01, 0b001) => {
            let off = c_j_imm(bits);
            Some(jtype(off, 1))
        }
        // C.BEQZ / C.BNEZ
        (0b01, 0b110) | (0b01, 0b111) => {
            let rs1p = (((bits >> 7) & 0x7) + 8) as u8;
            let off = c_b_imm(bits);
            let funct3 = if funct3 == 0b110 { 0b000 } else { 0b001 };
            Some(btype(off, rs1p, 0, funct3 as u8))
        }
        // C.MISC-ALU: SRLI/SRAI/ANDI/SUB/XOR/OR/AND
        (0b01, 0b100) => {
            let rdp = (((bits >> 7) & 0x7) + 8) as u8;
            let sub_op = (bits >> 10) & 0x3;
            let shamt = ((bits >> 7) & 0x20) | ((bits >> 2) & 0x1f);
            match sub_op {
                0b00 => Some(itype_shift(shamt, rdp, 0b101, rdp, 0x13, 0)),
                0b01 => Some(itype_shift(shamt, rdp, 0b101, rdp, 0x13, 0x20)),
                0b10 => {
                    let imm = c_imm6(bits);
                    Some(itype(imm as u32 & 0xfff, rdp, 0b111, rdp, 0x13))
                }
                0b11 => {
                    let rs2p = (((bits >> 2) & 0x7) + 8) as u8;
                    let funct = (bits >> 5) & 0x3;
                    let (funct3, funct7) = match funct {
                        0b00 => (0b000, 0x20),
                        0b01 => (0b100, 0x00),
                        0b10 => (0b110, 0x00),
                        _ => (0b111, 0x00),
                    };
                    Some(rtype(rs2p, rdp, funct3, rdp, funct7))
                }
                _ => None,
            }
        }
        // C.SLLI
        (0b10, 0b000) => {
            let rd = ((bits >> 7) & 0x1f) as u8;
            if rd == 0 {
                return None;
            }
            let shamt = ((bits >> 7) & 0x20) | ((bits >> 2) & 0x1f);
            Some(itype_shift(shamt, rd, 0b001, rd, 0x13, 0))
        }
        // C.MV / C.ADD / C.JR / C.JALR / C.EBREAK
        (0b10, 0b100) => {
            let rd = ((bits >> 7) & 0x1f) as u8;
            let rs2 = ((bits >> 2) & 0x1f) as u8;
            let bit12 = (bits >> 12) & 1;
            if bit12 == 0 {
                if rs2 == 0 {
                    if rd == 0 {
                        None
                    } else {
                        Some(itype(0, rd, 0, 0, 0x67)) // c.jr
                    }
                } else {
                    Some(rtype(rs2, 0, 0, rd, 0)) // c.mv: add rd, x0, rs2
                }
            } else if rs2 == 0 {
                if rd == 0 {
                    Some(RawInstruction::new(0x00100073)) // c.ebreak
                } else {
                    Some(itype(0, rd, 0, 1, 0x67)) // c.jalr
                }
            } else {
                Some(rtype(rs2, rd, 0, rd, 0)) // c.add
            }
        }
        _ => None,
    }
}

fn c_imm6(bits: u32) -> i32 {
    let raw = ((bits >> 7) & 0x20) | ((bits >> 2) & 0x1f);
    ((raw << 26) as i32) >> 26
}

fn c_addi16sp_imm(bits: u32) -> i32 {
    let raw = ((bits >> 3) & 0x200)
        | ((bits >> 2) & 0x10)
        | ((bits << 1) & 0x40)
        | ((bits << 4) & 0x180)
        | ((bits << 3) & 0x20);
    ((raw << 22) as i32) >> 22
}

fn c_j_imm(bits: u32) -> i32 {
    let raw = ((bits >> 1) & 0x800)
        | ((bits << 2) & 0x400)
        | ((bits >> 1) & 0x300)
        | ((bits << 1) & 0x80)
        | ((bits >> 1) & 0x40)
        | ((bits << 3) & 0x20)
        | ((bits >> 7) & 0x10)
        | ((bits >> 2) & 0xe);
    ((raw << 20) as i32) >> 20
}

fn c_b_imm(bits: u32) -> i32 {
    let raw = ((bits >> 4) & 0x100)
        | ((bits << 1) & 0xc0)
        | ((bits << 3) & 0x20)
        | ((bits >> 7) & 0x18)
        | ((bits >> 2) & 0x6);
    ((raw << 23) as i32) >> 23
}

fn itype(imm: u32, rs1: u8, funct3: u8, rd: u8, opcode: u32) -> RawInstruction {
    RawInstruction::new(
        ((imm & 0xfff) << 20) | ((rs1 as u32) << 15) | ((funct3 as u32) << 12) | ((rd as u32) << 7) | opcode,
    )
}

fn itype_shift(shamt: u32, rs1: u8, funct3: u8, rd: u8, opcode: u32, funct7: u32) -> RawInstruction {
    RawInstruction::new(
        (funct7 << 25)
            | ((shamt & 0x7f) << 20)
            | ((rs1 as u32) << 15)
            | ((funct3 as u32) << 12)
            | ((rd as u32) << 7)
            | opcode,
    )
}

fn rtype(rs2: u8, rs1: u8, funct3: u8, rd: u8, funct7: u32) -> RawInstruction {
    RawInstruction::new(
        (funct7 << 25)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | ((funct3 as u32) << 12)
            | ((rd as u32) << 7)
            | 0x33,
    )
}

fn stype(imm: u32, rs1: u8, rs2: u8, funct3: u8, opcode: u32) -> RawInstruction {
    let hi = (imm >> 5) & 0x7f;
    let lo = imm & 0x1f;
    RawInstruction::new(
        (hi << 25)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | ((funct3 as u32) << 12)
            | (lo << 7)
            | opcode,
    )
}

fn btype(imm: i32, rs1: u8, rs2: u8, funct3: u8) -> RawInstruction {
    let imm = imm as u32;
    let b12 = (imm >> 12) & 1;
    let b11 = (imm >> 11) & 1;
    let b10_5 = (imm >> 5) & 0x3f;
    let b4_1 = (imm >> 1) & 0xf;
    RawInstruction::new(
        (b12 << 31)
            | (b10_5 << 25)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | ((funct3 as u32) << 12)
            | (b4_1 << 8)
            | (b11 << 7)
            | 0x63,
    )
}

fn jtype(imm: i32, rd: u8) -> RawInstruction {
    let imm = imm as u32;
    let b20 = (imm >> 20) & 1;
    let b19_12 = (imm >> 12) & 0xff;
    let b11 = (imm >> 11) & 1;
    let b10_1 = (imm >> 1) & 0x3ff;
    RawInstruction::new(
        (b20 << 31) | (b10_1 << 21) | (b11 << 20) | (b19_12 << 12) | ((rd as u32) << 7) | 0x6f,
    )
}

/// Classify a standard 32-bit instruction into its [`Bytecode`].
pub fn classify(ins: RawInstruction) -> Bytecode {
    let f3 = ins.funct3();
    let f7 = ins.funct7();
    match ins.opcode() {
        0x37 => Bytecode::Lui,
        0x17 => Bytecode::Auipc,
        0x6f => Bytecode::Jal,
        0x67 => Bytecode::Jalr,
        0x63 => match f3 {
            0b000 => Bytecode::Beq,
            0b001 => Bytecode::Bne,
            0b100 => Bytecode::Blt,
            0b101 => Bytecode::Bge,
            0b110 => Bytecode::Bltu,
            0b111 => Bytecode::Bgeu,
            _ => Bytecode::Illegal,
        },
        0x03 => match f3 {
            0b000 => Bytecode::Lb,
            0b001 => Bytecode::Lh,
            0b010 => Bytecode::Lw,
            0b011 => Bytecode::Ld,
            0b100 => Bytecode::Lbu,
            0b101 => Bytecode::Lhu,
            0b110 => Bytecode::Lwu,
            _ => Bytecode::Illegal,
        },
        0x23 => match f3 {
            0b000 => Bytecode::Sb,
            0b001 => Bytecode::Sh,
            0b010 => Bytecode::Sw,
            0b011 => Bytecode::Sd,
            _ => Bytecode::Illegal,
        },
        0x13 => match f3 {
            0b000 => Bytecode::Addi,
            0b010 => Bytecode::Slti,
            0b011 => Bytecode::Sltiu,
            0b100 => Bytecode::Xori,
            0b110 => Bytecode::Ori,
            0b111 => Bytecode::Andi,
            0b001 => Bytecode::Slli,
            0b101 => {
                if f7 & 0x20 != 0 {
                    Bytecode::Srai
                } else {
                    Bytecode::Srli
                }
            }
            _ => Bytecode::Illegal,
        },
        0x1b => match f3 {
            0b000 => Bytecode::Addiw,
            0b001 => Bytecode::Slliw,
            0b101 => {
                if f7 & 0x20 != 0 {
                    Bytecode::Sraiw
                } else {
                    Bytecode::Srliw
                }
            }
            _ => Bytecode::Illegal,
        },
        0x33 => {
            if f7 == 0x01 {
                match f3 {
                    0b000 => Bytecode::Mul,
                    0b001 => Bytecode::Mulh,
                    0b010 => Bytecode::Mulhsu,
                    0b011 => Bytecode::Mulhu,
                    0b100 => Bytecode::Div,
                    0b101 => Bytecode::Divu,
                    0b110 => Bytecode::Rem,
                    0b111 => Bytecode::Remu,
                    _ => Bytecode::Illegal,
                }
            } else {
                match f3 {
                    0b000 => {
                        if f7 & 0x20 != 0 {
                            Bytecode::Sub
                        } else {
                            Bytecode::Add
                        }
                    }
                    0b001 => Bytecode::Sll,
                    0b010 => Bytecode::Slt,
                    0b011 => Bytecode::Sltu,
                    0b100 => Bytecode::Xor,
                    0b101 => {
                        if f7 & 0x20 != 0 {
                            Bytecode::Sra
                        } else {
                            Bytecode::Srl
                        }
                    }
                    0b110 => Bytecode::Or,
                    0b111 => Bytecode::And,
                    _ => Bytecode::Illegal,
                }
            }
        }
        0x3b => {
            if f7 == 0x01 {
                match f3 {
                    0b000 => Bytecode::Mulw,
                    0b100 => Bytecode::Divw,
                    0b101 => Bytecode::Divuw,
                    0b110 => Bytecode::Remw,
                    0b111 => Bytecode::Remuw,
                    _ => Bytecode::Illegal,
                }
            } else {
                match f3 {
                    0b000 => {
                        if f7 & 0x20 != 0 {
                            Bytecode::Subw
                        } else {
                            Bytecode::Addw
                        }
                    }
                    0b001 => Bytecode::Sllw,
                    0b101 => {
                        if f7 & 0x20 != 0 {
                            Bytecode::Sraw
                        } else {
                            Bytecode::Srlw
                        }
                    }
                    _ => Bytecode::Illegal,
                }
            }
        }
        0x0f => {
            if f3 == 0b001 {
                Bytecode::FenceI
            } else {
                Bytecode::Fence
            }
        }
        0x73 => {
            if ins.bits() == 0x0000_0073 {
                Bytecode::Ecall
            } else if ins.bits() == 0x0010_0073 {
                Bytecode::Ebreak
            } else {
                Bytecode::Unimplemented
            }
        }
        0x2f => {
            let width = f3 & 0x3;
            let funct5 = f7 >> 2;
            match (width, funct5) {
                (0b010, 0b00010) => Bytecode::LrW,
                (0b010, 0b00011) => Bytecode::ScW,
                (0b010, 0b00001) => Bytecode::AmoswapW,
                (0b010, 0b00000) => Bytecode::AmoaddW,
                (0b010, 0b00100) => Bytecode::AmoxorW,
                (0b010, 0b01100) => Bytecode::AmoandW,
                (0b010, 0b01000) => Bytecode::AmoorW,
                (0b010, 0b10000) => Bytecode::AmominW,
                (0b010, 0b10100) => Bytecode::AmomaxW,
                (0b010, 0b11000) => Bytecode::AmominuW,
                (0b010, 0b11100) => Bytecode::AmomaxuW,
                (0b011, 0b00010) => Bytecode::LrD,
                (0b011, 0b00011) => Bytecode::ScD,
                (0b011, 0b00001) => Bytecode::AmoswapD,
                (0b011, 0b00000) => Bytecode::AmoaddD,
                (0b011, 0b00100) => Bytecode::AmoxorD,
                (0b011, 0b01100) => Bytecode::AmoandD,
                (0b011, 0b01000) => Bytecode::AmoorD,
                (0b011, 0b10000) => Bytecode::AmominD,
                (0b011, 0b10100) => Bytecode::AmomaxD,
                (0b011, 0b11000) => Bytecode::AmominuD,
                (0b011, 0b11100) => Bytecode::AmomaxuD,
                _ => Bytecode::Illegal,
            }
        }
        0x07 | 0x27 | 0x53 | 0x43 | 0x47 | 0x4b | 0x4f => Bytecode::Unimplemented,
        _ => Bytecode::Illegal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_addi() {
        let bits = (4u32 << 20) | (1 << 15) | (1 << 7) | 0x13;
        assert_eq!(classify(RawInstruction::new(bits)), Bytecode::Addi);
    }

    #[test]
    fn terminators_end_runs() {
        assert!(Bytecode::Jal.is_terminator());
        assert!(!Bytecode::Add.is_terminator());
    }

    #[test]
    fn build_marks_last_slot_as_terminator() {
        // addi x1,x1,1 ; addi x1,x1,1 (two 32-bit instructions)
        let ins = (1u32 << 20) | (1 << 15) | (1 << 7) | 0x13;
        let mut code = ins.to_le_bytes().to_vec();
        code.extend_from_slice(&ins.to_le_bytes());
        let cache = DecoderCache::build(0x1000, &code, 4);
        let last = cache.entries.last().unwrap();
        assert_eq!(last.idxend, 1);
    }

    #[test]
    fn decompress_c_addi() {
        // c.addi x1, 1  => 0b000_0_00001_00001_01
        let half: u16 = 0b000_0_00001_00001_01;
        let decoded = decompress(half).expect("valid c.addi");
        assert_eq!(classify(decoded), Bytecode::Addi);
        assert_eq!(decoded.rd(), 1);
        assert_eq!(decoded.imm_i(), 1);
    }
}
