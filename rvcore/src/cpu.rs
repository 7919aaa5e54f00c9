//! Per-hart fetch/decode/execute loops.
//!
//! Mirrors `libcorevm::cpu::Cpu`'s shape (register file plus fault-raising
//! step functions that log on the way out) adapted to RISC-V's decoder
//! cache: rather than re-decoding every fetch, `Cpu` holds a shared pointer
//! to the executable region's pre-built [`DecoderCache`] and looks up each
//! slot by `pc / DIVISOR`. Plain loads/stores additionally keep their own
//! `data_cache` hot slot (see [`crate::memory::PageCache`]) so a tight
//! data loop on this hart skips `Memory`'s page-map lookup independently
//! of that struct's own cache.

use std::sync::Arc;

use log::{trace, warn};

use crate::decoder::DecoderCache;
use crate::error::{Kind, MachineException, Result};
use crate::execute::{self, Effect};
use crate::memory::{Memory, PageCache};
use crate::registers::Registers;
use crate::xlen::{Word, Xlen};

/// One mapped executable region: a decoder cache plus the address range it
/// covers, shared (via `Arc`) between CPUs forked from the same Machine.
pub struct ExecSegment {
    pub cache: Arc<DecoderCache>,
    pub len: u64,
}

impl ExecSegment {
    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.cache.base && pc < self.cache.base + self.len
    }

    /// Rebuild this segment over a freshly allocated `DecoderCache` holding
    /// the same entries, so a forked hart gets its own copy instead of
    /// aliasing the original's `Arc`.
    fn deep_clone(&self) -> ExecSegment {
        ExecSegment {
            cache: Arc::new((*self.cache).clone()),
            len: self.len,
        }
    }
}

/// A single hardware thread's architectural state and dispatch loop.
pub struct Cpu<X: Xlen> {
    pub id: u32,
    pub regs: Registers<X>,
    segment: Option<Arc<ExecSegment>>,
    /// Reservation granule for LR/SC (the address of the last successful
    /// LR, cleared by a matching SC or an intervening reservation-losing
    /// event).
    pub reservation: Option<u64>,
    pub instruction_counter: u64,
    pub verbose_instructions: bool,
    pub verbose_registers: bool,
    /// This hart's own last-resolved `(pageno, slab index, generation)`
    /// for plain loads/stores, independent of `Memory`'s internal one —
    /// lets a tight load/store loop on this hart keep hitting its cache
    /// even while other harts or bulk helpers touch unrelated pages.
    pub data_cache: PageCache,
}

impl<X: Xlen> Cpu<X> {
    pub fn new(id: u32) -> Self {
        Cpu {
            id,
            regs: Registers::new(),
            segment: None,
            reservation: None,
            instruction_counter: 0,
            verbose_instructions: false,
            verbose_registers: false,
            data_cache: None,
        }
    }

    /// Build a fresh Cpu from `other`, copying registers and, if
    /// `with_vector`, its vector file; used when Machine forks a hart.
    ///
    /// `share_execute_segment` controls whether the new hart aliases
    /// `other`'s current `ExecSegment` (same `Arc`, same underlying
    /// `DecoderCache`) or gets its own deep copy of it. Sharing is the
    /// common case — harts executing the same mapped text have no reason to
    /// duplicate its decoder cache. A caller that means to mutate one
    /// fork's view of the cache independently (e.g. self-modifying-code
    /// experiments, or isolating a hart before a risky rewrite) must pass
    /// `false` to actually get a private copy.
    pub fn fork_from(
        id: u32,
        other: &Cpu<X>,
        with_vector: bool,
        share_execute_segment: bool,
    ) -> Self {
        let mut cpu = Cpu::new(id);
        cpu.regs.copy_from(&other.regs, with_vector);
        cpu.segment = match &other.segment {
            Some(seg) if share_execute_segment => Some(seg.clone()),
            Some(seg) => Some(Arc::new(seg.deep_clone())),
            None => None,
        };
        cpu.verbose_instructions = other.verbose_instructions;
        cpu.verbose_registers = other.verbose_registers;
        cpu
    }

    pub fn reset(&mut self) {
        self.regs.reset();
        self.instruction_counter = 0;
        self.reservation = None;
        self.data_cache = None;
    }

    /// Validate `addr` lies in an executable region, update PC, and
    /// re-point the cached segment if the target falls outside the one
    /// currently held.
    pub fn jump(&mut self, segments: &[Arc<ExecSegment>], addr: u64) -> Result<()> {
        if addr % 2 != 0 {
            return Err(MachineException::new(Kind::MisalignedInstruction, addr));
        }
        if let Some(seg) = &self.segment {
            if seg.contains(addr) {
                self.regs.pc = X::Reg::from_u64(addr);
                return Ok(());
            }
        }
        for seg in segments {
            if seg.contains(addr) {
                self.segment = Some(seg.clone());
                self.regs.pc = X::Reg::from_u64(addr);
                return Ok(());
            }
        }
        Err(MachineException::new(
            Kind::ExecutionSpaceProtectionFault,
            addr,
        ))
    }

    pub fn trigger_exception(&self, kind: Kind, data: u64) -> MachineException {
        warn!(
            "cpu{}: {:?} at pc=0x{:x} data=0x{:x}",
            self.id,
            kind,
            self.regs.pc.as_u64(),
            data
        );
        MachineException::new(kind, data)
    }

    /// Execute exactly one instruction.
    pub fn step_one(
        &mut self,
        mem: &mut Memory<X>,
        on_ecall: &mut dyn FnMut(&mut Cpu<X>, &mut Memory<X>) -> Result<bool>,
    ) -> Result<bool> {
        let pc = self.regs.pc.as_u64();
        let seg = self
            .segment
            .clone()
            .ok_or_else(|| self.trigger_exception(Kind::ExecutionSpaceProtectionFault, pc))?;
        let entry = *seg
            .cache
            .slot(pc)
            .ok_or_else(|| self.trigger_exception(Kind::ExecutionSpaceProtectionFault, pc))?;

        if self.verbose_instructions {
            trace!("cpu{} pc=0x{:x} handler={:?}", self.id, pc, entry.handler);
        }

        let effect = execute::execute(self, mem, &entry, pc, on_ecall)
            .map_err(|e| self.trigger_exception(e.kind, e.data))?;

        let stop = match effect {
            Effect::Next => {
                self.regs.pc = X::Reg::from_u64(pc.wrapping_add(entry.opcode_length as u64));
                false
            }
            Effect::Jumped => false,
            Effect::Stop => true,
        };

        self.instruction_counter += 1;
        if self.verbose_registers {
            trace!("cpu{} regs after step: {:?}", self.id, self.regs.pc.as_u64());
        }
        Ok(stop)
    }

    /// Run, updating PC and the counter after every single instruction.
    pub fn simulate_precise(
        &mut self,
        mem: &mut Memory<X>,
        budget: u64,
        on_ecall: &mut dyn FnMut(&mut Cpu<X>, &mut Memory<X>) -> Result<bool>,
    ) -> Result<()> {
        while self.instruction_counter < budget {
            if self.step_one(mem, on_ecall)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Run using the decoder cache's `idxend` to batch counter increments
    /// across a basic block. Falls back to single-stepping for the final,
    /// partial span so the counter never overshoots `budget`.
    pub fn simulate(
        &mut self,
        mem: &mut Memory<X>,
        budget: u64,
        on_ecall: &mut dyn FnMut(&mut Cpu<X>, &mut Memory<X>) -> Result<bool>,
    ) -> Result<()> {
        while self.instruction_counter < budget {
            let pc = self.regs.pc.as_u64();
            let seg = self
                .segment
                .clone()
                .ok_or_else(|| self.trigger_exception(Kind::ExecutionSpaceProtectionFault, pc))?;
            let entry = *seg
                .cache
                .slot(pc)
                .ok_or_else(|| self.trigger_exception(Kind::ExecutionSpaceProtectionFault, pc))?;

            let remaining = budget - self.instruction_counter;
            if (entry.instr_count as u64) > remaining {
                // Partial span: single-step the rest so we stop exactly at
                // budget rather than running past it.
                if self.step_one(mem, on_ecall)? {
                    return Ok(());
                }
                continue;
            }

            // Whole span fits inside the remaining budget: run it slot by
            // slot, bumping the counter once up front per the spec's
            // batching contract, then advancing PC/segment lazily.
            self.instruction_counter += entry.instr_count as u64;
            let mut cur_pc = pc;
            let mut slots_left = entry.idxend;
            loop {
                let e = *seg.cache.slot(cur_pc).ok_or_else(|| {
                    self.trigger_exception(Kind::ExecutionSpaceProtectionFault, cur_pc)
                })?;
                let before = cur_pc;
                let effect = execute::execute(self, mem, &e, cur_pc, on_ecall)
                    .map_err(|err| self.trigger_exception(err.kind, err.data))?;
                match effect {
                    Effect::Next => {
                        cur_pc = before.wrapping_add(e.opcode_length as u64);
                        self.regs.pc = X::Reg::from_u64(cur_pc);
                    }
                    Effect::Jumped => {
                        cur_pc = self.regs.pc.as_u64();
                        break;
                    }
                    Effect::Stop => return Ok(()),
                }
                slots_left = slots_left.saturating_sub(1);
                if slots_left == 0 {
                    break;
                }
            }
            let _ = cur_pc;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageAttributes;
    use crate::xlen::Rv64;

    fn addi_nop_segment() -> (Arc<ExecSegment>, Memory<Rv64>) {
        // Four copies of `addi x1, x0, 1`; the decoder cache's synthesized
        // terminator at the final slot means only the first three are ever
        // dispatched through a fast run.
        let addi = (1u32 << 20) | (1 << 7) | 0x13;
        let mut code = Vec::new();
        for _ in 0..4 {
            code.extend_from_slice(&addi.to_le_bytes());
        }
        let cache = DecoderCache::build(0x1000, &code, 4);
        let seg = Arc::new(ExecSegment {
            cache: Arc::new(cache),
            len: code.len() as u64,
        });
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.load_segment(0x1000, &code, PageAttributes::new(true, false, true));
        (seg, mem)
    }

    #[test]
    fn precise_loop_advances_pc_and_counter() {
        let (seg, mut mem) = addi_nop_segment();
        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        cpu.jump(std::slice::from_ref(&seg), 0x1000).unwrap();
        let mut no_ecall = |_: &mut Cpu<Rv64>, _: &mut Memory<Rv64>| Ok(false);
        cpu.simulate_precise(&mut mem, 2, &mut no_ecall).unwrap();
        assert_eq!(cpu.instruction_counter, 2);
        assert_eq!(cpu.regs.get(1), 2);
    }

    #[test]
    fn jump_to_misaligned_target_faults() {
        let (seg, _mem) = addi_nop_segment();
        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        let err = cpu.jump(std::slice::from_ref(&seg), 0x1001).unwrap_err();
        assert_eq!(err.kind, Kind::MisalignedInstruction);
    }

    #[test]
    fn simulate_stops_exactly_at_budget() {
        let (seg, mut mem) = addi_nop_segment();
        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        cpu.jump(std::slice::from_ref(&seg), 0x1000).unwrap();
        let mut no_ecall = |_: &mut Cpu<Rv64>, _: &mut Memory<Rv64>| Ok(false);
        cpu.simulate(&mut mem, 3, &mut no_ecall).unwrap();
        assert_eq!(cpu.instruction_counter, 3);
    }

    #[test]
    fn fork_with_sharing_aliases_the_same_decoder_cache() {
        let (seg, _mem) = addi_nop_segment();
        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        cpu.jump(std::slice::from_ref(&seg), 0x1000).unwrap();
        let forked = Cpu::fork_from(1, &cpu, false, true);
        assert!(Arc::ptr_eq(
            &cpu.segment.as_ref().unwrap().cache,
            &forked.segment.as_ref().unwrap().cache
        ));
    }

    #[test]
    fn fork_without_sharing_gets_a_private_decoder_cache() {
        let (seg, _mem) = addi_nop_segment();
        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        cpu.jump(std::slice::from_ref(&seg), 0x1000).unwrap();
        let forked = Cpu::fork_from(1, &cpu, false, false);
        assert!(!Arc::ptr_eq(
            &cpu.segment.as_ref().unwrap().cache,
            &forked.segment.as_ref().unwrap().cache
        ));
        assert_eq!(
            cpu.segment.as_ref().unwrap().cache.base,
            forked.segment.as_ref().unwrap().cache.base
        );
    }

    fn i_type(opcode: u32, rd: u8, funct3: u32, rs1: u8, imm: i32) -> u32 {
        (((imm as u32) & 0xfff) << 20)
            | ((rs1 as u32) << 15)
            | (funct3 << 12)
            | ((rd as u32) << 7)
            | opcode
    }
    fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x13, rd, 0b000, rs1, imm)
    }
    fn sw(rs1: u8, rs2: u8, imm: i32) -> u32 {
        let imm = imm as u32;
        ((imm >> 5 & 0x7f) << 25)
            | ((rs2 as u32) << 20)
            | ((rs1 as u32) << 15)
            | (0b010 << 12)
            | ((imm & 0x1f) << 7)
            | 0x23
    }
    fn lw(rd: u8, rs1: u8, imm: i32) -> u32 {
        i_type(0x03, rd, 0b010, rs1, imm)
    }

    #[test]
    fn store_then_load_through_the_cpu_data_cache_round_trips() {
        // addi x5, x0, 42; sw x5, 0x20(x0); lw x6, 0x20(x0); addi x0, x0, 0
        // (trailing nop sacrificed to the cache's forced final-slot
        // terminator — see `addi_nop_segment` above).
        let code = {
            let mut words = Vec::new();
            words.extend_from_slice(&addi(5, 0, 42).to_le_bytes());
            words.extend_from_slice(&sw(0, 5, 0x20).to_le_bytes());
            words.extend_from_slice(&lw(6, 0, 0x20).to_le_bytes());
            words.extend_from_slice(&addi(0, 0, 0).to_le_bytes());
            words
        };
        let cache = DecoderCache::build(0x1000, &code, 4);
        let seg = Arc::new(ExecSegment {
            cache: Arc::new(cache),
            len: code.len() as u64,
        });
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.load_segment(0x1000, &code, PageAttributes::new(true, false, true));

        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        cpu.jump(std::slice::from_ref(&seg), 0x1000).unwrap();
        let mut no_ecall = |_: &mut Cpu<Rv64>, _: &mut Memory<Rv64>| Ok(false);
        cpu.simulate_precise(&mut mem, 3, &mut no_ecall).unwrap();

        assert_eq!(cpu.regs.get(6), 42);
        assert!(cpu.data_cache.is_some());
    }
}
