//! Top-level container: memory, harts, the syscall table, and the
//! instruction budget. Mirrors `VmEngine`'s role in the teacher crate — one
//! options record in, one object that owns everything the guest touches.

use std::sync::Arc;

use log::debug;

use crate::cpu::{Cpu, ExecSegment};
use crate::decoder::DecoderCache;
use crate::elf::ElfView;
use crate::error::Result;
use crate::memory::Memory;
use crate::page::PageAttributes;
use crate::syscalls::{self, PrintSink, SyscallEffect, SyscallTable};
use crate::xlen::{Word, Xlen};

/// Every construction-time knob, gathered into one record the way
/// `corevm_create`/`VmEngine::new` takes a single options struct rather
/// than a long parameter list.
pub struct MachineOptions {
    pub memory_max: u64,
    pub stack_size: u64,
    pub allow_write_exec_segment: bool,
    pub verbose_instructions: bool,
    pub verbose_registers: bool,
    pub use_shared_execute_segments: bool,
    pub print: Option<PrintSink>,
}

impl Default for MachineOptions {
    fn default() -> Self {
        MachineOptions {
            memory_max: u64::MAX,
            stack_size: 2 * 1024 * 1024,
            allow_write_exec_segment: false,
            verbose_instructions: false,
            verbose_registers: false,
            use_shared_execute_segments: false,
            print: None,
        }
    }
}

impl MachineOptions {
    pub fn with_memory_max(mut self, v: u64) -> Self {
        self.memory_max = v;
        self
    }
    pub fn with_stack_size(mut self, v: u64) -> Self {
        self.stack_size = v;
        self
    }
    pub fn with_allow_write_exec_segment(mut self, v: bool) -> Self {
        self.allow_write_exec_segment = v;
        self
    }
    pub fn with_verbose_instructions(mut self, v: bool) -> Self {
        self.verbose_instructions = v;
        self
    }
    pub fn with_verbose_registers(mut self, v: bool) -> Self {
        self.verbose_registers = v;
        self
    }
    pub fn with_use_shared_execute_segments(mut self, v: bool) -> Self {
        self.use_shared_execute_segments = v;
        self
    }
    pub fn with_print(mut self, sink: PrintSink) -> Self {
        self.print = Some(sink);
        self
    }
}

/// Why `simulate` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Exited(i32),
    BudgetExhausted,
}

pub struct Machine<X: Xlen> {
    pub memory: Memory<X>,
    pub cpu: Cpu<X>,
    segments: Vec<Arc<ExecSegment>>,
    syscalls: SyscallTable<X>,
    entry_pc: u64,
    max_instructions: u64,
    options: MachineOptions,
}

impl<X: Xlen + 'static> Machine<X> {
    /// Build a Machine from a parsed ELF view and options: map every
    /// `PT_LOAD` segment into memory, build a decoder cache for every
    /// executable one, and install the minimal syscall set.
    pub fn new(elf: &dyn ElfView, options: MachineOptions) -> Self {
        let mut memory = Memory::new(options.memory_max);
        let mut segments = Vec::new();

        for seg in elf.segments() {
            let attrs = PageAttributes {
                read: seg.flags.read,
                write: seg.flags.write || options.allow_write_exec_segment,
                exec: seg.flags.exec,
                is_cow: false,
                non_owning: true,
                has_trap: false,
            };
            memory.load_segment(seg.vaddr, &seg.data, attrs);
            if seg.flags.exec {
                let cache = DecoderCache::build(seg.vaddr, &seg.data, X::DIVISOR);
                segments.push(Arc::new(ExecSegment {
                    cache: Arc::new(cache),
                    len: seg.data.len() as u64,
                }));
            }
        }

        for sym in elf.symbols() {
            memory.add_symbol(sym.name.clone(), sym.addr);
        }

        let mut cpu = Cpu::new(0);
        cpu.verbose_instructions = options.verbose_instructions;
        cpu.verbose_registers = options.verbose_registers;

        let mut machine = Machine {
            memory,
            cpu,
            segments,
            syscalls: SyscallTable::new(),
            entry_pc: elf.entry_point(),
            max_instructions: u64::MAX,
            options,
        };
        machine.cpu.jump(&machine.segments, machine.entry_pc).ok();
        machine
    }

    /// Install `exit`/`write`/`read`/`close`/`brk`, using `options.print`
    /// (or a no-op sink) for guest output and `brk_base` as the initial
    /// program break.
    pub fn setup_minimal_syscalls(&mut self, brk_base: u64) {
        let print = self
            .options
            .print
            .clone()
            .unwrap_or_else(|| Arc::new(std::sync::Mutex::new(|_: &[u8]| {})));
        syscalls::install_minimal(&mut self.syscalls, print, brk_base);
    }

    pub fn register_syscall(&mut self, number: u32, handler: crate::syscalls::SyscallFn<X>) {
        self.syscalls.register(number, handler);
    }

    /// Reinitialize registers and jump back to the entry point.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.cpu.jump(&self.segments, self.entry_pc).ok();
    }

    pub fn instruction_counter(&self) -> u64 {
        self.cpu.instruction_counter
    }

    pub fn max_instructions(&self) -> u64 {
        self.max_instructions
    }

    pub fn set_max_instructions(&mut self, v: u64) {
        self.max_instructions = v;
    }

    /// Fork a new hart from the current one and (optionally) its vector
    /// file, per the spec's multi-hart model. Whether the new hart aliases
    /// the current hart's decoder cache or gets a private copy of it is
    /// governed by `options.use_shared_execute_segments`.
    pub fn fork_cpu(&self, id: u32, with_vector: bool) -> Cpu<X> {
        Cpu::fork_from(
            id,
            &self.cpu,
            with_vector,
            self.options.use_shared_execute_segments,
        )
    }

    /// Run the primary hart until budget exhaustion, an `exit` syscall, or
    /// an exception (propagated to the caller).
    pub fn simulate(&mut self) -> Result<StopReason> {
        let budget = self.max_instructions;
        let syscalls = &mut self.syscalls;
        let mut exit_code: Option<i32> = None;
        {
            let mut on_ecall = |cpu: &mut Cpu<X>, mem: &mut Memory<X>| -> Result<bool> {
                match syscalls.dispatch(cpu, mem)? {
                    SyscallEffect::Continue => Ok(false),
                    SyscallEffect::Stop { exit_code: code } => {
                        exit_code = Some(code);
                        Ok(true)
                    }
                }
            };
            self.cpu.simulate(&mut self.memory, budget, &mut on_ecall)?;
        }
        debug!(
            "machine stopped at counter={} pc=0x{:x}",
            self.cpu.instruction_counter,
            self.cpu.regs.pc.as_u64()
        );
        Ok(match exit_code {
            Some(code) => StopReason::Exited(code),
            None => StopReason::BudgetExhausted,
        })
    }

    /// Same as [`Self::simulate`] but using the precise (non-batched) loop;
    /// useful for debugging and for scenarios that must observe the counter
    /// mid-run.
    pub fn simulate_precise(&mut self) -> Result<StopReason> {
        let budget = self.max_instructions;
        let syscalls = &mut self.syscalls;
        let mut exit_code: Option<i32> = None;
        {
            let mut on_ecall = |cpu: &mut Cpu<X>, mem: &mut Memory<X>| -> Result<bool> {
                match syscalls.dispatch(cpu, mem)? {
                    SyscallEffect::Continue => Ok(false),
                    SyscallEffect::Stop { exit_code: code } => {
                        exit_code = Some(code);
                        Ok(true)
                    }
                }
            };
            self.cpu
                .simulate_precise(&mut self.memory, budget, &mut on_ecall)?;
        }
        Ok(match exit_code {
            Some(code) => StopReason::Exited(code),
            None => StopReason::BudgetExhausted,
        })
    }
}
