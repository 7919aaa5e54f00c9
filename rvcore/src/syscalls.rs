//! The `a7`-indexed syscall table `ECALL` dispatches through, plus the
//! minimal default set (`exit`, `write`, `read`, `close`, `brk`).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::cpu::Cpu;
use crate::error::{Kind, MachineException, Result};
use crate::memory::Memory;
use crate::xlen::{Word, Xlen};

/// What a syscall handler asks the machine to do next.
pub enum SyscallEffect {
    Continue,
    Stop { exit_code: i32 },
}

/// One syscall handler: reads `a0..a6` off `cpu.regs`, may touch memory,
/// and returns the register-width result to place in `a0` plus an effect.
pub type SyscallFn<X> =
    Box<dyn FnMut(&mut Cpu<X>, &mut Memory<X>) -> Result<SyscallEffect> + Send>;

/// The `a7`-keyed dispatch table installed on a Machine.
pub struct SyscallTable<X: Xlen> {
    handlers: BTreeMap<u32, SyscallFn<X>>,
}

impl<X: Xlen> SyscallTable<X> {
    pub fn new() -> Self {
        SyscallTable {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, number: u32, handler: SyscallFn<X>) {
        self.handlers.insert(number, handler);
    }

    /// Dispatch based on `cpu.regs.a(7)`. Unregistered numbers raise
    /// `UNIMPLEMENTED_INSTRUCTION` carrying the syscall number as `data`.
    pub fn dispatch(&mut self, cpu: &mut Cpu<X>, mem: &mut Memory<X>) -> Result<SyscallEffect> {
        let num = cpu.regs.a(7).as_u64() as u32;
        match self.handlers.get_mut(&num) {
            Some(handler) => handler(cpu, mem),
            None => Err(MachineException::new(
                Kind::UnimplementedInstruction,
                num as u64,
            )),
        }
    }
}

impl<X: Xlen> Default for SyscallTable<X> {
    fn default() -> Self {
        Self::new()
    }
}

/// Host sink for guest `write(1, ...)`/`write(2, ...)` output, shared with
/// whatever the embedder installed as `MachineOptions::print`.
pub type PrintSink = Arc<Mutex<dyn FnMut(&[u8]) + Send>>;

/// Register the minimal syscall set the spec names: `exit(93)`, `write(64)`,
/// `read(63)`, `close(57)`, `brk(214)`. `brk` tracks its break pointer in
/// `brk_base` onward with no real allocation policy beyond bumping it.
pub fn install_minimal<X: Xlen + 'static>(
    table: &mut SyscallTable<X>,
    print: PrintSink,
    brk_base: u64,
) {
    table.register(
        93,
        Box::new(|cpu, _mem| {
            let code = cpu.regs.a(0).as_u64() as i32;
            Ok(SyscallEffect::Stop { exit_code: code })
        }),
    );

    {
        let print = print.clone();
        table.register(
            64,
            Box::new(move |cpu, mem| {
                let _fd = cpu.regs.a(0).as_u64();
                let addr = cpu.regs.a(1).as_u64();
                let len = cpu.regs.a(2).as_u64();
                let buf = mem.rvbuffer(addr, len, len)?;
                if let Ok(mut sink) = print.lock() {
                    sink(&buf);
                }
                cpu.regs.set_a(0, X::Reg::from_u64(len));
                Ok(SyscallEffect::Continue)
            }),
        );
    }

    table.register(
        63,
        Box::new(|cpu, _mem| {
            // No host stdin wired up: report EOF (0 bytes read).
            cpu.regs.set_a(0, X::Reg::ZERO);
            Ok(SyscallEffect::Continue)
        }),
    );

    table.register(
        57,
        Box::new(|cpu, _mem| {
            cpu.regs.set_a(0, X::Reg::ZERO);
            Ok(SyscallEffect::Continue)
        }),
    );

    {
        let brk = Arc::new(Mutex::new(brk_base));
        table.register(
            214,
            Box::new(move |cpu, _mem| {
                let requested = cpu.regs.a(0).as_u64();
                let mut cur = brk.lock().expect("brk mutex poisoned");
                if requested > *cur {
                    *cur = requested;
                }
                cpu.regs.set_a(0, X::Reg::from_u64(*cur));
                Ok(SyscallEffect::Continue)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlen::Rv64;

    #[test]
    fn exit_requests_stop_with_a0_code() {
        let mut table: SyscallTable<Rv64> = SyscallTable::new();
        let sink: PrintSink = Arc::new(Mutex::new(|_: &[u8]| {}));
        install_minimal(&mut table, sink, 0x9000_0000);
        let mut cpu: Cpu<Rv64> = Cpu::new(0);
        cpu.regs.set_a(7, 93);
        cpu.regs.set_a(0, 7);
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        match table.dispatch(&mut cpu, &mut mem).unwrap() {
            SyscallEffect::Stop { exit_code } => assert_eq!(exit_code, 7),
            SyscallEffect::Continue => panic!("expected stop"),
        }
    }
}
