//! Smoke-test entry point: load a RISC-V ELF binary and run it to
//! completion, printing guest `write` output to stdout. This binary is an
//! external collaborator exercising `rvcore`, not part of the core itself.

mod elf;

use std::io::Write;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use log::error;

use rvcore::elf::ElfView;
use rvcore::machine::{Machine, MachineOptions, StopReason};
use rvcore::xlen::{Rv32, Rv64, Rv128};

fn print_sink() -> rvcore::syscalls::PrintSink {
    Arc::new(Mutex::new(|bytes: &[u8]| {
        let _ = std::io::stdout().write_all(bytes);
    }))
}

fn run<X: rvcore::Xlen + 'static>(parsed: &dyn ElfView) -> ExitCode {
    let options = MachineOptions::default().with_print(print_sink());
    let mut machine: Machine<X> = Machine::new(parsed, options);
    machine.setup_minimal_syscalls(0x9000_0000);
    machine.set_max_instructions(u64::MAX);
    match machine.simulate() {
        Ok(StopReason::Exited(code)) => ExitCode::from(code as u8),
        Ok(StopReason::BudgetExhausted) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: rvcore-cli <elf-path>");
            return ExitCode::FAILURE;
        }
    };
    let parsed = match elf::load(&path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("failed to load {path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    match parsed.xlen_bytes() {
        4 => run::<Rv32>(&parsed),
        16 => run::<Rv128>(&parsed),
        _ => run::<Rv64>(&parsed),
    }
}
