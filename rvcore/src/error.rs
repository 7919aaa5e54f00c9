//! Error types for rvcore.
//!
//! [`MachineException`] serves a dual purpose: it is both the Rust error type
//! returned from fallible operations and the representation of a guest
//! exception. The CPU's execution loops catch these and unwind `simulate`
//! without ever panicking.

use thiserror::Error;

/// The fixed set of exception kinds the core can raise.
///
/// Every kind maps to exactly one human-readable message via [`Kind::message`];
/// raise sites only ever supply a `Kind` and a `data` word, never a free-form
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Opcode bits decode to no handler.
    IllegalOpcode,
    /// Valid opcode, invalid operand combination (reserved encoding).
    IllegalOperation,
    /// Read/write to a page lacking the required attribute.
    ProtectionFault,
    /// PC fetch from a non-executable page.
    ExecutionSpaceProtectionFault,
    /// Jump/branch target not aligned to 2.
    MisalignedInstruction,
    /// Typed access violates natural alignment (when enforced).
    InvalidAlignment,
    /// Handler intentionally absent (unsupported extension).
    UnimplementedInstruction,
    /// Atomic spin detector fired.
    DeadlockReached,
    /// Allocation or scatter-gather vector exhausted.
    OutOfMemory,
    /// A scatter-gather helper ran out of buffer slots.
    OutOfBuffers,
    /// Fallback for conditions with no dedicated kind.
    UnknownException,
}

impl Kind {
    /// The fixed, human-readable message for this kind.
    pub const fn message(self) -> &'static str {
        match self {
            Kind::IllegalOpcode => "illegal opcode",
            Kind::IllegalOperation => "illegal operation",
            Kind::ProtectionFault => "protection fault",
            Kind::ExecutionSpaceProtectionFault => "execution space protection fault",
            Kind::MisalignedInstruction => "misaligned instruction",
            Kind::InvalidAlignment => "invalid alignment",
            Kind::UnimplementedInstruction => "unimplemented instruction",
            Kind::DeadlockReached => "deadlock reached",
            Kind::OutOfMemory => "out of memory",
            Kind::OutOfBuffers => "out of buffers",
            Kind::UnknownException => "unknown exception",
        }
    }
}

/// A fatal, synchronous guest exception.
///
/// Carries the `Kind`, a kind-specific `data` word (usually the faulting
/// address), and the fixed message for that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind:?}: {message} (data=0x{data:x})")]
pub struct MachineException {
    pub kind: Kind,
    pub data: u64,
    pub message: &'static str,
}

impl MachineException {
    /// Construct an exception of `kind` carrying `data`, looking up the
    /// fixed message for that kind.
    pub fn new(kind: Kind, data: u64) -> Self {
        MachineException {
            kind,
            data,
            message: kind.message(),
        }
    }
}

/// Convenience result alias for rvcore operations.
pub type Result<T> = core::result::Result<T, MachineException>;
