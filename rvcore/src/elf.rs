//! The boundary between this crate and an ELF loader.
//!
//! ELF parsing itself is an external collaborator (`rvcore-cli` supplies a
//! minimal one); this crate only needs the handful of fields `Machine`
//! consumes to populate memory and the decoder cache.

/// Permission bits for one loadable segment, mirroring `PT_LOAD`'s `p_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

/// One `PT_LOAD` segment: where it goes in guest memory and its bytes.
#[derive(Debug, Clone)]
pub struct Segment {
    pub vaddr: u64,
    pub data: Vec<u8>,
    pub flags: SegmentFlags,
}

/// A named address, usually from `.symtab`.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub addr: u64,
}

/// Everything `Machine::new` needs from a parsed ELF image.
///
/// Implemented by the embedder (see `rvcore-cli::elf` for a minimal
/// reader); this crate never parses ELF headers itself.
pub trait ElfView {
    fn entry_point(&self) -> u64;
    fn segments(&self) -> &[Segment];
    fn symbols(&self) -> &[Symbol];
    /// `4`, `8`, or `16`: the architectural word size, taken from
    /// `EI_CLASS`/`e_machine` by the embedder.
    fn xlen_bytes(&self) -> usize;
}
