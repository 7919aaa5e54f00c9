//! Guest physical memory pages: fixed-size buffers plus attributes and an
//! optional MMIO trap hook.
//!
//! A single shared [`ZERO_PAGE`] answers every read against an unmapped
//! address without allocating; the first write to that address promotes the
//! mapping to a private, owning page (copy-on-write).

/// Guest page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Read trap direction bit OR'd into the `size` word passed to a page trap.
pub const TRAP_READ: u32 = 0;
/// Write trap direction bit OR'd into the `size` word passed to a page trap.
pub const TRAP_WRITE: u32 = 1 << 31;

/// Permission and lifecycle bits for one [`Page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAttributes {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    /// Shared, copy-on-write; must be cloned into an owning page before
    /// mutation.
    pub is_cow: bool,
    /// Wraps externally supplied memory (e.g. an ELF `PT_LOAD` segment)
    /// rather than heap-allocated storage owned by this `Page`.
    pub non_owning: bool,
    /// Carries an MMIO trap callback; typed accesses route through it
    /// instead of `data`.
    pub has_trap: bool,
}

impl PageAttributes {
    /// The zero page's fixed attributes: readable, not writable, not
    /// executable, copy-on-write.
    pub const ZERO_PAGE: PageAttributes = PageAttributes {
        read: true,
        write: false,
        exec: false,
        is_cow: true,
        non_owning: false,
        has_trap: false,
    };

    /// Default attributes for a freshly materialized, heap-owning page:
    /// read/write, not executable.
    pub const RW: PageAttributes = PageAttributes {
        read: true,
        write: true,
        exec: false,
        is_cow: false,
        non_owning: false,
        has_trap: false,
    };

    pub const fn new(read: bool, write: bool, exec: bool) -> Self {
        PageAttributes {
            read,
            write,
            exec,
            is_cow: false,
            non_owning: false,
            has_trap: false,
        }
    }
}

impl Default for PageAttributes {
    fn default() -> Self {
        PageAttributes::RW
    }
}

/// A host callback invoked on a typed access to a trapped page.
///
/// Called with `(offset_in_page, size_and_direction, value_on_write)` and
/// returns the value to use for a read, or is ignored for a write.
pub type PageTrap = Box<dyn FnMut(u32, u32, u64) -> u64 + Send>;

/// One fixed-size guest memory page.
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
    pub attr: PageAttributes,
    trap: Option<PageTrap>,
}

impl Page {
    /// A freshly allocated, zeroed, owning page with `attr`.
    pub fn new(attr: PageAttributes) -> Self {
        Page {
            data: Box::new([0u8; PAGE_SIZE]),
            attr,
            trap: None,
        }
    }

    /// Construct the process-wide zero page. Its contents are never
    /// mutated; writers must clone into a fresh owning page first.
    pub fn zero_page() -> Self {
        Page::new(PageAttributes::ZERO_PAGE)
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    /// Clone this page's contents into a new owning, writable page. Used
    /// to materialize a private copy before the first write to a CoW page.
    pub fn clone_for_write(&self) -> Page {
        let mut attr = self.attr;
        attr.is_cow = false;
        attr.non_owning = false;
        let mut p = Page::new(attr);
        *p.data = *self.data;
        p
    }

    pub fn set_trap(&mut self, trap: PageTrap) {
        self.attr.has_trap = true;
        self.trap = Some(trap);
    }

    pub fn trap_mut(&mut self) -> Option<&mut PageTrap> {
        self.trap.as_mut()
    }
}

/// Raw byte-slab view used by [`Page::non_owning`] wrappers over externally
/// supplied memory (e.g. an ELF executable segment's backing bytes).
///
/// Kept separate from `Page` itself: non-owning pages still need a
/// `PAGE_SIZE` window, so the embedder-supplied buffer is copied into a
/// normal owning `Page` at load time and marked `non_owning` only for
/// bookkeeping/diagnostics, matching the spec's description of the
/// executable segment's pages being backed "by externally supplied memory"
/// conceptually while keeping the page table's element type uniform.
pub fn copy_into_page(attr: PageAttributes, src: &[u8]) -> Page {
    let mut page = Page::new(attr);
    let n = src.len().min(PAGE_SIZE);
    page.data_mut()[..n].copy_from_slice(&src[..n]);
    page
}
