//! Paged guest memory: typed reads/writes, page-fault extension point, and
//! bulk string/buffer helpers.
//!
//! Mirrors the page-walk shape of the bulk helpers in the original
//! `libriscv` core (`memory_helpers_paging.hpp`/`memory_inline.hpp`) and
//! the protection/trap checks in `libcorevm`'s `GuestMemory::read`/`write`,
//! adapted to a safe sparse page table. Pages live in an append-only
//! `slab`, addressed by `pageno -> slab index` through `pages`; the last
//! resolved `(pageno, index)` is cached in `hot` so a hit skips the
//! `BTreeMap` lookup entirely (the index stays valid for the page's whole
//! lifetime, even across copy-on-write promotion, since promotion
//! overwrites the slab slot in place rather than moving it). `generation`
//! is bumped whenever a pageno is unmapped or rebound to a different slab
//! slot, so a stale cached index is never read as live data — including a
//! caller-owned cache living outside this struct (see
//! `read_bytes_typed_cached`/`write_bytes_typed_cached`, used by [`crate::cpu::Cpu`]
//! for its own hot-loop data accesses). No raw pointers and no `Rc`/`Arc`
//! aliasing are needed for any of this: the cache is just a `(key, index)`
//! pair, validated against `generation` before every use.

use std::collections::BTreeMap;

use crate::error::{Kind, MachineException, Result};
use crate::page::{copy_into_page, Page, PageAttributes, PAGE_SIZE};
use crate::xlen::{Word, Xlen};

fn page_number(addr: u64) -> u64 {
    addr >> 12
}

fn page_offset(addr: u64) -> usize {
    (addr & (PAGE_SIZE as u64 - 1)) as usize
}

/// A caller-installed callback producing a page on demand for `create_page`.
/// The default behavior (when none is installed) is to allocate a zeroed,
/// read/write owning page.
pub type PageFaultHandler = Box<dyn FnMut(u64) -> Page + Send>;

/// A hot-slot cache entry: `(pageno, slab index, generation seen)`. Shared
/// shape between `Memory`'s own internal cache and any external cache a
/// caller (e.g. a CPU) keeps independently.
pub type PageCache = Option<(u64, usize, u64)>;

/// Paged guest physical memory.
pub struct Memory<X: Xlen> {
    /// `pageno -> slab index`.
    pages: BTreeMap<u64, usize>,
    /// Owns every materialized page; append-only so a cached slab index
    /// never dangles or gets reused for an unrelated page.
    slab: Vec<Page>,
    /// Last-resolved `(pageno, index, generation)`, consulted first by
    /// this struct's own typed read/write path.
    hot: PageCache,
    /// Bumped whenever a pageno is unmapped or freshly bound, invalidating
    /// any cached entry (internal or external) still referencing the old
    /// binding.
    generation: u64,
    /// Optional flat arena: `[0, arena_size)` served directly from a
    /// contiguous host buffer, bypassing the page map entirely.
    arena: Option<Vec<u8>>,
    arena_write_boundary: u64,
    page_fault_handler: Option<PageFaultHandler>,
    #[allow(dead_code)]
    memory_max: u64,
    exit_address: u64,
    symbols: BTreeMap<String, u64>,
    _xlen: std::marker::PhantomData<X>,
}

impl<X: Xlen> Memory<X> {
    pub fn new(memory_max: u64) -> Self {
        Memory {
            pages: BTreeMap::new(),
            slab: Vec::new(),
            hot: None,
            generation: 0,
            arena: None,
            arena_write_boundary: 0,
            page_fault_handler: None,
            memory_max,
            exit_address: 0,
            symbols: BTreeMap::new(),
            _xlen: std::marker::PhantomData,
        }
    }

    /// Resolve `pageno` against `cache` first; on a hit (matching pageno
    /// and generation) the `BTreeMap` lookup is skipped entirely.
    fn resolve_cached(&mut self, pageno: u64, cache: &mut PageCache) -> Option<usize> {
        if let Some((p, idx, gen)) = *cache {
            if p == pageno && gen == self.generation {
                return Some(idx);
            }
        }
        let idx = *self.pages.get(&pageno)?;
        *cache = Some((pageno, idx, self.generation));
        Some(idx)
    }

    /// Like [`Self::resolve_cached`] but materializes/promotes the page
    /// for writing, inserting a fresh one via the page-fault handler (or
    /// the default zeroed-RW allocator) if `pageno` is unmapped.
    fn resolve_cached_write(&mut self, pageno: u64, cache: &mut PageCache) -> usize {
        if let Some((p, idx, gen)) = *cache {
            if p == pageno && gen == self.generation {
                if self.slab[idx].attr.is_cow {
                    self.slab[idx] = self.slab[idx].clone_for_write();
                }
                return idx;
            }
        }
        let idx = match self.pages.get(&pageno) {
            Some(&idx) => idx,
            None => {
                let page = match self.page_fault_handler.as_mut() {
                    Some(h) => h(pageno),
                    None => Page::new(PageAttributes::RW),
                };
                let idx = self.slab.len();
                self.slab.push(page);
                self.pages.insert(pageno, idx);
                idx
            }
        };
        if self.slab[idx].attr.is_cow {
            self.slab[idx] = self.slab[idx].clone_for_write();
        }
        *cache = Some((pageno, idx, self.generation));
        idx
    }

    /// Enable the flat arena fast path for `[0, size)`. `write_boundary`
    /// bounds the range writes may target directly; reads use the full
    /// `size`. The arena is authoritative within its bounds and is never
    /// mirrored into the page map (see design notes open question).
    pub fn enable_arena(&mut self, size: usize, write_boundary: usize) {
        self.arena = Some(vec![0u8; size]);
        self.arena_write_boundary = write_boundary as u64;
    }

    pub fn set_page_fault_handler(&mut self, handler: PageFaultHandler) {
        self.page_fault_handler = Some(handler);
    }

    pub fn set_exit_address(&mut self, addr: u64) {
        self.exit_address = addr;
    }

    pub fn exit_address(&self) -> u64 {
        self.exit_address
    }

    pub fn add_symbol(&mut self, name: impl Into<String>, addr: u64) {
        self.symbols.insert(name.into(), addr);
    }

    pub fn resolve_address(&self, name: &str) -> u64 {
        self.symbols.get(name).copied().unwrap_or(0)
    }

    fn in_arena(&self, addr: u64, len: u64, write: bool) -> bool {
        match &self.arena {
            None => false,
            Some(a) => {
                let end = addr.saturating_add(len);
                let bound = if write {
                    self.arena_write_boundary
                } else {
                    a.len() as u64
                };
                end <= bound && end >= addr
            }
        }
    }

    /// Returns the mapped page at `pageno`, or `None` if unmapped (the
    /// shared, all-zero page). Never allocates.
    pub fn get_pageno(&self, pageno: u64) -> Option<&Page> {
        self.pages.get(&pageno).map(|&idx| &self.slab[idx])
    }

    /// Returns the mapped executable page at `pageno`, raising
    /// `EXECUTION_SPACE_PROTECTION_FAULT` if absent.
    pub fn get_exec_pageno(&self, pageno: u64) -> Result<&Page> {
        self.get_pageno(pageno).ok_or_else(|| {
            MachineException::new(Kind::ExecutionSpaceProtectionFault, pageno << 12)
        })
    }

    /// Returns a writable, owning page at `pageno`, materializing it via
    /// the page-fault handler (or the default zeroed-RW allocator) if
    /// absent, and promoting a CoW page to owning if present.
    pub fn create_page(&mut self, pageno: u64) -> &mut Page {
        let mut hot = self.hot;
        let idx = self.resolve_cached_write(pageno, &mut hot);
        self.hot = hot;
        &mut self.slab[idx]
    }

    /// Apply `attrs` over `[addr, addr+len)`. Pages still CoW are left
    /// unmapped when `attrs` equals the default RW attributes; otherwise
    /// (or for non-default attrs) pages are materialized.
    pub fn set_page_attr(&mut self, addr: u64, len: u64, attrs: PageAttributes) {
        let is_default = attrs == PageAttributes::RW;
        let mut dst = addr;
        let mut remaining = len;
        while remaining > 0 {
            let pageno = page_number(dst);
            let size = (PAGE_SIZE as u64).min(remaining);
            if !is_default {
                self.create_page(pageno).attr = attrs;
            } else {
                let still_cow = self
                    .pages
                    .get(&pageno)
                    .map(|&idx| self.slab[idx].attr.is_cow)
                    .unwrap_or(true);
                if !still_cow {
                    self.create_page(pageno).attr = attrs;
                }
            }
            dst += size;
            remaining -= size;
        }
    }

    pub fn get_page_attr(&self, addr: u64) -> PageAttributes {
        match self.get_pageno(page_number(addr)) {
            Some(p) => p.attr,
            None => PageAttributes::ZERO_PAGE,
        }
    }

    /// Erase every non-CoW page intersecting `[addr, addr+len)`. Bumps
    /// `generation` whenever a pageno is actually unmapped, so any cached
    /// index pointing at it (this struct's own, or an external one like a
    /// CPU's) is treated as a miss on its next use rather than silently
    /// reading the freed page's now-stale slab slot.
    pub fn free_pages(&mut self, addr: u64, len: u64) {
        let mut dst = addr;
        let mut remaining = len;
        while remaining > 0 {
            let size = (PAGE_SIZE as u64).min(remaining);
            let pageno = page_number(dst);
            let keep_cow = matches!(self.pages.get(&pageno), Some(&idx) if self.slab[idx].attr.is_cow);
            if !keep_cow && self.pages.remove(&pageno).is_some() {
                self.generation += 1;
            }
            dst += size;
            remaining -= size;
        }
    }

    pub fn nonshared_pages_active(&self) -> usize {
        self.pages.values().filter(|&&idx| !self.slab[idx].attr.non_owning).count()
    }

    /// Load a `PT_LOAD`-style segment's bytes into owning pages, marking
    /// them with `attrs` (and `non_owning` for bookkeeping).
    pub fn load_segment(&mut self, base_addr: u64, data: &[u8], mut attrs: PageAttributes) {
        attrs.non_owning = true;
        attrs.is_cow = false;
        let mut addr = base_addr;
        let mut offset = 0usize;
        while offset < data.len() {
            let pageno = page_number(addr);
            let in_page = page_offset(addr);
            let chunk_len = (PAGE_SIZE - in_page).min(data.len() - offset);
            let page = if in_page == 0 {
                copy_into_page(attrs, &data[offset..offset + chunk_len])
            } else {
                let mut p = Page::new(attrs);
                p.data_mut()[in_page..in_page + chunk_len]
                    .copy_from_slice(&data[offset..offset + chunk_len]);
                p
            };
            let idx = self.slab.len();
            self.slab.push(page);
            self.pages.insert(pageno, idx);
            self.generation += 1;
            addr += chunk_len as u64;
            offset += chunk_len;
        }
    }

    // ---- typed access ----------------------------------------------------

    /// Aligned typed read of 1/2/4/8 bytes. Unmapped addresses read as
    /// zero without allocating a page. Consults this `Memory`'s own hot
    /// slot first; see [`Self::read_bytes_typed_cached`] for a version
    /// that consults a caller-owned slot instead.
    pub fn read_bytes_typed(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let mut hot = self.hot;
        let r = self.read_bytes_typed_cached(addr, buf, &mut hot);
        self.hot = hot;
        r
    }

    pub fn write_bytes_typed(&mut self, addr: u64, buf: &[u8]) -> Result<()> {
        let mut hot = self.hot;
        let r = self.write_bytes_typed_cached(addr, buf, &mut hot);
        self.hot = hot;
        r
    }

    /// Same contract as [`Self::read_bytes_typed`], but the hot-slot cache
    /// consulted is the caller's own `cache`, independent of this
    /// `Memory`'s internal one. Lets a CPU keep a private cache for its
    /// own repeat accesses that survives interleaved accesses made
    /// through this `Memory` by other means (other harts, bulk helpers).
    pub fn read_bytes_typed_cached(
        &mut self,
        addr: u64,
        buf: &mut [u8],
        cache: &mut PageCache,
    ) -> Result<()> {
        if self.in_arena(addr, buf.len() as u64, false) {
            let a = self.arena.as_ref().unwrap();
            buf.copy_from_slice(&a[addr as usize..addr as usize + buf.len()]);
            return Ok(());
        }
        let offset = page_offset(addr);
        if offset + buf.len() > PAGE_SIZE {
            return Err(MachineException::new(Kind::InvalidAlignment, addr));
        }
        let pageno = page_number(addr);
        let idx = match self.resolve_cached(pageno, cache) {
            None => {
                buf.fill(0);
                return Ok(());
            }
            Some(idx) => idx,
        };
        let page = &mut self.slab[idx];
        if !page.attr.read {
            return Err(MachineException::new(Kind::ProtectionFault, addr));
        }
        if page.attr.has_trap {
            if let Some(trap) = page.trap_mut() {
                let size = buf.len() as u32;
                let v = trap(offset as u32, size, 0);
                buf.copy_from_slice(&v.to_le_bytes()[..buf.len()]);
                return Ok(());
            }
        }
        buf.copy_from_slice(&page.data()[offset..offset + buf.len()]);
        Ok(())
    }

    /// See [`Self::read_bytes_typed_cached`]; the write-side counterpart.
    pub fn write_bytes_typed_cached(
        &mut self,
        addr: u64,
        buf: &[u8],
        cache: &mut PageCache,
    ) -> Result<()> {
        if self.in_arena(addr, buf.len() as u64, true) {
            let a = self.arena.as_mut().unwrap();
            a[addr as usize..addr as usize + buf.len()].copy_from_slice(buf);
            return Ok(());
        }
        let offset = page_offset(addr);
        if offset + buf.len() > PAGE_SIZE {
            return Err(MachineException::new(Kind::InvalidAlignment, addr));
        }
        let pageno = page_number(addr);
        let idx = self.resolve_cached_write(pageno, cache);
        let page = &mut self.slab[idx];
        if !page.attr.write {
            return Err(MachineException::new(Kind::ProtectionFault, addr));
        }
        if page.attr.has_trap {
            if let Some(trap) = page.trap_mut() {
                let mut v = 0u64;
                for (i, b) in buf.iter().enumerate() {
                    v |= (*b as u64) << (8 * i);
                }
                trap(offset as u32, buf.len() as u32, v);
                return Ok(());
            }
        }
        page.data_mut()[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    pub fn read_u8(&mut self, addr: u64) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes_typed(addr, &mut b)?;
        Ok(b[0])
    }
    pub fn read_u16(&mut self, addr: u64) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_bytes_typed(addr, &mut b)?;
        Ok(u16::from_le_bytes(b))
    }
    pub fn read_u32(&mut self, addr: u64) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_bytes_typed(addr, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }
    pub fn read_u64(&mut self, addr: u64) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_bytes_typed(addr, &mut b)?;
        Ok(u64::from_le_bytes(b))
    }
    pub fn write_u8(&mut self, addr: u64, v: u8) -> Result<()> {
        self.write_bytes_typed(addr, &[v])
    }
    pub fn write_u16(&mut self, addr: u64, v: u16) -> Result<()> {
        self.write_bytes_typed(addr, &v.to_le_bytes())
    }
    pub fn write_u32(&mut self, addr: u64, v: u32) -> Result<()> {
        self.write_bytes_typed(addr, &v.to_le_bytes())
    }
    pub fn write_u64(&mut self, addr: u64, v: u64) -> Result<()> {
        self.write_bytes_typed(addr, &v.to_le_bytes())
    }

    // ---- sized access through a caller-owned hot-slot cache ----------

    pub fn read_u8_cached(&mut self, addr: u64, cache: &mut PageCache) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes_typed_cached(addr, &mut b, cache)?;
        Ok(b[0])
    }
    pub fn read_u16_cached(&mut self, addr: u64, cache: &mut PageCache) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_bytes_typed_cached(addr, &mut b, cache)?;
        Ok(u16::from_le_bytes(b))
    }
    pub fn read_u32_cached(&mut self, addr: u64, cache: &mut PageCache) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_bytes_typed_cached(addr, &mut b, cache)?;
        Ok(u32::from_le_bytes(b))
    }
    pub fn read_u64_cached(&mut self, addr: u64, cache: &mut PageCache) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_bytes_typed_cached(addr, &mut b, cache)?;
        Ok(u64::from_le_bytes(b))
    }
    pub fn write_u8_cached(&mut self, addr: u64, v: u8, cache: &mut PageCache) -> Result<()> {
        self.write_bytes_typed_cached(addr, &[v], cache)
    }
    pub fn write_u16_cached(&mut self, addr: u64, v: u16, cache: &mut PageCache) -> Result<()> {
        self.write_bytes_typed_cached(addr, &v.to_le_bytes(), cache)
    }
    pub fn write_u32_cached(&mut self, addr: u64, v: u32, cache: &mut PageCache) -> Result<()> {
        self.write_bytes_typed_cached(addr, &v.to_le_bytes(), cache)
    }
    pub fn write_u64_cached(&mut self, addr: u64, v: u64, cache: &mut PageCache) -> Result<()> {
        self.write_bytes_typed_cached(addr, &v.to_le_bytes(), cache)
    }

    /// Read a register-width value for the active `Xlen`.
    pub fn read_reg(&mut self, addr: u64) -> Result<X::Reg> {
        match X::Reg::BYTES {
            4 => Ok(X::Reg::from_u64(self.read_u32(addr)? as u64)),
            8 => Ok(X::Reg::from_u64(self.read_u64(addr)?)),
            16 => {
                let lo = self.read_u64(addr)? as u128;
                let hi = self.read_u64(addr + 8)? as u128;
                Ok(X::Reg::from_u64((lo | (hi << 64)) as u64))
            }
            _ => unreachable!(),
        }
    }

    /// Write a register-width value for the active `Xlen`.
    pub fn write_reg(&mut self, addr: u64, v: X::Reg) -> Result<()> {
        match X::Reg::BYTES {
            4 => self.write_u32(addr, v.as_u64() as u32),
            8 => self.write_u64(addr, v.as_u64()),
            16 => {
                self.write_u64(addr, v.as_u64())?;
                self.write_u64(addr + 8, 0)
            }
            _ => unreachable!(),
        }
    }

    // ---- bulk helpers ------------------------------------------------

    pub fn memset(&mut self, dst: u64, value: u8, len: u64) -> Result<()> {
        let mut dst = dst;
        let mut remaining = len;
        while remaining > 0 {
            let offset = page_offset(dst);
            let size = ((PAGE_SIZE - offset) as u64).min(remaining);
            let pageno = page_number(dst);
            let page = self.create_page(pageno);
            if !page.attr.write {
                return Err(MachineException::new(Kind::ProtectionFault, dst));
            }
            page.data_mut()[offset..offset + size as usize].fill(value);
            dst += size;
            remaining -= size;
        }
        Ok(())
    }

    /// Host buffer -> guest memory.
    pub fn memcpy_in(&mut self, dst: u64, src: &[u8]) -> Result<()> {
        let mut dst = dst;
        let mut off = 0usize;
        while off < src.len() {
            let page_off = page_offset(dst);
            let size = (PAGE_SIZE - page_off).min(src.len() - off);
            self.write_bytes_typed(dst, &src[off..off + size])?;
            dst += size as u64;
            off += size;
        }
        Ok(())
    }

    /// Guest memory -> host buffer.
    pub fn memcpy_out(&mut self, dst: &mut [u8], src: u64) -> Result<()> {
        let mut src = src;
        let mut off = 0usize;
        while off < dst.len() {
            let page_off = page_offset(src);
            let size = (PAGE_SIZE - page_off).min(dst.len() - off);
            self.read_bytes_typed(src, &mut dst[off..off + size])?;
            src += size as u64;
            off += size;
        }
        Ok(())
    }

    /// Guest memory -> guest memory, word-batched when both ends share
    /// XLEN alignment.
    pub fn memcpy_guest(&mut self, dst: u64, src: u64, len: u64) -> Result<()> {
        let w = X::Reg::BYTES as u64;
        let mut dst = dst;
        let mut src = src;
        let mut remaining = len;
        if (dst & (w - 1)) == (src & (w - 1)) {
            while remaining >= w {
                let mut buf = [0u8; 16];
                self.memcpy_out(&mut buf[..w as usize], src)?;
                self.memcpy_in(dst, &buf[..w as usize])?;
                dst += w;
                src += w;
                remaining -= w;
            }
        }
        while remaining > 0 {
            let b = self.read_u8(src)?;
            self.write_u8(dst, b)?;
            dst += 1;
            src += 1;
            remaining -= 1;
        }
        Ok(())
    }

    pub fn memcmp(&mut self, p1: u64, p2: u64, len: u64) -> Result<i32> {
        let mut p1 = p1;
        let mut p2 = p2;
        let mut remaining = len;
        while remaining > 0 {
            let v1 = self.read_u8(p1)?;
            let v2 = self.read_u8(p2)?;
            if v1 != v2 {
                return Ok(v1 as i32 - v2 as i32);
            }
            p1 += 1;
            p2 += 1;
            remaining -= 1;
        }
        Ok(0)
    }

    pub fn strlen(&mut self, addr: u64, maxlen: u64) -> Result<u64> {
        let mut len = 0u64;
        loop {
            if len >= maxlen {
                return Ok(maxlen);
            }
            let cur = addr + len;
            let offset = page_offset(cur);
            let avail = (PAGE_SIZE - offset) as u64;
            let scan_len = avail.min(maxlen - len);
            let mut buf = vec![0u8; scan_len as usize];
            self.read_bytes_typed(cur, &mut buf)?;
            match buf.iter().position(|&b| b == 0) {
                Some(i) => return Ok(len + i as u64),
                None => len += scan_len,
            }
        }
    }

    /// Read a NUL-terminated string, walking page by page when it crosses
    /// a boundary.
    pub fn memstring(&mut self, addr: u64, max_len: u64) -> Result<String> {
        let len = self.strlen(addr, max_len)?;
        let mut buf = vec![0u8; len as usize];
        self.memcpy_out(&mut buf, addr)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read exactly `datalen` bytes (bounded by `maxlen`).
    pub fn rvbuffer(&mut self, addr: u64, datalen: u64, maxlen: u64) -> Result<Vec<u8>> {
        if datalen > maxlen {
            return Err(MachineException::new(Kind::ProtectionFault, addr));
        }
        let mut buf = vec![0u8; datalen as usize];
        self.memcpy_out(&mut buf, addr)?;
        Ok(buf)
    }

    pub fn rvstring(&mut self, addr: u64, datalen: u64, maxlen: u64) -> Result<String> {
        if datalen + 1 >= maxlen {
            return Err(MachineException::new(Kind::ProtectionFault, addr));
        }
        let buf = self.rvbuffer(addr, datalen, maxlen)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Gather `[addr, addr+len)` into at most `cnt` contiguous host-owned
    /// spans, coalescing adjacent page runs. Returns `OUT_OF_MEMORY` if the
    /// range needs more than `cnt` spans.
    pub fn gather_buffers_from_range(
        &mut self,
        cnt: usize,
        addr: u64,
        len: u64,
    ) -> Result<Vec<Vec<u8>>> {
        let mut spans: Vec<Vec<u8>> = Vec::new();
        let mut addr = addr;
        let mut remaining = len;
        while remaining != 0 {
            if spans.len() >= cnt && spans.last().map(|s| s.len()).unwrap_or(0) == PAGE_SIZE {
                return Err(MachineException::new(Kind::OutOfMemory, addr));
            }
            let offset = page_offset(addr);
            let size = ((PAGE_SIZE - offset) as u64).min(remaining);
            let mut buf = vec![0u8; size as usize];
            self.read_bytes_typed(addr, &mut buf)?;
            spans.push(buf);
            addr += size;
            remaining -= size;
        }
        Ok(spans)
    }

    /// Same as [`Self::gather_buffers_from_range`] but materializes writable
    /// pages along the way.
    pub fn gather_writable_buffers_from_range(
        &mut self,
        cnt: usize,
        addr: u64,
        len: u64,
    ) -> Result<Vec<u64>> {
        let mut spans = Vec::new();
        let mut addr = addr;
        let mut remaining = len;
        while remaining != 0 {
            if spans.len() >= cnt {
                return Err(MachineException::new(Kind::OutOfMemory, addr));
            }
            let offset = page_offset(addr);
            let size = ((PAGE_SIZE - offset) as u64).min(remaining);
            let pageno = page_number(addr);
            let page = self.create_page(pageno);
            if !page.attr.write {
                return Err(MachineException::new(Kind::ProtectionFault, addr));
            }
            spans.push(addr);
            addr += size;
            remaining -= size;
        }
        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xlen::Rv64;

    #[test]
    fn unmapped_read_is_zero_and_allocates_nothing() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        assert_eq!(mem.read_u32(0x8000).unwrap(), 0);
        assert_eq!(mem.nonshared_pages_active(), 0);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.write_u32(0x4000, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32(0x4000).unwrap(), 0xdead_beef);
    }

    #[test]
    fn write_to_read_only_page_faults() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.set_page_attr(0x1000, 0x1000, PageAttributes::new(true, false, false));
        let err = mem.write_u32(0x1000, 0xdead_beef).unwrap_err();
        assert_eq!(err.kind, Kind::ProtectionFault);
        assert_eq!(err.data, 0x1000);
    }

    #[test]
    fn cow_materializes_exactly_one_page_on_write() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        assert_eq!(mem.read_u8(0x8000).unwrap(), 0);
        assert_eq!(mem.nonshared_pages_active(), 0);
        mem.write_u8(0x8000, 1).unwrap();
        assert_eq!(mem.nonshared_pages_active(), 1);
        assert_eq!(mem.read_u8(0x8000).unwrap(), 1);
    }

    #[test]
    fn cross_page_string_reads_correctly() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.memcpy_in(0x1ffe, b"hello\0").unwrap();
        let s = mem.memstring(0x1ffe, 16).unwrap();
        assert_eq!(s, "hello");
    }

    #[test]
    fn memcpy_then_memcmp_matches() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.memcpy_in(0x2000, b"abcdef").unwrap();
        mem.memcpy_guest(0x3000, 0x2000, 6).unwrap();
        assert_eq!(mem.memcmp(0x2000, 0x3000, 6).unwrap(), 0);
    }

    #[test]
    fn repeat_access_hits_the_hot_slot() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        mem.write_u32(0x5000, 1).unwrap();
        // Same page as the write above: resolved via the cached slot
        // rather than a fresh BTreeMap lookup.
        assert_eq!(mem.read_u32(0x5004).unwrap(), 0);
        assert_eq!(mem.nonshared_pages_active(), 1);
    }

    #[test]
    fn external_cache_survives_interleaved_unrelated_access() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        let mut cache: PageCache = None;
        mem.write_u32_cached(0x6000, 11, &mut cache).unwrap();
        assert!(cache.is_some());
        // An unrelated access through the plain (non-cached) path must
        // not disturb the caller's own cached slot.
        mem.write_u32(0x9000, 22).unwrap();
        assert_eq!(mem.read_u32_cached(0x6000, &mut cache).unwrap(), 11);
    }

    #[test]
    fn freeing_a_page_invalidates_a_stale_cached_slot() {
        let mut mem: Memory<Rv64> = Memory::new(u64::MAX);
        let mut cache: PageCache = None;
        mem.write_u32_cached(0x7000, 1, &mut cache).unwrap();
        mem.free_pages(0x7000, PAGE_SIZE as u64);
        // The freed page reads back as zero, not whatever stale value
        // still sits in the now-unmapped slab slot the cache remembers.
        assert_eq!(mem.read_u32_cached(0x7000, &mut cache).unwrap(), 0);
    }
}
