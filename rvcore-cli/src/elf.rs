//! A minimal ELF32/64 reader covering exactly what `rvcore::elf::ElfView`
//! needs: the entry point, `PT_LOAD` segments, and `.symtab` entries. Not a
//! general object-file parser — ELF parsing is explicitly out of the
//! core's scope, and a smoke-test CLI has no need for one either.

use std::fs;
use std::io;

use rvcore::elf::{ElfView, Segment, SegmentFlags, Symbol};

const PT_LOAD: u32 = 1;
const SHT_SYMTAB: u32 = 2;

pub struct ParsedElf {
    entry: u64,
    segments: Vec<Segment>,
    symbols: Vec<Symbol>,
    xlen_bytes: usize,
}

impl ElfView for ParsedElf {
    fn entry_point(&self) -> u64 {
        self.entry
    }
    fn segments(&self) -> &[Segment] {
        &self.segments
    }
    fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }
    fn xlen_bytes(&self) -> usize {
        self.xlen_bytes
    }
}

fn u16_at(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}
fn u32_at(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}
fn u64_at(b: &[u8], off: usize) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(a)
}

pub fn load(path: &str) -> io::Result<ParsedElf> {
    let data = fs::read(path)?;
    if data.len() < 20 || &data[0..4] != b"\x7fELF" {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not an ELF file"));
    }
    let is64 = data[4] == 2;
    let xlen_bytes = if is64 { 8 } else { 4 };

    let (entry, phoff, phentsize, phnum, shoff, shentsize, shnum, shstrndx);
    if is64 {
        entry = u64_at(&data, 24);
        phoff = u64_at(&data, 32);
        shoff = u64_at(&data, 40);
        phentsize = u16_at(&data, 54) as u64;
        phnum = u16_at(&data, 56) as u64;
        shentsize = u16_at(&data, 58) as u64;
        shnum = u16_at(&data, 60) as u64;
        shstrndx = u16_at(&data, 62) as u64;
    } else {
        entry = u32_at(&data, 24) as u64;
        phoff = u32_at(&data, 28) as u64;
        shoff = u32_at(&data, 32) as u64;
        phentsize = u16_at(&data, 42) as u64;
        phnum = u16_at(&data, 44) as u64;
        shentsize = u16_at(&data, 46) as u64;
        shnum = u16_at(&data, 48) as u64;
        shstrndx = u16_at(&data, 50) as u64;
    }

    let mut segments = Vec::new();
    for i in 0..phnum {
        let off = (phoff + i * phentsize) as usize;
        let (p_type, p_flags, p_offset, p_vaddr, p_filesz);
        if is64 {
            p_type = u32_at(&data, off);
            p_flags = u32_at(&data, off + 4);
            p_offset = u64_at(&data, off + 8);
            p_vaddr = u64_at(&data, off + 16);
            p_filesz = u64_at(&data, off + 32);
        } else {
            p_type = u32_at(&data, off);
            p_offset = u32_at(&data, off + 4) as u64;
            p_vaddr = u32_at(&data, off + 8) as u64;
            p_filesz = u32_at(&data, off + 16) as u64;
            p_flags = u32_at(&data, off + 24);
        }
        if p_type != PT_LOAD {
            continue;
        }
        let start = p_offset as usize;
        let end = start + p_filesz as usize;
        segments.push(Segment {
            vaddr: p_vaddr,
            data: data[start..end].to_vec(),
            flags: SegmentFlags {
                read: p_flags & 0x4 != 0,
                write: p_flags & 0x2 != 0,
                exec: p_flags & 0x1 != 0,
            },
        });
    }

    let mut symbols = Vec::new();
    if shnum > 0 {
        let section_header = |idx: u64| -> (u32, u64, u64, u64, u32) {
            let off = (shoff + idx * shentsize) as usize;
            if is64 {
                (
                    u32_at(&data, off),
                    u64_at(&data, off + 24),
                    u64_at(&data, off + 32),
                    u64_at(&data, off + 40),
                    u32_at(&data, off + 44),
                )
            } else {
                (
                    u32_at(&data, off + 4),
                    u32_at(&data, off + 16) as u64,
                    u32_at(&data, off + 20) as u64,
                    u32_at(&data, off + 36) as u64,
                    u32_at(&data, off + 40),
                )
            }
        };
        let (_, _, shstr_offset, _, _) = section_header(shstrndx);
        for i in 0..shnum {
            let (sh_type, sh_offset, sh_size, sh_entsize, sh_link) = section_header(i);
            if sh_type != SHT_SYMTAB || sh_entsize == 0 {
                continue;
            }
            let (_, str_offset, _, _, _) = section_header(sh_link as u64);
            let count = sh_size / sh_entsize;
            for s in 0..count {
                let sym_off = (sh_offset + s * sh_entsize) as usize;
                let (name_idx, value) = if is64 {
                    (u32_at(&data, sym_off), u64_at(&data, sym_off + 8))
                } else {
                    (u32_at(&data, sym_off), u32_at(&data, sym_off + 4) as u64)
                };
                if name_idx == 0 {
                    continue;
                }
                let name = read_cstr(&data, str_offset as usize + name_idx as usize);
                if !name.is_empty() {
                    symbols.push(Symbol { name, addr: value });
                }
            }
        }
        let _ = shstr_offset;
    }

    Ok(ParsedElf {
        entry,
        segments,
        symbols,
        xlen_bytes,
    })
}

fn read_cstr(data: &[u8], start: usize) -> String {
    let end = data[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .unwrap_or(data.len());
    String::from_utf8_lossy(&data[start..end]).into_owned()
}
