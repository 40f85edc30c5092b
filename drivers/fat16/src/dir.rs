//! Root directory: a fixed array of 32-byte entries between the last FAT copy
//! and the data region. Short (8.3) names only; LFN and volume-label slots
//! are skipped.

use alloc::vec::Vec;
use core::fmt;
use core::ops::ControlFlow;

use bitflags::bitflags;

use crate::block_dev::{BlockDev, BlockStore};
use crate::bpb::{DIR_ENTRY_SIZE, Geometry};
use crate::error::{Fat16Error, Result};
use crate::fat::AllocationTable;

// ─── Constants ─────────────────────────────────────────────────────────────────

const SLOT_END:     u8 = 0x00;
const SLOT_DELETED: u8 = 0xE5;
/// A first name byte of 0x05 stands for a literal 0xE5.
const KANJI_E5:     u8 = 0x05;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        /// All four low bits set: the slot is part of a long file name.
        const LONG_NAME = 0x0F;

        // Images may carry bits we do not interpret
        const _ = !0;
    }
}

// ─── Short name ────────────────────────────────────────────────────────────────

/// On-disk 8.3 name: 8 name bytes and 3 extension bytes, space padded,
/// upper case.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortName([u8; 11]);

fn legal_char(b: u8) -> bool {
    b.is_ascii_uppercase()
        || b.is_ascii_digit()
        || b"!#$%&'()-@^_`{}~".contains(&b)
}

impl ShortName {
    /// Parse `NAME.EXT` (case-insensitive). A single leading `/` is accepted
    /// for root-relative paths; any other separator is rejected.
    pub fn parse(filename: &str) -> Result<Self> {
        let filename = filename.strip_prefix('/').unwrap_or(filename);
        if filename.contains(['/', '\\']) {
            return Err(Fat16Error::InvalidName);
        }
        let (base, ext) = filename.split_once('.').unwrap_or((filename, ""));
        if base.is_empty() || base.len() > 8 || ext.len() > 3 {
            return Err(Fat16Error::InvalidName);
        }

        let mut raw = [b' '; 11];
        for (dst, b) in raw[..8].iter_mut().zip(base.bytes()) {
            *dst = b.to_ascii_uppercase();
        }
        for (dst, b) in raw[8..].iter_mut().zip(ext.bytes()) {
            *dst = b.to_ascii_uppercase();
        }
        let used = raw[..base.len()].iter().chain(&raw[8..8 + ext.len()]);
        if !used.copied().all(legal_char) {
            return Err(Fat16Error::InvalidName);
        }
        Ok(Self(raw))
    }

    pub fn from_raw(raw: [u8; 11]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    fn matches(&self, raw: &[u8; 11]) -> bool {
        let mut on_disk = *raw;
        if on_disk[0] == KANJI_E5 {
            on_disk[0] = SLOT_DELETED;
        }
        on_disk.eq_ignore_ascii_case(&self.0)
    }
}

impl fmt::Display for ShortName {
    /// `"HELLO   TXT"` → `HELLO.TXT`, `"MAKEFILE   "` → `MAKEFILE`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_end = self.0[..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        let ext_end = self.0[8..].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        for &b in &self.0[..name_end] {
            write!(f, "{}", b as char)?;
        }
        if ext_end > 0 {
            f.write_str(".")?;
            for &b in &self.0[8..8 + ext_end] {
                write!(f, "{}", b as char)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({self})")
    }
}

// ─── Directory entry (32 bytes) ────────────────────────────────────────────────

#[allow(dead_code)]
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawDirEntry {
    name:        [u8; 11],
    attr:        u8,
    _nt:         u8,
    _crt_tenths: u8,
    _crt_time:   u16,
    _crt_date:   u16,
    _acc_date:   u16,
    _ea_index:   u16,
    _mod_time:   u16,
    _mod_date:   u16,
    cluster:     u16,
    size:        u32,
}

impl RawDirEntry {
    fn new_file(name: &ShortName) -> Self {
        Self {
            name: *name.as_bytes(),
            attr: FileAttributes::ARCHIVE.bits(),
            _nt: 0, _crt_tenths: 0, _crt_time: 0, _crt_date: 0, _acc_date: 0,
            _ea_index: 0, _mod_time: 0, _mod_date: 0,
            cluster: 0,
            size: 0,
        }
    }

    fn read_from(b: &[u8]) -> Self {
        assert!(b.len() >= DIR_ENTRY_SIZE as usize);
        // SAFETY: bounds checked above; packed plain-data struct.
        unsafe { core::ptr::read_unaligned(b.as_ptr() as *const RawDirEntry) }
    }

    fn write_to(&self, b: &mut [u8]) {
        assert!(b.len() >= DIR_ENTRY_SIZE as usize);
        // SAFETY: as in `read_from`.
        unsafe { core::ptr::write_unaligned(b.as_mut_ptr() as *mut RawDirEntry, *self) }
    }

    fn is_end(&self) -> bool     { self.name[0] == SLOT_END }
    fn is_free(&self) -> bool    { self.name[0] == SLOT_END || self.name[0] == SLOT_DELETED }
    fn attributes(&self) -> FileAttributes { FileAttributes::from_bits_retain(self.attr) }

    fn is_hidden_slot(&self) -> bool {
        let a = self.attributes();
        a.contains(FileAttributes::LONG_NAME) || a.contains(FileAttributes::VOLUME_ID)
    }
}

/// A visible root directory entry and the slot it lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub slot:          u16,
    pub name:          ShortName,
    pub attributes:    FileAttributes,
    pub start_cluster: u16,
    pub size:          u32,
}

impl DirEntry {
    fn from_raw(slot: u16, raw: &RawDirEntry) -> Self {
        let mut name = raw.name;
        if name[0] == KANJI_E5 {
            name[0] = SLOT_DELETED;
        }
        Self {
            slot,
            name: ShortName::from_raw(name),
            attributes: raw.attributes(),
            start_cluster: u16::from_le(raw.cluster),
            size: u32::from_le(raw.size),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(FileAttributes::READ_ONLY)
    }
}

// ─── Root directory access ─────────────────────────────────────────────────────

pub struct RootDir<'a, D: BlockDev> {
    store:    &'a mut BlockStore<D>,
    geometry: &'a Geometry,
}

impl<'a, D: BlockDev> RootDir<'a, D> {
    pub fn new(store: &'a mut BlockStore<D>, geometry: &'a Geometry) -> Self {
        Self { store, geometry }
    }

    fn slot_location(&self, slot: u16) -> (u64, usize) {
        let epe = self.geometry.entries_per_sector();
        let lba = self.geometry.first_root_dir_sector as u64 + (slot as u32 / epe) as u64;
        (lba, (slot as u32 % epe * DIR_ENTRY_SIZE) as usize)
    }

    /// Visit slots in order starting at `from` until `f` breaks or the table ends.
    fn scan<T, F>(&mut self, from: u16, mut f: F) -> Result<Option<T>>
    where
        F: FnMut(u16, &RawDirEntry) -> ControlFlow<T>,
    {
        let epe = self.geometry.entries_per_sector();
        let count = self.geometry.root_entry_count;
        let mut sec = alloc::vec![0u8; self.store.sector_size()];
        let mut slot = from as u32;
        while slot < count {
            let (lba, _) = self.slot_location(slot as u16);
            self.store.read_sector(lba, &mut sec)?;
            let first = slot % epe;
            for i in first..epe {
                if slot >= count {
                    break;
                }
                let off = (i * DIR_ENTRY_SIZE) as usize;
                let raw = RawDirEntry::read_from(&sec[off..]);
                if let ControlFlow::Break(v) = f(slot as u16, &raw) {
                    return Ok(Some(v));
                }
                slot += 1;
            }
        }
        Ok(None)
    }

    fn write_raw(&mut self, slot: u16, raw: &RawDirEntry) -> Result<()> {
        let (lba, off) = self.slot_location(slot);
        self.store.modify_sector(lba, |sec| raw.write_to(&mut sec[off..]))
    }

    /// First visible entry at or after `from`.
    pub fn next_visible(&mut self, from: u16) -> Result<Option<DirEntry>> {
        self.scan(from, |slot, raw| {
            if raw.is_end() {
                ControlFlow::Break(None)
            } else if raw.is_free() || raw.is_hidden_slot() {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(Some(DirEntry::from_raw(slot, raw)))
            }
        })
        .map(Option::flatten)
    }

    pub fn find(&mut self, name: &ShortName) -> Result<DirEntry> {
        let found = self.scan(0, |slot, raw| {
            if raw.is_end() {
                ControlFlow::Break(None)
            } else if raw.is_free() || raw.is_hidden_slot() || !name.matches(&raw.name) {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(Some(DirEntry::from_raw(slot, raw)))
            }
        })?;
        found.flatten().ok_or(Fat16Error::FileNotFound)
    }

    pub fn list(&mut self) -> Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        self.scan(0, |slot, raw| {
            if raw.is_end() {
                return ControlFlow::Break(());
            }
            if !raw.is_free() && !raw.is_hidden_slot() {
                out.push(DirEntry::from_raw(slot, raw));
            }
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    /// Claim the first deleted or never-used slot for an empty file.
    pub fn create(&mut self, name: &ShortName) -> Result<DirEntry> {
        let slot = self
            .scan(0, |slot, raw| {
                if raw.is_free() { ControlFlow::Break(slot) } else { ControlFlow::Continue(()) }
            })?
            .ok_or(Fat16Error::DirectoryFull)?;
        let raw = RawDirEntry::new_file(name);
        self.write_raw(slot, &raw)?;
        log::debug!("fat16: created {name} in slot {slot}");
        Ok(DirEntry::from_raw(slot, &raw))
    }

    /// Persist size and start cluster of `entry`.
    pub fn update(&mut self, entry: &mut DirEntry, size: u32, start_cluster: u16) -> Result<()> {
        let (lba, off) = self.slot_location(entry.slot);
        self.store.modify_sector(lba, |sec| {
            sec[off + 26..off + 28].copy_from_slice(&start_cluster.to_le_bytes());
            sec[off + 28..off + 32].copy_from_slice(&size.to_le_bytes());
        })?;
        entry.size = size;
        entry.start_cluster = start_cluster;
        Ok(())
    }

    /// Empty the file: the entry is cleared and written out first, then the
    /// old chain is freed, so an interruption can only leak clusters.
    pub fn truncate(&mut self, entry: &mut DirEntry, fat: &mut AllocationTable) -> Result<()> {
        let old = entry.start_cluster;
        if old == 0 && entry.size == 0 {
            return Ok(());
        }
        if old != 0 {
            fat.chain_of(old).try_for_each(|c| c.map(drop))?;
        }
        self.update(entry, 0, 0)?;
        self.store.flush()?;
        if old != 0 {
            fat.free(old)?;
            fat.flush(self.store)?;
        }
        Ok(())
    }

    /// Remove a file's entry and free its chain.
    pub fn delete(&mut self, name: &ShortName, fat: &mut AllocationTable) -> Result<()> {
        let entry = self.find(name)?;
        if entry.is_dir() {
            return Err(Fat16Error::IsDirectory);
        }
        if entry.start_cluster != 0 {
            fat.chain_of(entry.start_cluster).try_for_each(|c| c.map(drop))?;
        }

        // A slot followed by the end marker (or the last slot) becomes the new end.
        let next = entry.slot as u32 + 1;
        let last = next >= self.geometry.root_entry_count
            || self.scan(next as u16, |_, raw| ControlFlow::Break(raw.is_end()))? == Some(true);
        let marker = if last { SLOT_END } else { SLOT_DELETED };
        let (lba, off) = self.slot_location(entry.slot);
        self.store.modify_sector(lba, |sec| sec[off] = marker)?;
        self.store.flush()?;

        if entry.start_cluster != 0 {
            fat.free(entry.start_cluster)?;
            fat.flush(self.store)?;
        }
        log::debug!("fat16: deleted {name}");
        Ok(())
    }
}
