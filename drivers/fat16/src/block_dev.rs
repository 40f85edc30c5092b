//! Sector-level storage for the driver.
//!
//! `BlockDev` is the seam to the medium (an in-memory image in tests, a file
//! in the ABI shim). `BlockStore` sits on top of it once the geometry is known:
//! it bounds every access to the volume and keeps one sector of write-back
//! buffer so byte-sized writes do not turn into a device round trip each.
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Fat16Error, Result};

// ─── Block device abstraction ──────────────────────────────────────────────────

/// `buf.len()` is the sector size and `lba` counts in units of it.
/// Both transfers return `false` when the device cannot complete them.
pub trait BlockDev {
    fn read(&mut self, lba: u64, buf: &mut [u8]) -> bool;
    fn write(&mut self, lba: u64, buf: &[u8]) -> bool;
    /// Size of the medium in bytes.
    fn capacity_bytes(&self) -> u64;
}

/// Block device backed by a `Vec<u8>` holding a raw image.
pub struct MemDisk(pub Vec<u8>);

impl MemDisk {
    fn span(&self, lba: u64, len: usize) -> Option<core::ops::Range<usize>> {
        let off = usize::try_from(lba).ok()?.checked_mul(len)?;
        let end = off.checked_add(len)?;
        (end <= self.0.len()).then_some(off..end)
    }
}

impl BlockDev for MemDisk {
    fn read(&mut self, lba: u64, buf: &mut [u8]) -> bool {
        match self.span(lba, buf.len()) {
            Some(r) => { buf.copy_from_slice(&self.0[r]); true }
            None => false,
        }
    }

    fn write(&mut self, lba: u64, buf: &[u8]) -> bool {
        match self.span(lba, buf.len()) {
            Some(r) => { self.0[r].copy_from_slice(buf); true }
            None => false,
        }
    }

    fn capacity_bytes(&self) -> u64 {
        self.0.len() as u64
    }
}

// ─── Block store ───────────────────────────────────────────────────────────────

pub struct BlockStore<D> {
    disk:         D,
    sector_size:  usize,
    sector_count: u64,
    cache:        Vec<u8>,
    cached_lba:   Option<u64>,
    dirty:        bool,
}

impl<D: BlockDev> BlockStore<D> {
    pub fn new(disk: D, sector_size: usize, sector_count: u64) -> Self {
        Self {
            disk,
            sector_size,
            sector_count,
            cache: vec![0u8; sector_size],
            cached_lba: None,
            dirty: false,
        }
    }

    pub fn sector_size(&self) -> usize { self.sector_size }
    pub fn sector_count(&self) -> u64  { self.sector_count }
    pub fn disk(&self) -> &D           { &self.disk }
    pub fn disk_mut(&mut self) -> &mut D { &mut self.disk }

    fn check(&self, lba: u64, len: usize) -> Result<()> {
        if len != self.sector_size {
            return Err(Fat16Error::InvalidArgument);
        }
        if lba >= self.sector_count {
            log::warn!("fat16: sector {lba} outside volume ({} sectors)", self.sector_count);
            return Err(Fat16Error::ImageIo);
        }
        Ok(())
    }

    pub fn read_sector(&mut self, lba: u64, buf: &mut [u8]) -> Result<()> {
        self.check(lba, buf.len())?;
        if self.cached_lba == Some(lba) {
            buf.copy_from_slice(&self.cache);
            return Ok(());
        }
        if !self.disk.read(lba, buf) {
            return Err(Fat16Error::ImageIo);
        }
        Ok(())
    }

    /// Whole-sector write. Goes straight to the device unless the sector is
    /// the one currently buffered.
    pub fn write_sector(&mut self, lba: u64, buf: &[u8]) -> Result<()> {
        self.check(lba, buf.len())?;
        if self.cached_lba == Some(lba) {
            self.cache.copy_from_slice(buf);
            self.dirty = true;
            return Ok(());
        }
        if !self.disk.write(lba, buf) {
            return Err(Fat16Error::ImageIo);
        }
        Ok(())
    }

    /// Read-modify-write of part of a sector through the buffer.
    pub fn modify_sector<F: FnOnce(&mut [u8])>(&mut self, lba: u64, f: F) -> Result<()> {
        self.check(lba, self.sector_size)?;
        self.load(lba)?;
        f(&mut self.cache);
        self.dirty = true;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let (Some(lba), true) = (self.cached_lba, self.dirty) {
            if !self.disk.write(lba, &self.cache) {
                return Err(Fat16Error::ImageIo);
            }
            self.dirty = false;
        }
        Ok(())
    }

    /// Release the device. Pending writes are dropped; call `flush` first.
    pub fn into_disk(self) -> D {
        self.disk
    }

    fn load(&mut self, lba: u64) -> Result<()> {
        if self.cached_lba == Some(lba) {
            return Ok(());
        }
        self.flush()?;
        self.cached_lba = None;
        if !self.disk.read(lba, &mut self.cache) {
            return Err(Fat16Error::ImageIo);
        }
        self.cached_lba = Some(lba);
        Ok(())
    }
}
