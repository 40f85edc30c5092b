//! Open file descriptors and the byte-level transfer through cluster chains.

use alloc::vec;
use alloc::vec::Vec;

use fat16_api_types::OpenMode;

use crate::block_dev::{BlockDev, BlockStore};
use crate::bpb::Geometry;
use crate::dir::DirEntry;
use crate::error::{Fat16Error, Result};
use crate::fat::AllocationTable;

/// Index into the descriptor table of a mounted volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub u8);

impl Handle {
    /// Accepts any value in `0..=255`; whether it names an open file is up to
    /// the table.
    pub fn from_raw(fd: i32) -> Result<Self> {
        u8::try_from(fd).map(Handle).map_err(|_| Fat16Error::BadDescriptor)
    }

    pub fn raw(self) -> i32 {
        self.0 as i32
    }
}

pub(crate) struct OpenFile {
    /// Directory entry as of open; `size` and `start_cluster` track the
    /// in-memory state of a write handle.
    pub entry:   DirEntry,
    pub mode:    OpenMode,
    /// Current cluster, 0 until a write binds the first one.
    cluster:     u16,
    /// Byte offset inside `cluster`.
    offset:      u32,
    /// Bytes transferred so far.
    position:    u32,
    dirty:       bool,
}

impl OpenFile {
    pub fn new(entry: DirEntry, mode: OpenMode) -> Self {
        Self {
            entry,
            mode,
            cluster: entry.start_cluster,
            offset: 0,
            position: 0,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn read<D: BlockDev>(
        &mut self,
        store: &mut BlockStore<D>,
        g: &Geometry,
        fat: &AllocationTable,
        buf: &mut [u8],
    ) -> Result<usize> {
        if self.mode != OpenMode::Read {
            return Err(Fat16Error::BadDescriptor);
        }
        if self.entry.size == 0 {
            return Err(Fat16Error::EmptyFile);
        }
        let remaining = (self.entry.size - self.position) as usize;
        let want = buf.len().min(remaining);
        let bps = g.bytes_per_sector;
        let cluster_size = g.cluster_size();
        let mut sec = vec![0u8; bps as usize];
        let mut done = 0;

        while done < want {
            if self.offset == cluster_size {
                self.cluster = fat.next(self.cluster)?.ok_or(Fat16Error::CorruptChain)?;
                self.offset = 0;
            }
            let lba = g.cluster_to_lba(self.cluster) + (self.offset / bps) as u64;
            let at = (self.offset % bps) as usize;
            let n = (want - done).min(bps as usize - at);
            store.read_sector(lba, &mut sec)?;
            buf[done..done + n].copy_from_slice(&sec[at..at + n]);
            done += n;
            self.offset += n as u32;
            self.position += n as u32;
        }
        Ok(done)
    }

    /// Append `data`, growing the chain one cluster at a time. Running out of
    /// clusters after some bytes were stored yields a short count.
    pub fn write<D: BlockDev>(
        &mut self,
        store: &mut BlockStore<D>,
        g: &Geometry,
        fat: &mut AllocationTable,
        data: &[u8],
    ) -> Result<usize> {
        if self.mode != OpenMode::Write {
            return Err(Fat16Error::BadDescriptor);
        }
        let room = (u32::MAX - self.entry.size) as usize;
        let data = &data[..data.len().min(room)];
        let bps = g.bytes_per_sector;
        let cluster_size = g.cluster_size();
        let mut done = 0;

        while done < data.len() {
            if self.cluster == 0 || self.offset == cluster_size {
                let grown = if self.cluster == 0 { fat.allocate() } else { fat.extend(self.cluster) };
                let next = match grown {
                    Ok(c) => c,
                    Err(Fat16Error::NoSpace) if done > 0 => {
                        log::debug!("fat16: volume full, short write of {done} bytes");
                        break;
                    }
                    Err(e) => return Err(e),
                };
                if self.cluster == 0 {
                    self.entry.start_cluster = next;
                }
                self.cluster = next;
                self.offset = 0;
                self.dirty = true;
            }
            let lba = g.cluster_to_lba(self.cluster) + (self.offset / bps) as u64;
            let at = (self.offset % bps) as usize;
            let n = (data.len() - done).min(bps as usize - at);
            let chunk = &data[done..done + n];
            store.modify_sector(lba, |sec| sec[at..at + n].copy_from_slice(chunk))?;
            done += n;
            self.offset += n as u32;
            self.position += n as u32;
            self.entry.size += n as u32;
            self.dirty = true;
        }
        Ok(done)
    }
}

// ─── Descriptor table ──────────────────────────────────────────────────────────

pub(crate) struct HandleTable {
    slots: Vec<Option<OpenFile>>,
}

impl HandleTable {
    pub fn new(count: usize) -> Self {
        Self { slots: (0..count).map(|_| None).collect() }
    }

    /// Lowest closed handle.
    pub fn vacant(&self) -> Result<Handle> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|i| Handle(i as u8))
            .ok_or(Fat16Error::TooManyOpenFiles)
    }

    pub fn insert(&mut self, h: Handle, file: OpenFile) {
        self.slots[h.0 as usize] = Some(file);
    }

    pub fn get_mut(&mut self, h: Handle) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(h.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Fat16Error::BadDescriptor)
    }

    pub fn take(&mut self, h: Handle) -> Result<OpenFile> {
        self.slots
            .get_mut(h.0 as usize)
            .and_then(Option::take)
            .ok_or(Fat16Error::BadDescriptor)
    }

    /// Strongest mode the directory slot is currently open in.
    pub fn mode_of(&self, slot: u16) -> Option<OpenMode> {
        let mut found = None;
        for f in self.slots.iter().flatten().filter(|f| f.entry.slot == slot) {
            if f.mode == OpenMode::Write {
                return Some(OpenMode::Write);
            }
            found = Some(f.mode);
        }
        found
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut OpenFile> {
        self.slots.iter_mut().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::{FileAttributes, ShortName};

    fn entry(slot: u16) -> DirEntry {
        DirEntry {
            slot,
            name: ShortName::parse("A.TXT").unwrap(),
            attributes: FileAttributes::ARCHIVE,
            start_cluster: 0,
            size: 0,
        }
    }

    #[test]
    fn handle_from_raw_bounds() {
        assert_eq!(Handle::from_raw(0), Ok(Handle(0)));
        assert_eq!(Handle::from_raw(255), Ok(Handle(255)));
        assert_eq!(Handle::from_raw(-1), Err(Fat16Error::BadDescriptor));
        assert_eq!(Handle::from_raw(256), Err(Fat16Error::BadDescriptor));
    }

    #[test]
    fn table_hands_out_lowest_free_slot() {
        let mut t = HandleTable::new(2);
        let a = t.vacant().unwrap();
        t.insert(a, OpenFile::new(entry(0), OpenMode::Read));
        let b = t.vacant().unwrap();
        assert_eq!((a, b), (Handle(0), Handle(1)));
        t.insert(b, OpenFile::new(entry(1), OpenMode::Read));
        assert_eq!(t.vacant(), Err(Fat16Error::TooManyOpenFiles));

        t.take(a).unwrap();
        assert_eq!(t.vacant(), Ok(Handle(0)));
        assert_eq!(t.open_count(), 1);
    }

    #[test]
    fn closed_or_unknown_handles_are_bad() {
        let mut t = HandleTable::new(4);
        assert!(matches!(t.get_mut(Handle(0)), Err(Fat16Error::BadDescriptor)));
        assert!(matches!(t.take(Handle(200)), Err(Fat16Error::BadDescriptor)));
    }

    #[test]
    fn write_mode_dominates() {
        let mut t = HandleTable::new(4);
        t.insert(Handle(0), OpenFile::new(entry(3), OpenMode::Read));
        assert_eq!(t.mode_of(3), Some(OpenMode::Read));
        t.insert(Handle(1), OpenFile::new(entry(3), OpenMode::Write));
        assert_eq!(t.mode_of(3), Some(OpenMode::Write));
        assert_eq!(t.mode_of(4), None);
    }
}
