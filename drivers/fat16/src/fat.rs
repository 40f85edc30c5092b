//! File Allocation Table: an array of 16-bit links indexed by cluster number.
//!
//! The first copy is read into memory at mount. Mutations mark the touched
//! FAT sector dirty; `flush` writes those sectors to every copy.

use alloc::vec;
use alloc::vec::Vec;

use crate::block_dev::{BlockDev, BlockStore};
use crate::bpb::Geometry;
use crate::error::{Fat16Error, Result};

pub const FREE:    u16 = 0x0000;
pub const BAD:     u16 = 0xFFF7;
pub const EOC_MIN: u16 = 0xFFF8;
/// End-of-chain value written by this driver.
pub const EOC:     u16 = 0xFFFF;

/// What a FAT entry says about the cluster after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    Next(u16),
    End,
    Invalid,
}

pub struct AllocationTable {
    entries:           Vec<u16>,
    dirty:             Vec<bool>,
    entries_per_sector: usize,
    max_cluster:       u16,
    first_fat_sector:  u64,
    sectors_per_fat:   u64,
    fat_count:         u64,
    /// No free cluster exists below this index.
    free_hint:         u16,
}

impl AllocationTable {
    pub fn load<D: BlockDev>(store: &mut BlockStore<D>, g: &Geometry) -> Result<Self> {
        let sector_size = store.sector_size();
        let entries_per_sector = sector_size / 2;
        let mut entries = Vec::with_capacity(g.sectors_per_fat as usize * entries_per_sector);
        let mut sec = vec![0u8; sector_size];
        for i in 0..g.sectors_per_fat as u64 {
            store.read_sector(g.first_fat_sector as u64 + i, &mut sec)?;
            entries.extend(sec.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])));
        }
        Ok(Self {
            entries,
            dirty: vec![false; g.sectors_per_fat as usize],
            entries_per_sector,
            max_cluster: g.max_cluster(),
            first_fat_sector: g.first_fat_sector as u64,
            sectors_per_fat: g.sectors_per_fat as u64,
            fat_count: g.fat_count as u64,
            free_hint: 2,
        })
    }

    /// Raw entry value. Panics if `cluster` is past the end of the table.
    pub fn entry(&self, cluster: u16) -> u16 {
        self.entries[cluster as usize]
    }

    pub fn max_cluster(&self) -> u16 {
        self.max_cluster
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.iter().any(|&d| d)
    }

    fn in_range(&self, cluster: u16) -> bool {
        (2..=self.max_cluster).contains(&cluster)
    }

    fn link(&self, cluster: u16) -> Link {
        match self.entries[cluster as usize] {
            v if v >= EOC_MIN => Link::End,
            v if self.in_range(v) => Link::Next(v),
            _ => Link::Invalid,
        }
    }

    fn set(&mut self, cluster: u16, value: u16) {
        self.entries[cluster as usize] = value;
        self.dirty[cluster as usize / self.entries_per_sector] = true;
    }

    /// The cluster following `cluster` in its chain, `None` at end-of-chain.
    pub fn next(&self, cluster: u16) -> Result<Option<u16>> {
        if !self.in_range(cluster) {
            return Err(corrupt(cluster));
        }
        match self.link(cluster) {
            Link::Next(n) => Ok(Some(n)),
            Link::End => Ok(None),
            Link::Invalid => Err(corrupt(cluster)),
        }
    }

    /// Lazily walk the chain starting at `start`.
    pub fn chain_of(&self, start: u16) -> Chain<'_> {
        Chain {
            fat: self,
            next: Some(start),
            visited: vec![0u64; (self.max_cluster as usize >> 6) + 1],
        }
    }

    /// Take the lowest free cluster and mark it end-of-chain.
    pub fn allocate(&mut self) -> Result<u16> {
        let found = (self.free_hint..=self.max_cluster)
            .find(|&c| self.entries[c as usize] == FREE);
        match found {
            Some(c) => {
                self.set(c, EOC);
                self.free_hint = c.saturating_add(1);
                log::trace!("fat16: allocated cluster {c}");
                Ok(c)
            }
            None => {
                self.free_hint = self.max_cluster.saturating_add(1);
                Err(Fat16Error::NoSpace)
            }
        }
    }

    /// Append a fresh cluster after `last`, which must currently end its chain.
    ///
    /// The new cluster is marked end-of-chain before `last` is pointed at it.
    pub fn extend(&mut self, last: u16) -> Result<u16> {
        if !self.in_range(last) || self.link(last) != Link::End {
            return Err(corrupt(last));
        }
        let new = self.allocate()?;
        self.set(last, new);
        Ok(new)
    }

    /// Free every cluster of the chain at `start`, head first. The chain is
    /// validated in full before the first entry changes.
    pub fn free(&mut self, start: u16) -> Result<()> {
        let chain = self.chain_of(start).collect::<Result<Vec<u16>>>()?;
        for &c in &chain {
            self.set(c, FREE);
            self.free_hint = self.free_hint.min(c);
        }
        log::trace!("fat16: freed {} clusters from {start}", chain.len());
        Ok(())
    }

    pub fn free_clusters(&self) -> u32 {
        (2..=self.max_cluster)
            .filter(|&c| self.entries[c as usize] == FREE)
            .count() as u32
    }

    /// Write dirty FAT sectors to every copy.
    pub fn flush<D: BlockDev>(&mut self, store: &mut BlockStore<D>) -> Result<()> {
        let mut sec = vec![0u8; store.sector_size()];
        for idx in 0..self.dirty.len() {
            if !self.dirty[idx] {
                continue;
            }
            let from = idx * self.entries_per_sector;
            let words = &self.entries[from..from + self.entries_per_sector];
            for (dst, w) in sec.chunks_exact_mut(2).zip(words) {
                dst.copy_from_slice(&w.to_le_bytes());
            }
            for copy in 0..self.fat_count {
                let lba = self.first_fat_sector + copy * self.sectors_per_fat + idx as u64;
                store.write_sector(lba, &sec)?;
            }
            self.dirty[idx] = false;
        }
        Ok(())
    }
}

fn corrupt(cluster: u16) -> Fat16Error {
    log::warn!("fat16: corrupt cluster chain at {cluster}");
    Fat16Error::CorruptChain
}

/// Iterator over one cluster chain. Yields `CorruptChain` once and stops if
/// the chain revisits a cluster, leaves the data area or hits a free, bad or
/// reserved entry.
pub struct Chain<'a> {
    fat:     &'a AllocationTable,
    next:    Option<u16>,
    visited: Vec<u64>,
}

impl Iterator for Chain<'_> {
    type Item = Result<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next.take()?;
        if !self.fat.in_range(cur) {
            return Some(Err(corrupt(cur)));
        }
        let (word, bit) = (cur as usize >> 6, 1u64 << (cur & 63));
        if self.visited[word] & bit != 0 {
            return Some(Err(corrupt(cur)));
        }
        self.visited[word] |= bit;
        match self.fat.link(cur) {
            Link::Next(n) => self.next = Some(n),
            Link::End => {}
            Link::Invalid => return Some(Err(corrupt(cur))),
        }
        Some(Ok(cur))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::MemDisk;

    /// One reserved sector, two 1-sector FATs, root dir of 1 sector, 40 data
    /// clusters of one sector each.
    fn setup() -> (BlockStore<MemDisk>, Geometry) {
        let g = Geometry {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            sectors_per_fat: 1,
            root_entry_count: 16,
            total_sectors: 44,
            first_fat_sector: 1,
            first_root_dir_sector: 3,
            root_dir_sectors: 1,
            first_data_sector: 4,
            total_clusters: 40,
            volume_id: None,
            volume_label: None,
        };
        let mut disk = vec![0u8; 44 * 512];
        for fat in [512usize, 1024] {
            disk[fat..fat + 4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
        }
        (BlockStore::new(MemDisk(disk), 512, 44), g)
    }

    fn with_links(links: &[(u16, u16)]) -> AllocationTable {
        let (mut store, g) = setup();
        let mut fat = AllocationTable::load(&mut store, &g).unwrap();
        for &(c, v) in links {
            fat.set(c, v);
        }
        fat
    }

    #[test]
    fn load_reads_reserved_entries() {
        let fat = with_links(&[]);
        assert_eq!(fat.entry(0), 0xFFF8);
        assert_eq!(fat.entry(1), 0xFFFF);
        assert_eq!(fat.max_cluster(), 41);
        assert_eq!(fat.free_clusters(), 40);
        assert!(!fat.is_dirty());
    }

    #[test]
    fn chain_follows_links() {
        let fat = with_links(&[(2, 5), (5, 3), (3, EOC)]);
        let chain: Vec<u16> = fat.chain_of(2).map(|c| c.unwrap()).collect();
        assert_eq!(chain, [2, 5, 3]);
    }

    #[test]
    fn chain_detects_cycle() {
        let fat = with_links(&[(2, 3), (3, 4), (4, 2)]);
        let res: Result<Vec<u16>> = fat.chain_of(2).collect();
        assert_eq!(res, Err(Fat16Error::CorruptChain));
    }

    #[test]
    fn chain_detects_out_of_range_and_markers() {
        for bad in [42u16, 0x0001, FREE, BAD, 0xFFF0] {
            let fat = with_links(&[(2, 3), (3, bad)]);
            let res: Result<Vec<u16>> = fat.chain_of(2).collect();
            assert_eq!(res, Err(Fat16Error::CorruptChain), "link {bad:#x}");
        }
        let fat = with_links(&[]);
        assert!(fat.chain_of(0).next().unwrap().is_err());
    }

    #[test]
    fn chain_stops_after_error() {
        let fat = with_links(&[(2, 2)]);
        let mut it = fat.chain_of(2);
        assert_eq!(it.next(), Some(Ok(2)));
        assert_eq!(it.next(), Some(Err(Fat16Error::CorruptChain)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn allocate_takes_lowest_free() {
        let mut fat = with_links(&[(2, EOC), (4, EOC)]);
        assert_eq!(fat.allocate(), Ok(3));
        assert_eq!(fat.entry(3), EOC);
        assert_eq!(fat.allocate(), Ok(5));
        fat.free(2).unwrap();
        assert_eq!(fat.allocate(), Ok(2));
    }

    #[test]
    fn allocate_exhausts() {
        let mut fat = with_links(&[]);
        for _ in 0..40 {
            fat.allocate().unwrap();
        }
        assert_eq!(fat.allocate(), Err(Fat16Error::NoSpace));
        assert_eq!(fat.free_clusters(), 0);
    }

    #[test]
    fn extend_links_new_tail() {
        let mut fat = with_links(&[]);
        let a = fat.allocate().unwrap();
        let b = fat.extend(a).unwrap();
        let c = fat.extend(b).unwrap();
        let chain: Vec<u16> = fat.chain_of(a).map(|c| c.unwrap()).collect();
        assert_eq!(chain, [a, b, c]);
        assert_eq!(fat.entry(c), EOC);
    }

    #[test]
    fn extend_requires_chain_tail() {
        let mut fat = with_links(&[(2, 3), (3, EOC)]);
        assert_eq!(fat.extend(2), Err(Fat16Error::CorruptChain));
        assert_eq!(fat.entry(2), 3);
    }

    #[test]
    fn extend_without_space_keeps_chain() {
        let mut fat = with_links(&[]);
        let first = fat.allocate().unwrap();
        let mut last = first;
        while let Ok(n) = fat.extend(last) {
            last = n;
        }
        assert_eq!(fat.entry(last), EOC);
        assert_eq!(fat.chain_of(first).count(), 40);
    }

    #[test]
    fn free_leaves_corrupt_chain_untouched() {
        let mut fat = with_links(&[(2, 3), (3, 2)]);
        assert_eq!(fat.free(2), Err(Fat16Error::CorruptChain));
        assert_eq!(fat.entry(2), 3);
        assert_eq!(fat.entry(3), 2);
    }

    #[test]
    fn flush_mirrors_every_copy() {
        let (mut store, g) = setup();
        let mut fat = AllocationTable::load(&mut store, &g).unwrap();
        let a = fat.allocate().unwrap();
        fat.extend(a).unwrap();
        fat.flush(&mut store).unwrap();
        assert!(!fat.is_dirty());

        let img = &store.disk().0;
        assert_eq!(&img[512..1024], &img[1024..1536]);
        assert_eq!(&img[512 + 4..512 + 8], &[0x03, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn clean_flush_writes_nothing() {
        let (mut store, g) = setup();
        let before = store.disk().0.clone();
        let mut fat = AllocationTable::load(&mut store, &g).unwrap();
        fat.flush(&mut store).unwrap();
        assert_eq!(store.disk().0, before);
    }
}
