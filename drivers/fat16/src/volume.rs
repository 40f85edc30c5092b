//! A mounted FAT16 volume: geometry, in-memory FAT, root directory access and
//! the descriptor table, all over one `BlockStore`.

use alloc::vec::Vec;

use fat16_api_types::OpenMode;

use crate::block_dev::{BlockDev, BlockStore};
use crate::bpb::{BOOT_SECTOR_SIZE, Geometry};
use crate::dir::{DirEntry, RootDir, ShortName};
use crate::error::{Fat16Error, Result};
use crate::fat::AllocationTable;
use crate::file::{Handle, HandleTable, OpenFile};
use crate::options::MountOptions;

pub struct Volume<D: BlockDev> {
    store:    BlockStore<D>,
    geometry: Geometry,
    fat:      AllocationTable,
    files:    HandleTable,
}

impl<D: BlockDev> Volume<D> {
    /// Validate sector 0 and load the FAT. Nothing is written.
    pub fn mount(mut disk: D, options: MountOptions) -> Result<Self> {
        let mut sec = [0u8; BOOT_SECTOR_SIZE];
        if !disk.read(0, &mut sec) {
            log::warn!("fat16: cannot read boot sector");
            return Err(Fat16Error::ImageIo);
        }
        let geometry = Geometry::parse(&sec, options.require_fat16)?;
        if disk.capacity_bytes() < geometry.volume_bytes() {
            log::warn!(
                "fat16: image holds {} bytes, volume needs {}",
                disk.capacity_bytes(),
                geometry.volume_bytes()
            );
            return Err(Fat16Error::NotAFatVolume);
        }

        let mut store = BlockStore::new(
            disk,
            geometry.bytes_per_sector as usize,
            geometry.total_sectors as u64,
        );
        let fat = AllocationTable::load(&mut store, &geometry)?;
        log::info!(
            "fat16: mounted {} clusters of {} bytes, {} free",
            geometry.total_clusters,
            geometry.cluster_size(),
            fat.free_clusters()
        );
        Ok(Self {
            store,
            geometry,
            fat,
            files: HandleTable::new(options.handle_count()),
        })
    }

    /// Persist every open write handle and pending metadata, then hand the
    /// device back. On failure the volume comes back intact with the error so
    /// nothing dirty is dropped.
    pub fn unmount(mut self) -> core::result::Result<D, (Self, Fat16Error)> {
        match self.sync() {
            Ok(()) => {
                log::info!("fat16: unmounted");
                Ok(self.store.into_disk())
            }
            Err(e) => {
                log::error!("fat16: unmount failed, volume kept: {e}");
                Err((self, e))
            }
        }
    }

    /// Write every dirty handle, the FAT and the block store to the device.
    pub fn sync(&mut self) -> Result<()> {
        for file in self.files.iter_mut() {
            if file.mode == OpenMode::Write && file.is_dirty() {
                persist(&mut self.store, &self.geometry, &mut self.fat, file)?;
            }
        }
        self.fat.flush(&mut self.store)?;
        self.store.flush()
    }

    /// The device underneath. Sectors still in the store's buffer are not
    /// visible here until the next write, flush or close.
    pub fn disk(&self) -> &D {
        self.store.disk()
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut BlockStore<D> {
        &mut self.store
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn fat(&self) -> &AllocationTable {
        &self.fat
    }

    pub fn free_clusters(&self) -> u32 {
        self.fat.free_clusters()
    }

    pub fn open_files(&self) -> usize {
        self.files.open_count()
    }

    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<Handle> {
        let name = ShortName::parse(name)?;
        let handle = self.files.vacant()?;
        let file = match mode {
            OpenMode::Read => self.open_read(&name)?,
            OpenMode::Write => self.open_write(&name)?,
        };
        log::debug!("fat16: open {name} ({mode:?}) -> {}", handle.0);
        self.files.insert(handle, file);
        Ok(handle)
    }

    fn open_read(&mut self, name: &ShortName) -> Result<OpenFile> {
        let entry = RootDir::new(&mut self.store, &self.geometry).find(name)?;
        if entry.is_dir() {
            return Err(Fat16Error::IsDirectory);
        }
        if self.files.mode_of(entry.slot) == Some(OpenMode::Write) {
            return Err(Fat16Error::FileBusy);
        }
        if entry.size > 0 {
            let mut clusters = 0u64;
            if entry.start_cluster != 0 {
                for c in self.fat.chain_of(entry.start_cluster) {
                    c?;
                    clusters += 1;
                }
            }
            if clusters * (self.geometry.cluster_size() as u64) < entry.size as u64 {
                log::warn!("fat16: {name}: chain of {clusters} clusters too short for {} bytes", entry.size);
                return Err(Fat16Error::CorruptChain);
            }
        }
        Ok(OpenFile::new(entry, OpenMode::Read))
    }

    fn open_write(&mut self, name: &ShortName) -> Result<OpenFile> {
        let mut dir = RootDir::new(&mut self.store, &self.geometry);
        let entry = match dir.find(name) {
            Ok(mut entry) => {
                if entry.is_dir() {
                    return Err(Fat16Error::IsDirectory);
                }
                if self.files.mode_of(entry.slot).is_some() {
                    return Err(Fat16Error::FileBusy);
                }
                if entry.is_read_only() {
                    return Err(Fat16Error::ReadOnly);
                }
                dir.truncate(&mut entry, &mut self.fat)?;
                entry
            }
            Err(Fat16Error::FileNotFound) => dir.create(name)?,
            Err(e) => return Err(e),
        };
        Ok(OpenFile::new(entry, OpenMode::Write))
    }

    pub fn read(&mut self, h: Handle, buf: &mut [u8]) -> Result<usize> {
        let file = self.files.get_mut(h)?;
        file.read(&mut self.store, &self.geometry, &self.fat, buf)
    }

    /// Write at the handle's position. Whatever was written, including a
    /// short write, reaches the device before this returns.
    pub fn write(&mut self, h: Handle, data: &[u8]) -> Result<usize> {
        let file = self.files.get_mut(h)?;
        let n = file.write(&mut self.store, &self.geometry, &mut self.fat, data)?;
        if file.is_dirty() {
            persist(&mut self.store, &self.geometry, &mut self.fat, file)?;
        }
        Ok(n)
    }

    /// Persist a write handle's size and chain without closing it.
    pub fn flush(&mut self, h: Handle) -> Result<()> {
        let file = self.files.get_mut(h)?;
        if file.mode == OpenMode::Write {
            persist(&mut self.store, &self.geometry, &mut self.fat, file)?;
        }
        Ok(())
    }

    pub fn close(&mut self, h: Handle) -> Result<()> {
        let mut file = self.files.take(h)?;
        if file.mode == OpenMode::Write {
            persist(&mut self.store, &self.geometry, &mut self.fat, &mut file)?;
        }
        log::debug!("fat16: close {} ({} bytes)", h.0, file.entry.size);
        Ok(())
    }

    /// Remove a closed file and release its clusters.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let name = ShortName::parse(name)?;
        let mut dir = RootDir::new(&mut self.store, &self.geometry);
        let entry = dir.find(&name)?;
        if self.files.mode_of(entry.slot).is_some() {
            return Err(Fat16Error::FileBusy);
        }
        if entry.is_read_only() {
            return Err(Fat16Error::ReadOnly);
        }
        dir.delete(&name, &mut self.fat)
    }

    pub fn stat(&mut self, name: &str) -> Result<DirEntry> {
        let name = ShortName::parse(name)?;
        RootDir::new(&mut self.store, &self.geometry).find(&name)
    }

    /// Visible root directory entries in slot order.
    pub fn list(&mut self) -> Result<Vec<DirEntry>> {
        RootDir::new(&mut self.store, &self.geometry).list()
    }

    /// First visible entry in slot `from` or later.
    pub fn next_entry(&mut self, from: u16) -> Result<Option<DirEntry>> {
        RootDir::new(&mut self.store, &self.geometry).next_visible(from)
    }

    /// Cluster chain of a file, in order.
    pub fn file_clusters(&mut self, name: &str) -> Result<Vec<u16>> {
        let entry = self.stat(name)?;
        if entry.start_cluster == 0 {
            return Ok(Vec::new());
        }
        self.fat.chain_of(entry.start_cluster).collect()
    }
}

/// Data is already in the store; write the FAT, then the entry that points
/// into it, then push everything to the device.
fn persist<D: BlockDev>(
    store: &mut BlockStore<D>,
    g: &Geometry,
    fat: &mut AllocationTable,
    file: &mut OpenFile,
) -> Result<()> {
    fat.flush(store)?;
    let (size, start) = (file.entry.size, file.entry.start_cluster);
    RootDir::new(store, g).update(&mut file.entry, size, start)?;
    store.flush()?;
    file.mark_clean();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::MemDisk;
    use alloc::vec;

    /// Hand-built 44-sector volume: 40 one-sector clusters, 16 root entries.
    fn tiny_image() -> MemDisk {
        let mut img = vec![0u8; 44 * 512];
        let b = &mut img[..512];
        b[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        b[11..13].copy_from_slice(&512u16.to_le_bytes());
        b[13] = 1;
        b[14..16].copy_from_slice(&1u16.to_le_bytes());
        b[16] = 2;
        b[17..19].copy_from_slice(&16u16.to_le_bytes());
        b[19..21].copy_from_slice(&44u16.to_le_bytes());
        b[21] = 0xF8;
        b[22..24].copy_from_slice(&1u16.to_le_bytes());
        b[510] = 0x55;
        b[511] = 0xAA;
        for fat in [512, 1024] {
            img[fat..fat + 4].copy_from_slice(&[0xF8, 0xFF, 0xFF, 0xFF]);
        }
        MemDisk(img)
    }

    fn mount() -> Volume<MemDisk> {
        Volume::mount(tiny_image(), MountOptions::DEFAULT.with_require_fat16(false)).unwrap()
    }

    #[test]
    fn fat16_range_is_enforced_by_default() {
        assert!(matches!(
            Volume::mount(tiny_image(), MountOptions::DEFAULT),
            Err(Fat16Error::NotAFatVolume)
        ));
    }

    #[test]
    fn truncated_image_is_rejected() {
        let mut img = tiny_image();
        img.0.truncate(40 * 512);
        let opts = MountOptions::DEFAULT.with_require_fat16(false);
        assert!(matches!(Volume::mount(img, opts), Err(Fat16Error::NotAFatVolume)));
    }

    #[test]
    fn write_then_read_back() {
        let mut v = mount();
        let h = v.open("a.txt", OpenMode::Write).unwrap();
        assert_eq!(v.write(h, b"Hello World").unwrap(), 11);
        v.close(h).unwrap();

        let h = v.open("A.TXT", OpenMode::Read).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(v.read(h, &mut buf).unwrap(), 11);
        assert_eq!(&buf[..11], b"Hello World");
        assert_eq!(v.read(h, &mut buf).unwrap(), 0);
        v.close(h).unwrap();
    }

    #[test]
    fn writes_cross_cluster_boundaries() {
        let mut v = mount();
        let data: Vec<u8> = (0..1300u32).map(|i| i as u8).collect();
        let h = v.open("X.BIN", OpenMode::Write).unwrap();
        assert_eq!(v.write(h, &data[..700]).unwrap(), 700);
        assert_eq!(v.write(h, &data[700..]).unwrap(), 600);
        v.close(h).unwrap();
        assert_eq!(v.file_clusters("X.BIN").unwrap().len(), 3);

        let h = v.open("X.BIN", OpenMode::Read).unwrap();
        let mut out = vec![0u8; 2000];
        let mut got = 0;
        loop {
            let n = v.read(h, &mut out[got..got + 333]).unwrap();
            if n == 0 {
                break;
            }
            got += n;
        }
        assert_eq!(&out[..got], &data[..]);
    }

    #[test]
    fn empty_file_read() {
        let mut v = mount();
        let h = v.open("E.TXT", OpenMode::Write).unwrap();
        v.close(h).unwrap();
        let h = v.open("E.TXT", OpenMode::Read).unwrap();
        assert_eq!(v.read(h, &mut [0u8; 4]), Err(Fat16Error::EmptyFile));
    }

    #[test]
    fn mode_mismatch_and_closed_handles() {
        let mut v = mount();
        let w = v.open("M.TXT", OpenMode::Write).unwrap();
        assert_eq!(v.read(w, &mut [0u8; 4]), Err(Fat16Error::BadDescriptor));
        v.write(w, b"x").unwrap();
        v.close(w).unwrap();
        assert_eq!(v.close(w), Err(Fat16Error::BadDescriptor));

        let r = v.open("M.TXT", OpenMode::Read).unwrap();
        assert_eq!(v.write(r, b"y"), Err(Fat16Error::BadDescriptor));
        assert_eq!(v.read(Handle(9), &mut [0u8; 1]), Err(Fat16Error::BadDescriptor));
    }

    #[test]
    fn conflicting_opens_are_busy() {
        let mut v = mount();
        let w = v.open("B.TXT", OpenMode::Write).unwrap();
        assert_eq!(v.open("B.TXT", OpenMode::Read), Err(Fat16Error::FileBusy));
        assert_eq!(v.open("B.TXT", OpenMode::Write), Err(Fat16Error::FileBusy));
        v.write(w, b"data").unwrap();
        v.close(w).unwrap();

        let r1 = v.open("B.TXT", OpenMode::Read).unwrap();
        let r2 = v.open("B.TXT", OpenMode::Read).unwrap();
        assert_ne!(r1, r2);
        assert_eq!(v.open("B.TXT", OpenMode::Write), Err(Fat16Error::FileBusy));
        assert_eq!(v.delete("B.TXT"), Err(Fat16Error::FileBusy));
    }

    #[test]
    fn descriptor_table_limit() {
        let opts = MountOptions::DEFAULT.with_require_fat16(false).with_max_open_files(2);
        let mut v = Volume::mount(tiny_image(), opts).unwrap();
        v.open("A.TXT", OpenMode::Write).unwrap();
        v.open("B.TXT", OpenMode::Write).unwrap();
        assert_eq!(v.open("C.TXT", OpenMode::Write), Err(Fat16Error::TooManyOpenFiles));
        // nothing was created for the refused open
        assert_eq!(v.stat("C.TXT"), Err(Fat16Error::FileNotFound));
    }

    #[test]
    fn rewrite_truncates_and_frees() {
        let mut v = mount();
        let h = v.open("T.TXT", OpenMode::Write).unwrap();
        v.write(h, &[7u8; 1500]).unwrap();
        v.close(h).unwrap();
        assert_eq!(v.free_clusters(), 37);

        let h = v.open("T.TXT", OpenMode::Write).unwrap();
        assert_eq!(v.free_clusters(), 40);
        v.close(h).unwrap();
        let e = v.stat("T.TXT").unwrap();
        assert_eq!((e.size, e.start_cluster), (0, 0));
    }

    #[test]
    fn full_volume_gives_short_write() {
        let mut v = mount();
        let h = v.open("FILL.BIN", OpenMode::Write).unwrap();
        let data = vec![0x5Au8; 41 * 512];
        assert_eq!(v.write(h, &data).unwrap(), 40 * 512);
        assert_eq!(v.write(h, b"more"), Err(Fat16Error::NoSpace));
        v.close(h).unwrap();
        assert_eq!(v.free_clusters(), 0);
        assert_eq!(v.file_clusters("FILL.BIN").unwrap().len(), 40);

        let h = v.open("OTHER.BIN", OpenMode::Write).unwrap();
        assert_eq!(v.write(h, b"x"), Err(Fat16Error::NoSpace));
    }

    #[test]
    fn short_chain_is_corrupt_on_open() {
        let mut v = mount();
        let h = v.open("S.TXT", OpenMode::Write).unwrap();
        v.write(h, &[1u8; 100]).unwrap();
        v.close(h).unwrap();
        let mut e = v.stat("S.TXT").unwrap();
        let start = e.start_cluster;
        RootDir::new(&mut v.store, &v.geometry).update(&mut e, 5000, start).unwrap();
        assert_eq!(v.open("S.TXT", OpenMode::Read), Err(Fat16Error::CorruptChain));
    }

    #[test]
    fn delete_and_list() {
        let mut v = mount();
        for n in ["ONE.TXT", "TWO.TXT"] {
            let h = v.open(n, OpenMode::Write).unwrap();
            v.write(h, n.as_bytes()).unwrap();
            v.close(h).unwrap();
        }
        let names: Vec<_> = v.list().unwrap().iter().map(|e| e.name).collect();
        assert_eq!(names, [ShortName::parse("ONE.TXT").unwrap(), ShortName::parse("TWO.TXT").unwrap()]);

        v.delete("one.txt").unwrap();
        assert_eq!(v.open("ONE.TXT", OpenMode::Read), Err(Fat16Error::FileNotFound));
        assert_eq!(v.free_clusters(), 39);
        assert_eq!(v.next_entry(0).unwrap().unwrap().name, ShortName::parse("TWO.TXT").unwrap());
    }

    #[test]
    fn writes_reach_the_directory_before_close() {
        let mut v = mount();
        let h = v.open("LOG.TXT", OpenMode::Write).unwrap();
        v.write(h, b"abc").unwrap();
        let e = v.stat("LOG.TXT").unwrap();
        assert_eq!(e.size, 3);
        assert_ne!(e.start_cluster, 0);
        v.write(h, &[b'd'; 600]).unwrap();
        assert_eq!(v.stat("LOG.TXT").unwrap().size, 603);
        assert_eq!(v.file_clusters("LOG.TXT").unwrap().len(), 2);
        v.flush(h).unwrap();
        v.close(h).unwrap();
        assert_eq!(v.stat("LOG.TXT").unwrap().size, 603);
    }

    #[test]
    fn written_data_is_on_the_device_before_close() {
        let mut v = mount();
        let h = v.open("NOW.TXT", OpenMode::Write).unwrap();
        v.write(h, b"This is a test").unwrap();
        let start = v.stat("NOW.TXT").unwrap().start_cluster;
        let g = *v.geometry();
        let lba = g.cluster_to_lba(start) as usize;

        // Bypass the store: the raw device already holds entry, FAT and data.
        let img = &v.store.disk().0;
        assert_eq!(&img[lba * 512..lba * 512 + 14], b"This is a test");
        let root = g.first_root_dir_sector as usize * 512;
        assert_eq!(&img[root..root + 8], b"NOW     ");
        assert_eq!(u32::from_le_bytes(img[root + 28..root + 32].try_into().unwrap()), 14);
        let fat = g.first_fat_sector as usize * 512 + start as usize * 2;
        assert_eq!(u16::from_le_bytes([img[fat], img[fat + 1]]), 0xFFFF);
    }

    /// `MemDisk` whose writes can be switched off.
    struct FlakyDisk {
        inner:  MemDisk,
        broken: bool,
    }

    impl BlockDev for FlakyDisk {
        fn read(&mut self, lba: u64, buf: &mut [u8]) -> bool {
            self.inner.read(lba, buf)
        }

        fn write(&mut self, lba: u64, buf: &[u8]) -> bool {
            !self.broken && self.inner.write(lba, buf)
        }

        fn capacity_bytes(&self) -> u64 {
            self.inner.capacity_bytes()
        }
    }

    #[test]
    fn failed_unmount_returns_the_volume() {
        let disk = FlakyDisk { inner: tiny_image(), broken: false };
        let opts = MountOptions::DEFAULT.with_require_fat16(false);
        let mut v = Volume::mount(disk, opts).unwrap();
        let h = v.open("KEEP.TXT", OpenMode::Write).unwrap();
        v.write(h, b"abc").unwrap();

        v.store.disk_mut().broken = true;
        assert_eq!(v.write(h, b"d"), Err(Fat16Error::ImageIo));
        let (mut v, e) = match v.unmount() {
            Err(kept) => kept,
            Ok(_) => panic!("unmount on a broken disk succeeded"),
        };
        assert_eq!(e, Fat16Error::ImageIo);
        assert_eq!(v.open_files(), 1);

        v.store.disk_mut().broken = false;
        let disk = v.unmount().map_err(|(_, e)| e).unwrap();
        let mut v = Volume::mount(disk, opts).unwrap();
        let h = v.open("KEEP.TXT", OpenMode::Read).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(v.read(h, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn unmount_persists_open_writer() {
        let mut v = mount();
        let h = v.open("U.TXT", OpenMode::Write).unwrap();
        v.write(h, b"pending").unwrap();
        let disk = v.unmount().map_err(|(_, e)| e).unwrap();
        let mut v = Volume::mount(disk, MountOptions::DEFAULT.with_require_fat16(false)).unwrap();
        assert_eq!(v.stat("U.TXT").unwrap().size, 7);
    }

    #[test]
    fn invalid_names() {
        let mut v = mount();
        assert_eq!(v.open("DIR/X.TXT", OpenMode::Write), Err(Fat16Error::InvalidName));
        assert_eq!(v.delete("WAYTOOLONG.TXT"), Err(Fat16Error::InvalidName));
    }
}
