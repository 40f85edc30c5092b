use alloc::vec::Vec;

use fat16_api_types::OpenMode;

use crate::block_dev::BlockDev;
use crate::dir::DirEntry;
use crate::error::{Fat16Error, Result};
use crate::file::Handle;
use crate::options::MountOptions;
use crate::volume::Volume;

/// Mount lifecycle around at most one `Volume`. File operations fail with
/// `NotMounted` while nothing is mounted.
pub struct Driver<D: BlockDev> {
    volume:  Option<Volume<D>>,
    options: MountOptions,
}

impl<D: BlockDev> Driver<D> {
    pub const fn new(options: MountOptions) -> Self {
        Self { volume: None, options }
    }

    pub fn options(&self) -> MountOptions {
        self.options
    }

    /// Takes effect at the next mount.
    pub fn set_options(&mut self, options: MountOptions) {
        self.options = options;
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_some()
    }

    /// Mount `disk`, unmounting (and flushing) any current volume first. If
    /// that unmount fails the current volume stays mounted.
    pub fn mount(&mut self, disk: D) -> Result<()> {
        if self.volume.is_some() {
            log::debug!("fat16: replacing mounted volume");
            self.unmount()?;
        }
        self.volume = Some(Volume::mount(disk, self.options)?);
        Ok(())
    }

    /// Flush and detach the volume. A failed flush leaves it mounted so the
    /// caller can retry or `discard` it.
    pub fn unmount(&mut self) -> Result<D> {
        let volume = self.volume.take().ok_or(Fat16Error::NotMounted)?;
        volume.unmount().map_err(|(volume, e)| {
            self.volume = Some(volume);
            e
        })
    }

    /// Drop the volume without writing anything.
    pub fn discard(&mut self) {
        if self.volume.take().is_some() {
            log::warn!("fat16: discarded mounted volume");
        }
    }

    pub fn volume(&mut self) -> Result<&mut Volume<D>> {
        self.volume.as_mut().ok_or(Fat16Error::NotMounted)
    }

    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<Handle> {
        self.volume()?.open(name, mode)
    }

    pub fn read(&mut self, h: Handle, buf: &mut [u8]) -> Result<usize> {
        self.volume()?.read(h, buf)
    }

    pub fn write(&mut self, h: Handle, data: &[u8]) -> Result<usize> {
        self.volume()?.write(h, data)
    }

    pub fn flush(&mut self, h: Handle) -> Result<()> {
        self.volume()?.flush(h)
    }

    pub fn close(&mut self, h: Handle) -> Result<()> {
        self.volume()?.close(h)
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.volume()?.delete(name)
    }

    pub fn list(&mut self) -> Result<Vec<DirEntry>> {
        self.volume()?.list()
    }

    pub fn next_entry(&mut self, from: u16) -> Result<Option<DirEntry>> {
        self.volume()?.next_entry(from)
    }
}

impl<D: BlockDev> Default for Driver<D> {
    fn default() -> Self {
        Self::new(MountOptions::DEFAULT)
    }
}
