use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fat16::BlockDev;

/// Raw image file on the host, opened read/write.
pub struct FileDisk {
    file: File,
    len:  u64,
}

impl FileDisk {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    /// Second handle on the same image. Every transfer seeks first, so the
    /// shared file offset does not matter.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self { file: self.file.try_clone()?, len: self.len })
    }

    fn seek_to(&mut self, lba: u64, len: usize) -> io::Result<()> {
        let off = lba
            .checked_mul(len as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "sector offset overflow"))?;
        self.file.seek(SeekFrom::Start(off)).map(drop)
    }
}

impl BlockDev for FileDisk {
    fn read(&mut self, lba: u64, buf: &mut [u8]) -> bool {
        let res = self.seek_to(lba, buf.len()).and_then(|_| self.file.read_exact(buf));
        if let Err(e) = &res {
            log::warn!("fat16: image read at sector {lba} failed: {e}");
        }
        res.is_ok()
    }

    fn write(&mut self, lba: u64, buf: &[u8]) -> bool {
        let res = self.seek_to(lba, buf.len()).and_then(|_| self.file.write_all(buf));
        if let Err(e) = &res {
            log::warn!("fat16: image write at sector {lba} failed: {e}");
        }
        res.is_ok()
    }

    fn capacity_bytes(&self) -> u64 {
        self.len
    }
}
