//! Boot sector parsing and the layout constants derived from it.
//!
//! Volume layout, in sectors:
//!
//! ```text
//! [reserved (boot sector first)][FAT #1]..[FAT #n][root directory][data: cluster 2, 3, ...]
//! ```

use crate::error::{Fat16Error, Result};

pub const BOOT_SECTOR_SIZE: usize = 512;
pub const DIR_ENTRY_SIZE:   u32   = 32;

const MAX_CLUSTER_BYTES:  u32 = 32 * 1024;
const FAT16_MIN_CLUSTERS: u32 = 4085;
const FAT16_MAX_CLUSTERS: u32 = 65525;
const EXT_BOOT_SIGNATURE: u8  = 0x29;
const MAX_LINK:           u16 = 0xFFEF;

// ─── BPB (BIOS Parameter Block) ───────────────────────────────────────────────

#[allow(dead_code)]
#[repr(C, packed)]
struct RawBpb {
    jump:              [u8; 3],
    oem:               [u8; 8],
    bytes_per_sector:  u16,
    sectors_per_clus:  u8,
    reserved_sectors:  u16,
    num_fats:          u8,
    root_entry_count:  u16,
    total_sectors_16:  u16,
    media:             u8,
    fat_size_16:       u16,
    sectors_per_track: u16,
    num_heads:         u16,
    hidden_sectors:    u32,
    total_sectors_32:  u32,
    // FAT12/16 extended boot record
    drive_number:      u8,
    _reserved:         u8,
    boot_signature:    u8,
    volume_id:         u32,
    volume_label:      [u8; 11],
    fs_type:           [u8; 8],
}

/// Layout of a mounted volume. All sector numbers are absolute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub bytes_per_sector:      u32,
    pub sectors_per_cluster:   u32,
    pub reserved_sectors:      u32,
    pub fat_count:             u32,
    pub sectors_per_fat:       u32,
    pub root_entry_count:      u32,
    pub total_sectors:         u32,
    pub first_fat_sector:      u32,
    pub first_root_dir_sector: u32,
    pub root_dir_sectors:      u32,
    pub first_data_sector:     u32,
    pub total_clusters:        u32,
    pub volume_id:             Option<u32>,
    pub volume_label:          Option<[u8; 11]>,
}

fn reject(why: &str) -> Fat16Error {
    log::warn!("fat16: rejecting volume: {why}");
    Fat16Error::NotAFatVolume
}

impl Geometry {
    /// Parse and validate sector 0.
    pub fn parse(sec: &[u8], require_fat16: bool) -> Result<Self> {
        if sec.len() < BOOT_SECTOR_SIZE {
            return Err(reject("short boot sector"));
        }
        if sec[510] != 0x55 || sec[511] != 0xAA {
            return Err(reject("missing 0x55AA signature"));
        }

        // SAFETY: `sec` holds at least 512 bytes and `RawBpb` is a packed
        // plain-data struct of 62 bytes; the read is unaligned-safe.
        let bpb = unsafe { core::ptr::read_unaligned(sec.as_ptr() as *const RawBpb) };

        match bpb.jump {
            [0xEB, _, 0x90] | [0xE9, _, _] => {}
            _ => return Err(reject("bad jump instruction")),
        }

        let bytes_per_sector = u16::from_le(bpb.bytes_per_sector) as u32;
        let sectors_per_cluster = bpb.sectors_per_clus as u32;
        let reserved_sectors = u16::from_le(bpb.reserved_sectors) as u32;
        let fat_count = bpb.num_fats as u32;
        let root_entry_count = u16::from_le(bpb.root_entry_count) as u32;
        let sectors_per_fat = u16::from_le(bpb.fat_size_16) as u32;
        let total_16 = u16::from_le(bpb.total_sectors_16) as u32;
        let total_32 = u32::from_le(bpb.total_sectors_32);

        log::debug!("fat16: bytes per sector: {bytes_per_sector}");
        log::debug!("fat16: sectors per cluster: {sectors_per_cluster}");
        log::debug!("fat16: reserved sectors: {reserved_sectors}");
        log::debug!("fat16: fats: {fat_count} x {sectors_per_fat} sectors");
        log::debug!("fat16: root entries: {root_entry_count}");

        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(reject("unsupported bytes per sector"));
        }
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(reject("sectors per cluster not a power of two"));
        }
        if bytes_per_sector * sectors_per_cluster > MAX_CLUSTER_BYTES {
            return Err(reject("cluster larger than 32 KiB"));
        }
        if reserved_sectors == 0 || fat_count == 0 {
            return Err(reject("no reserved sectors or no FAT"));
        }
        if sectors_per_fat == 0 {
            return Err(reject("zero FAT size (FAT32 volume?)"));
        }
        if root_entry_count == 0 {
            return Err(reject("no fixed root directory"));
        }
        let total_sectors = match (total_16, total_32) {
            (n, 0) if n != 0 => n,
            (0, n) if n != 0 => n,
            _ => return Err(reject("ambiguous total sector count")),
        };

        let first_fat_sector = reserved_sectors;
        let first_root_dir_sector = first_fat_sector + fat_count * sectors_per_fat;
        let root_dir_sectors = (root_entry_count * DIR_ENTRY_SIZE).div_ceil(bytes_per_sector);
        let first_data_sector = first_root_dir_sector + root_dir_sectors;
        if first_data_sector >= total_sectors {
            return Err(reject("data region starts past the end of the volume"));
        }
        let total_clusters = (total_sectors - first_data_sector) / sectors_per_cluster;
        log::debug!("fat16: data clusters: {total_clusters}, first data sector: {first_data_sector}");

        if total_clusters == 0 {
            return Err(reject("no data clusters"));
        }
        if require_fat16 && !(FAT16_MIN_CLUSTERS..FAT16_MAX_CLUSTERS).contains(&total_clusters) {
            return Err(reject("cluster count outside the FAT16 range"));
        }
        // Cluster numbers must stay below the reserved/bad/end markers.
        if total_clusters + 1 > MAX_LINK as u32 {
            return Err(reject("too many clusters for 16-bit links"));
        }
        if sectors_per_fat * bytes_per_sector / 2 < total_clusters + 2 {
            return Err(reject("FAT too small for the cluster count"));
        }

        let (volume_id, volume_label) = if bpb.boot_signature == EXT_BOOT_SIGNATURE {
            let id = u32::from_le(bpb.volume_id);
            log::debug!("fat16: volume id {id:08X}");
            (Some(id), Some(bpb.volume_label))
        } else {
            (None, None)
        };

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            sectors_per_fat,
            root_entry_count,
            total_sectors,
            first_fat_sector,
            first_root_dir_sector,
            root_dir_sectors,
            first_data_sector,
            total_clusters,
            volume_id,
            volume_label,
        })
    }

    pub fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// Highest valid data cluster number.
    pub fn max_cluster(&self) -> u16 {
        (self.total_clusters + 1) as u16
    }

    pub fn cluster_to_lba(&self, cluster: u16) -> u64 {
        self.first_data_sector as u64 + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }

    pub fn entries_per_sector(&self) -> u32 {
        self.bytes_per_sector / DIR_ENTRY_SIZE
    }

    /// Bytes the backing image must hold.
    pub fn volume_bytes(&self) -> u64 {
        self.total_sectors as u64 * self.bytes_per_sector as u64
    }
}
