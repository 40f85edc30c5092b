//! C entry points for the FAT16 driver.
//!
//! One image and one mounted volume per process, guarded by a single lock.
//! Every function returns a `Fat16Status` code (negative) on failure; open,
//! read and write return a non-negative handle or byte count on success.

pub mod config;
pub mod file_disk;
pub mod logger;

use core::ffi::{CStr, c_char};

use fat16::{Driver, Fat16Error, Handle, MountOptions, OpenMode};
use fat16_api_types::{Fat16Status, LS_END_OF_DIRECTORY, LS_NAME_BUF_LEN};

use crate::config::AbiConfig;
use crate::file_disk::FileDisk;

struct AbiState {
    /// Image opened by `linux_load_image`; each mount works on a clone of it.
    image:  Option<FileDisk>,
    driver: Driver<FileDisk>,
}

static STATE: spin::Mutex<AbiState> = spin::Mutex::new(AbiState {
    image: None,
    driver: Driver::new(MountOptions::DEFAULT),
});

static CONFIG: spin::Once<AbiConfig> = spin::Once::new();

fn config() -> &'static AbiConfig {
    CONFIG.call_once(|| {
        let cfg = AbiConfig::from_env();
        // A host that installed its own logger keeps it.
        let _ = logger::init(cfg.log_level);
        cfg
    })
}

fn status(res: fat16::Result<()>) -> i32 {
    match res {
        Ok(()) => Fat16Status::Ok.code(),
        Err(e) => Fat16Status::from(e).code(),
    }
}

fn byte_count(res: fat16::Result<usize>) -> i32 {
    match res {
        Ok(n) => i32::try_from(n).unwrap_or(i32::MAX),
        Err(e) => Fat16Status::from(e).code(),
    }
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn c_str<'a>(ptr: *const c_char) -> fat16::Result<&'a str> {
    if ptr.is_null() {
        return Err(Fat16Error::InvalidArgument);
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str().map_err(|_| Fat16Error::InvalidName)
}

fn mount_image(state: &mut AbiState) -> fat16::Result<()> {
    let Some(image) = state.image.as_ref() else {
        return Err(Fat16Error::NotMounted);
    };
    let disk = image.try_clone().map_err(|e| {
        log::warn!("fat16: cannot reopen image: {e}");
        Fat16Error::ImageIo
    })?;
    state.driver.set_options(config().mount);
    state.driver.mount(disk)
}

fn release(state: &mut AbiState) {
    if state.driver.is_mounted() {
        if let Err(e) = state.driver.unmount() {
            // The image goes away with the volume; nothing left to retry on.
            log::error!("fat16: unmount on release failed: {e}");
            state.driver.discard();
        }
    }
    state.image = None;
}

// ─── Image lifecycle ───────────────────────────────────────────────────────────

/// Open the image at `path` and mount it. A previously loaded image is
/// unmounted and released first. A mount failure keeps the image loaded so
/// `fat16_init` can report it again.
///
/// # Safety
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn linux_load_image(path: *const c_char) -> i32 {
    config();
    // SAFETY: forwarded caller contract.
    let path = match unsafe { c_str(path) } {
        Ok(p) => p,
        Err(_) => return Fat16Status::InvalidArgument.code(),
    };
    let mut state = STATE.lock();
    release(&mut state);
    match FileDisk::open(path) {
        Ok(disk) => {
            log::info!("fat16: loaded image {path}");
            state.image = Some(disk);
        }
        Err(e) => {
            log::error!("fat16: cannot open image {path}: {e}");
            return Fat16Status::ImageIoError.code();
        }
    }
    status(mount_image(&mut state))
}

/// Unmount (flushing everything) and close the image.
#[unsafe(no_mangle)]
pub extern "C" fn linux_release_image() {
    release(&mut STATE.lock());
}

/// Mount the loaded image, replacing any current mount.
#[unsafe(no_mangle)]
pub extern "C" fn fat16_init() -> i32 {
    config();
    let mut state = STATE.lock();
    if state.image.is_none() {
        return Fat16Status::NoImage.code();
    }
    status(mount_image(&mut state))
}

/// Unmount, keeping the image loaded.
#[unsafe(no_mangle)]
pub extern "C" fn fat16_unmount() -> i32 {
    status(STATE.lock().driver.unmount().map(drop))
}

// ─── Files ─────────────────────────────────────────────────────────────────────

/// # Safety
/// `filename` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fat16_open(filename: *const c_char, mode: c_char) -> i32 {
    let Ok(mode) = OpenMode::try_from(mode as u8) else {
        return Fat16Status::InvalidArgument.code();
    };
    // SAFETY: forwarded caller contract.
    let name = match unsafe { c_str(filename) } {
        Ok(n) => n,
        Err(e) => return Fat16Status::from(e).code(),
    };
    match STATE.lock().driver.open(name, mode) {
        Ok(h) => h.raw(),
        Err(e) => Fat16Status::from(e).code(),
    }
}

/// # Safety
/// `buffer` must be valid for `count` bytes of writes (it may be null when
/// `count` is 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fat16_read(fd: i32, buffer: *mut u8, count: u32) -> i32 {
    let len = (count as usize).min(i32::MAX as usize);
    let buf: &mut [u8] = match (buffer.is_null(), len) {
        (_, 0) => &mut [],
        (true, _) => return Fat16Status::InvalidArgument.code(),
        // SAFETY: non-null and valid for `len` bytes per the caller's contract.
        (false, _) => unsafe { core::slice::from_raw_parts_mut(buffer, len) },
    };
    let res = Handle::from_raw(fd).and_then(|h| STATE.lock().driver.read(h, buf));
    byte_count(res)
}

/// # Safety
/// `buffer` must be valid for `count` bytes of reads (it may be null when
/// `count` is 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fat16_write(fd: i32, buffer: *const u8, count: u32) -> i32 {
    let len = (count as usize).min(i32::MAX as usize);
    let data: &[u8] = match (buffer.is_null(), len) {
        (_, 0) => &[],
        (true, _) => return Fat16Status::InvalidArgument.code(),
        // SAFETY: non-null and valid for `len` bytes per the caller's contract.
        (false, _) => unsafe { core::slice::from_raw_parts(buffer, len) },
    };
    let res = Handle::from_raw(fd).and_then(|h| STATE.lock().driver.write(h, data));
    byte_count(res)
}

#[unsafe(no_mangle)]
pub extern "C" fn fat16_close(fd: i32) -> i32 {
    status(Handle::from_raw(fd).and_then(|h| STATE.lock().driver.close(h)))
}

/// Persist a write handle's data and size without closing it.
#[unsafe(no_mangle)]
pub extern "C" fn fat16_flush(fd: i32) -> i32 {
    status(Handle::from_raw(fd).and_then(|h| STATE.lock().driver.flush(h)))
}

/// # Safety
/// `filename` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fat16_delete(filename: *const c_char) -> i32 {
    // SAFETY: forwarded caller contract.
    let res = unsafe { c_str(filename) }.and_then(|name| STATE.lock().driver.delete(name));
    status(res)
}

/// Directory listing. Writes the first visible entry at or after `*index`
/// into `filename` as `NAME.EXT\0` and moves `*index` past it; returns
/// `LS_END_OF_DIRECTORY` once nothing is left.
///
/// # Safety
/// `index` must be valid for reads and writes; `filename` must be valid for
/// `LS_NAME_BUF_LEN` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn fat16_ls(index: *mut u16, filename: *mut c_char) -> i32 {
    if index.is_null() || filename.is_null() {
        return Fat16Status::InvalidArgument.code();
    }
    // SAFETY: checked non-null; validity per the caller's contract.
    let from = unsafe { *index };
    let entry = match STATE.lock().driver.next_entry(from) {
        Ok(Some(e)) => e,
        Ok(None) => return LS_END_OF_DIRECTORY,
        Err(e) => return Fat16Status::from(e).code(),
    };

    let mut out = [0u8; LS_NAME_BUF_LEN];
    let name = entry.name.to_string();
    let n = name.len().min(LS_NAME_BUF_LEN - 1);
    out[..n].copy_from_slice(&name.as_bytes()[..n]);
    // SAFETY: `filename` holds LS_NAME_BUF_LEN bytes per the caller's contract.
    unsafe {
        core::ptr::copy_nonoverlapping(out.as_ptr(), filename as *mut u8, LS_NAME_BUF_LEN);
        *index = entry.slot + 1;
    }
    Fat16Status::Ok.code()
}
