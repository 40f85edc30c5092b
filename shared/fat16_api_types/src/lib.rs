#![no_std]

#[cfg(test)]
extern crate std;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Default number of simultaneously open descriptors.
pub const DEFAULT_HANDLE_COUNT: usize = 16;

/// Upper bound on the descriptor table; handles must fit the C side's `uint8_t`.
pub const MAX_HANDLE_COUNT: usize = 254;

/// `NAME.EXT` plus the terminating NUL, as written by `fat16_ls`.
pub const LS_NAME_BUF_LEN: usize = 13;

/// Returned by `fat16_ls` once the root directory has no more entries. No
/// `Fat16Status` uses this value.
pub const LS_END_OF_DIRECTORY: i32 = -2;

/// Status codes returned across the C ABI.
///
/// Non-negative values from `fat16_open`, `fat16_read` and `fat16_write` are
/// payloads (a handle or a byte count); everything else is one of these.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Fat16Status {
    Ok               = 0,
    NotAFatVolume    = -1,
    NotMounted       = -3,
    FileNotFound     = -4,
    DirectoryFull    = -5,
    TooManyOpenFiles = -6,
    BadDescriptor    = -7,
    InvalidArgument  = -8,
    EmptyFile        = -9,
    NoSpace          = -10,
    CorruptChain     = -11,
    InvalidName      = -12,
    FileBusy         = -13,
    IsDirectory      = -14,
    ReadOnly         = -15,
    NoImage          = -16,
    ImageIoError     = -17,
}

impl Fat16Status {
    pub fn code(self) -> i32 {
        self.into()
    }

    /// Decode a raw return value; payloads (>= 0) map to `Ok`.
    pub fn from_code(v: i32) -> Self {
        if v >= 0 {
            return Fat16Status::Ok;
        }
        Fat16Status::try_from(v).unwrap_or(Fat16Status::InvalidArgument)
    }
}

/// The single-character mode accepted by `fat16_open`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum OpenMode {
    Read  = b'r',
    Write = b'w',
}
