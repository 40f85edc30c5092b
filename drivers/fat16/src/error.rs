use core::fmt;

use fat16_api_types::Fat16Status;

pub type Result<T> = core::result::Result<T, Fat16Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fat16Error {
    /// Boot sector failed validation.
    NotAFatVolume,
    /// Sector index out of range, or the backing device refused the transfer.
    ImageIo,
    NotMounted,
    FileNotFound,
    DirectoryFull,
    TooManyOpenFiles,
    /// Closed handle, out-of-range handle, or wrong mode for the operation.
    BadDescriptor,
    /// Read on a zero-size file.
    EmptyFile,
    NoSpace,
    /// Cycle, out-of-range link or bad/reserved marker inside a chain.
    CorruptChain,
    InvalidName,
    InvalidArgument,
    /// Conflicting open of the same file.
    FileBusy,
    IsDirectory,
    ReadOnly,
}

impl fmt::Display for Fat16Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Fat16Error::NotAFatVolume    => "not a FAT16 volume",
            Fat16Error::ImageIo          => "image I/O error",
            Fat16Error::NotMounted       => "no volume mounted",
            Fat16Error::FileNotFound     => "file not found",
            Fat16Error::DirectoryFull    => "root directory full",
            Fat16Error::TooManyOpenFiles => "too many open files",
            Fat16Error::BadDescriptor    => "bad file descriptor",
            Fat16Error::EmptyFile        => "file is empty",
            Fat16Error::NoSpace          => "no free cluster left",
            Fat16Error::CorruptChain     => "corrupt cluster chain",
            Fat16Error::InvalidName      => "invalid 8.3 file name",
            Fat16Error::InvalidArgument  => "invalid argument",
            Fat16Error::FileBusy         => "file is already open",
            Fat16Error::IsDirectory      => "is a directory",
            Fat16Error::ReadOnly         => "file is read-only",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Fat16Error {}

impl From<Fat16Error> for Fat16Status {
    fn from(e: Fat16Error) -> Self {
        match e {
            Fat16Error::NotAFatVolume    => Fat16Status::NotAFatVolume,
            Fat16Error::ImageIo          => Fat16Status::ImageIoError,
            Fat16Error::NotMounted       => Fat16Status::NotMounted,
            Fat16Error::FileNotFound     => Fat16Status::FileNotFound,
            Fat16Error::DirectoryFull    => Fat16Status::DirectoryFull,
            Fat16Error::TooManyOpenFiles => Fat16Status::TooManyOpenFiles,
            Fat16Error::BadDescriptor    => Fat16Status::BadDescriptor,
            Fat16Error::EmptyFile        => Fat16Status::EmptyFile,
            Fat16Error::NoSpace          => Fat16Status::NoSpace,
            Fat16Error::CorruptChain     => Fat16Status::CorruptChain,
            Fat16Error::InvalidName      => Fat16Status::InvalidName,
            Fat16Error::InvalidArgument  => Fat16Status::InvalidArgument,
            Fat16Error::FileBusy         => Fat16Status::FileBusy,
            Fat16Error::IsDirectory      => Fat16Status::IsDirectory,
            Fat16Error::ReadOnly         => Fat16Status::ReadOnly,
        }
    }
}
