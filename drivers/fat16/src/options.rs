use fat16_api_types::{DEFAULT_HANDLE_COUNT, MAX_HANDLE_COUNT};

/// Per-mount knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountOptions {
    /// Size of the descriptor table, clamped to `1..=MAX_HANDLE_COUNT`.
    pub max_open_files: usize,
    /// Reject volumes whose cluster count is outside the FAT16 range
    /// (4085..65525). Off only for small synthetic images.
    pub require_fat16: bool,
}

impl MountOptions {
    pub const DEFAULT: Self = Self {
        max_open_files: DEFAULT_HANDLE_COUNT,
        require_fat16: true,
    };

    pub fn with_max_open_files(mut self, n: usize) -> Self {
        self.max_open_files = n;
        self
    }

    pub fn with_require_fat16(mut self, on: bool) -> Self {
        self.require_fat16 = on;
        self
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.max_open_files.clamp(1, MAX_HANDLE_COUNT)
    }
}

impl Default for MountOptions {
    fn default() -> Self {
        Self::DEFAULT
    }
}
