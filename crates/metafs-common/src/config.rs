//! Configuration types for metafs

use serde::{Deserialize, Serialize};

/// Open file table configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenFilesConfig {
    /// Maximum bytes accumulated before a partial write is flushed to the
    /// backing object.
    pub max_write_size: usize,
}

impl Default for OpenFilesConfig {
    fn default() -> Self {
        Self {
            max_write_size: 10 * 1024 * 1024, // 10 MiB
        }
    }
}
