//! Document store configuration.

use serde::{Deserialize, Serialize};

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend: only `"memory"` ships with LessonSync.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Buffer size of the change broadcast channel.
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            channel_buffer_size: default_channel_buffer(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_channel_buffer() -> usize {
    256
}
