//! Application settings loaded from `renderer.toml`.

use serde::Deserialize;

use renderer_renderer::FrameConfig;

pub const CONFIG_PATH: &str = "renderer.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    /// Used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Enables the Khronos validation layer when installed
    pub validation: bool,
    pub frame: FrameConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            log_filter: renderer_core::DEFAULT_LOG_FILTER.to_string(),
            validation: cfg!(debug_assertions),
            frame: FrameConfig::default(),
        }
    }
}
