//! Platform layer for the renderer.
//!
//! This crate provides:
//! - Window management via winit, with drawable size tracking
//! - Vulkan surface creation from raw window handles

mod window;

pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
