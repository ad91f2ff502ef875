//! Frame submission and presentation pipeline.
//!
//! This crate turns a [`GpuDevice`](renderer_rhi::GpuDevice) into a frame loop:
//! - [`FrameController`]: start/end frame orchestration, fatal error latching
//! - [`PresentationSurface`]: swapchain, per-image and per-frame resources,
//!   recreation
//! - [`ResizeReconciler`]: resize coalescing with generation counters
//! - [`FrameConfig`]: serde-loadable pipeline settings

pub mod config;
pub mod frame_controller;
pub mod presentation;
pub mod resize;

pub use config::FrameConfig;
pub use frame_controller::{FrameController, FrameState};
pub use presentation::{PresentOutcome, PresentationSurface};
pub use resize::{Generations, ResizeReconciler};
