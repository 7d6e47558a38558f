//! 基础设施层（Infrastructure）
//!
//! 持有外部能力（远程合成服务、图片编解码、压缩），不认识批次和任务

pub mod archiver;
pub mod compositor;
pub mod image_resizer;

pub use compositor::{Compositor, GeminiCompositor};
pub use image_resizer::{ImageCrateResizer, ImageResizer, ResizedImage};
