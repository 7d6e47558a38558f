//! 图片缩放/编码 - 基础设施层

use std::io::Cursor;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::ImageFormat;

use crate::error::EncodingError;
use crate::models::Dimensions;

/// 缩放后的图片
#[derive(Debug, Clone)]
pub struct ResizedImage {
    pub bytes: Vec<u8>,
    pub dimensions: Dimensions,
}

/// 缩放/编码能力
#[async_trait]
pub trait ImageResizer: Send + Sync {
    async fn resize(&self, image: Vec<u8>, target: Dimensions) -> Result<ResizedImage, EncodingError>;
}

/// 基于 `image` crate 的实现
///
/// 保持宽高比缩放到目标框内，输出 PNG。解码和编码都是 CPU 密集操作，放在阻塞线程池执行
#[derive(Debug, Clone, Default)]
pub struct ImageCrateResizer;

#[async_trait]
impl ImageResizer for ImageCrateResizer {
    async fn resize(&self, image: Vec<u8>, target: Dimensions) -> Result<ResizedImage, EncodingError> {
        tokio::task::spawn_blocking(move || resize_blocking(&image, target))
            .await
            .map_err(|e| EncodingError::new(format!("缩放任务异常退出: {}", e)))?
    }
}

fn resize_blocking(image: &[u8], target: Dimensions) -> Result<ResizedImage, EncodingError> {
    let decoded = image::load_from_memory(image)
        .map_err(|e| EncodingError::new(format!("图片解码失败: {}", e)))?;

    let resized = decoded.resize(target.width, target.height, FilterType::Lanczos3);
    let dimensions = Dimensions::new(resized.width(), resized.height());

    let mut bytes = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| EncodingError::new(format!("PNG 编码失败: {}", e)))?;

    Ok(ResizedImage { bytes, dimensions })
}
