use crate::utils::error::ServiceError;
use crate::Result;
use image::{DynamicImage, GenericImageView, ImageFormat};

/// 图像最大边长
const MAX_DIMENSION: u32 = 8192;

pub struct ImageLoader;

impl ImageLoader {
    /// 从上传的字节加载图像
    pub fn from_bytes(bytes: &[u8], max_size: usize) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(ServiceError::InvalidInput("Empty image file".to_string()));
        }

        // 检查文件大小
        if bytes.len() > max_size {
            return Err(ServiceError::FileTooLarge(bytes.len(), max_size));
        }

        let format = Self::detect_format(bytes).ok_or_else(|| {
            ServiceError::UnsupportedFormat("unrecognized image data".to_string())
        })?;

        if !Self::is_supported_format(format) {
            return Err(ServiceError::UnsupportedFormat(format!("{:?}", format)));
        }

        let image = image::load_from_memory_with_format(bytes, format)?;
        Self::validate_dimensions(&image)?;

        Ok(image)
    }

    /// 检测图像格式
    pub fn detect_format(bytes: &[u8]) -> Option<ImageFormat> {
        image::guess_format(bytes).ok()
    }

    /// 验证图像格式是否支持
    pub fn is_supported_format(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Bmp
                | ImageFormat::Tiff
                | ImageFormat::WebP
                | ImageFormat::Gif
        )
    }

    /// 验证图像尺寸
    pub fn validate_dimensions(image: &DynamicImage) -> Result<()> {
        let (width, height) = image.dimensions();

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ServiceError::InvalidInput(format!(
                "Image too large: {}x{}, maximum {}x{}",
                width, height, MAX_DIMENSION, MAX_DIMENSION
            )));
        }

        Ok(())
    }
}
