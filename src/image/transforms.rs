use crate::detection::BoundingBox;
use image::{DynamicImage, GenericImageView};

/// 图像变换工具集
pub struct ImageTransforms;

impl ImageTransforms {
    /// 按边界框裁剪区域，超出图像的部分被截断；空区域返回None
    pub fn crop(image: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
        let (width, height) = image.dimensions();

        let left = bbox.left.min(width);
        let top = bbox.top.min(height);
        let right = bbox.right.min(width);
        let bottom = bbox.bottom.min(height);

        if right <= left || bottom <= top {
            return None;
        }

        Some(image.crop_imm(left, top, right - left, bottom - top))
    }
}
