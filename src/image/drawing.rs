use crate::detection::Detection;
use crate::utils::error::ServiceError;
use crate::Result;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::io::Cursor;

/// 边框线宽（像素）
const LINE_WIDTH: u32 = 3;

/// 按类别循环使用的颜色
const PALETTE: [[u8; 3]; 8] = [
    [230, 25, 75],
    [60, 180, 75],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [255, 225, 25],
];

fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// 在图像上绘制检测框
pub fn annotate(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let bbox = &detection.bbox;
        let color = class_color(detection.class_id);

        // 向内收缩绘制多次以得到较粗的线条
        for offset in 0..LINE_WIDTH {
            let left = bbox.left + offset;
            let top = bbox.top + offset;
            let right = bbox.right.min(width).saturating_sub(offset);
            let bottom = bbox.bottom.min(height).saturating_sub(offset);
            if right <= left || bottom <= top {
                break;
            }

            let rect = Rect::at(left as i32, top as i32).of_size(right - left, bottom - top);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    canvas
}

/// 绘制检测框并编码为JPEG
pub fn draw_detections(image: &DynamicImage, detections: &[Detection]) -> Result<Vec<u8>> {
    let canvas = annotate(image, detections);

    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .map_err(|e| ServiceError::Internal(format!("Failed to encode annotated image: {}", e)))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn detection(bbox: BoundingBox) -> Detection {
        Detection {
            class_name: "cat".to_string(),
            class_id: 0,
            confidence: 90.0,
            bbox,
        }
    }

    #[test]
    fn test_annotate_draws_border_only() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(40, 40));
        let canvas = annotate(
            &image,
            &[detection(BoundingBox {
                left: 5,
                top: 5,
                right: 30,
                bottom: 30,
            })],
        );

        assert_eq!(*canvas.get_pixel(5, 5), class_color(0));
        assert_eq!(*canvas.get_pixel(7, 15), class_color(0));
        // 框内部保持原样
        assert_eq!(*canvas.get_pixel(15, 15), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(35, 35), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_degenerate_boxes_are_skipped() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(20, 20));
        let canvas = annotate(
            &image,
            &[detection(BoundingBox {
                left: 10,
                top: 10,
                right: 10,
                bottom: 15,
            })],
        );
        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_draw_detections_encodes_jpeg() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        let bytes = draw_detections(&image, &[detection(BoundingBox::full(32, 32))]).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }
}
