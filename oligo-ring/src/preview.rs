//! 分析产物的可视化预览.
//!
//! 预览采用 "可视化友好" 模式而不是 "as is" 模式: rgb 栈直接取
//! 中间切片; 环形掩膜这类仅有少量标签值的体数据在保存时将标签
//! 拉伸到肉眼较易区分的灰度范围.

use std::path::Path;

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::ArrayView3;

use crate::consts::label;
use crate::stack::RgbStack;
use crate::Result;

/// 将 rgb 栈的中间切片保存为 png 预览图.
pub fn save_rgb_preview<P: AsRef<Path>>(rgb: &RgbStack, path: P) -> Result<()> {
    let (z, height, width, _) = rgb.shape();
    let mid = z / 2;

    let mut buf = RgbImage::new(width as u32, height as u32);
    for h in 0..height {
        for w in 0..width {
            let pix = [
                rgb.plane(0)[(mid, h, w)],
                rgb.plane(1)[(mid, h, w)],
                rgb.plane(2)[(mid, h, w)],
            ];
            buf.put_pixel(w as u32, h as u32, Rgb(pix));
        }
    }
    buf.save(path)?;
    Ok(())
}

/// 将环形掩膜的中间切片保存为灰度 png 预览图.
///
/// 背景为黑色, 标签按标签值均匀拉伸到 (0, 255], 便于肉眼区分相邻标签.
pub fn save_ring_preview<P: AsRef<Path>>(ring: ArrayView3<'_, u16>, path: P) -> Result<()> {
    let (z, height, width) = ring.dim();
    let mid = z / 2;
    let max = ring.iter().copied().max().unwrap_or(label::BACKGROUND);

    let mut buf = GrayImage::new(width as u32, height as u32);
    for h in 0..height {
        for w in 0..width {
            let v = ring[(mid, h, w)];
            let gray = if label::is_background(v) || label::is_background(max) {
                0
            } else {
                (v as u32 * 255 / max as u32) as u8
            };
            buf.put_pixel(w as u32, h as u32, Luma([gray]));
        }
    }
    buf.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{save_rgb_preview, save_ring_preview};
    use crate::stack::{RawStack, RgbStack};
    use ndarray::{Array3, Array4};
    use nifti::writer::WriterOptions;

    /// rgb 预览与环形掩膜预览都能产出非空 png 文件.
    #[test]
    fn test_previews_written() {
        let dir = tempfile::tempdir().unwrap();

        let src = Array4::<u16>::from_elem((4, 4, 3, 2), 0x4000);
        let nii = dir.path().join("p.nii");
        WriterOptions::new(&nii).write_nifti(&src).unwrap();
        let raw = RawStack::open(&nii).unwrap();
        let rgb = RgbStack::compose(&raw, 0, 1, 1.0);

        let rgb_png = dir.path().join("rgb.png");
        save_rgb_preview(&rgb, &rgb_png).unwrap();
        assert!(rgb_png.metadata().unwrap().len() > 0);

        let mut ring = Array3::<u16>::zeros((3, 4, 4));
        ring[(1, 1, 1)] = 1;
        ring[(1, 2, 2)] = 2;
        let ring_png = dir.path().join("ring.png");
        save_ring_preview(ring.view(), &ring_png).unwrap();
        assert!(ring_png.metadata().unwrap().len() > 0);
    }

    /// 全背景体数据退化为全黑图而不是除零.
    #[test]
    fn test_empty_ring_preview() {
        let dir = tempfile::tempdir().unwrap();
        let ring = Array3::<u16>::zeros((2, 3, 3));
        let png = dir.path().join("empty.png");
        save_ring_preview(ring.view(), &png).unwrap();
        assert!(png.is_file());
    }
}
