//! 二值 3D 形态学操作.
//!
//! 结构元为 6-连通 (钻石型), 与逐标签环形掩膜构造的需求一致.
//! 越界邻域一律按背景处理.

use ndarray::Array3;

use crate::Idx3d;

/// `pos` 前后上下左右六个邻域坐标, 越界的被过滤掉.
fn diamond_neighbours(shape: Idx3d, (z, h, w): Idx3d) -> impl Iterator<Item = Idx3d> {
    let candidates = [
        (z.wrapping_sub(1), h, w),
        (z.saturating_add(1), h, w),
        (z, h.wrapping_sub(1), w),
        (z, h.saturating_add(1), w),
        (z, h, w.wrapping_sub(1)),
        (z, h, w.saturating_add(1)),
    ];
    candidates
        .into_iter()
        .filter(move |&(z0, h0, w0)| z0 < shape.0 && h0 < shape.1 && w0 < shape.2)
}

/// 单轮钻石型膨胀.
fn dilate_once(mask: &Array3<bool>) -> Array3<bool> {
    let shape = mask.dim();
    let mut out = mask.clone();
    for (pos, &fg) in mask.indexed_iter() {
        if fg {
            for n in diamond_neighbours(shape, pos) {
                out[n] = true;
            }
        }
    }
    out
}

/// 单轮钻石型腐蚀. 处于边界面的前景体素总会被腐蚀 (越界即背景).
fn erode_once(mask: &Array3<bool>) -> Array3<bool> {
    let shape = mask.dim();
    let mut out = mask.clone();
    for (pos, &fg) in mask.indexed_iter() {
        if !fg {
            continue;
        }
        let mut neighbours = 0usize;
        let mut all_fg = true;
        for n in diamond_neighbours(shape, pos) {
            neighbours += 1;
            all_fg &= mask[n];
        }
        // 少于 6 个邻域说明位于体积边界面.
        if !all_fg || neighbours < 6 {
            out[pos] = false;
        }
    }
    out
}

/// 迭代 `iterations` 次的二值膨胀. `iterations == 0` 时原样返回.
pub fn binary_dilate(mask: &Array3<bool>, iterations: usize) -> Array3<bool> {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = dilate_once(&out);
    }
    out
}

/// 迭代 `iterations` 次的二值腐蚀. `iterations == 0` 时原样返回.
pub fn binary_erode(mask: &Array3<bool>, iterations: usize) -> Array3<bool> {
    let mut out = mask.clone();
    for _ in 0..iterations {
        out = erode_once(&out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{binary_dilate, binary_erode};
    use ndarray::{s, Array3};

    fn count(mask: &Array3<bool>) -> usize {
        mask.iter().filter(|&&v| v).count()
    }

    /// 单体素膨胀一轮得到 7 体素的钻石.
    #[test]
    fn test_dilate_single_voxel() {
        let mut mask = Array3::<bool>::from_elem((5, 5, 5), false);
        mask[(2, 2, 2)] = true;
        let d = binary_dilate(&mask, 1);
        assert_eq!(count(&d), 7);
        assert!(d[(2, 2, 2)] && d[(1, 2, 2)] && d[(3, 2, 2)]);
        assert!(d[(2, 1, 2)] && d[(2, 3, 2)] && d[(2, 2, 1)] && d[(2, 2, 3)]);
    }

    /// 单体素腐蚀一轮后消失.
    #[test]
    fn test_erode_single_voxel() {
        let mut mask = Array3::<bool>::from_elem((3, 3, 3), false);
        mask[(1, 1, 1)] = true;
        assert_eq!(count(&binary_erode(&mask, 1)), 0);
    }

    /// 3x3x3 立方体腐蚀一轮只剩中心体素.
    #[test]
    fn test_erode_cube() {
        let mut mask = Array3::<bool>::from_elem((5, 5, 5), false);
        mask.slice_mut(s![1..4, 1..4, 1..4]).fill(true);
        let e = binary_erode(&mask, 1);
        assert_eq!(count(&e), 1);
        assert!(e[(2, 2, 2)]);
    }

    /// 贴边的前景在腐蚀时按越界即背景处理.
    #[test]
    fn test_erode_full_volume() {
        let mask = Array3::<bool>::from_elem((3, 3, 3), true);
        let e = binary_erode(&mask, 1);
        assert_eq!(count(&e), 1);
        assert!(e[(1, 1, 1)]);
    }

    /// 零迭代是恒等操作.
    #[test]
    fn test_zero_iterations() {
        let mut mask = Array3::<bool>::from_elem((4, 4, 4), false);
        mask[(1, 2, 3)] = true;
        assert_eq!(binary_dilate(&mask, 0), mask);
        assert_eq!(binary_erode(&mask, 0), mask);
    }

    /// 膨胀体素数随迭代单调不减.
    #[test]
    fn test_dilate_monotonic() {
        let mut mask = Array3::<bool>::from_elem((7, 7, 7), false);
        mask[(3, 3, 3)] = true;
        let mut prev = 0usize;
        for it in 0..4 {
            let cur = count(&binary_dilate(&mask, it));
            assert!(cur >= prev);
            prev = cur;
        }
    }
}
