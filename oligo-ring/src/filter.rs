//! 图像滤波原语: 可分离 3D 高斯模糊与 Otsu 阈值.
//!
//! 这些操作只服务于二值掩膜构造, 因此一律以 `f32` 中间格式工作,
//! 模糊结果 (filtered image) 会独立保留用于叠加显示.

use ndarray::{Array3, ArrayView3, Axis};

/// Otsu 直方图的 bin 个数.
const OTSU_BINS: usize = 256;

/// 高斯核截断半径: `ceil(4 * sigma)`.
#[inline]
fn kernel_radius(sigma: f64) -> usize {
    (4.0 * sigma).ceil() as usize
}

/// 生成归一化一维高斯核. `sigma` 必须为正.
fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    debug_assert!(sigma > 0.0);
    let radius = kernel_radius(sigma) as isize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / denom).exp())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel.into_iter().map(|k| k as f32).collect()
}

/// 沿 `axis` 方向做一维卷积. 边界按最近值延拓 (clamp).
fn convolve_axis(data: &Array3<f32>, kernel: &[f32], axis: Axis) -> Array3<f32> {
    let radius = (kernel.len() / 2) as isize;
    let len = data.len_of(axis) as isize;
    let mut out = Array3::<f32>::zeros(data.raw_dim());

    for (mut out_lane, in_lane) in out.lanes_mut(axis).into_iter().zip(data.lanes(axis)) {
        for i in 0..len {
            let mut acc = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let j = (i + k as isize - radius).clamp(0, len - 1) as usize;
                acc += w * in_lane[j];
            }
            out_lane[i as usize] = acc;
        }
    }
    out
}

/// 可分离 3D 高斯模糊. `sigma <= 0` 时原样返回.
pub fn gaussian_blur_3d(data: &Array3<f32>, sigma: f64) -> Array3<f32> {
    if sigma <= 0.0 {
        return data.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let mut out = convolve_axis(data, &kernel, Axis(0));
    out = convolve_axis(&out, &kernel, Axis(1));
    convolve_axis(&out, &kernel, Axis(2))
}

/// 在 256-bin 直方图上求 Otsu 阈值 (类间方差最大化).
///
/// # 注意
///
/// 1. 平坦图像 (max == min) 直接返回该常数值, 此时 `> threshold`
///   的掩膜为空.
/// 2. 多个 bin 并列最优时取区间中点.
/// 3. 返回值处于原始数值尺度, 而不是 bin 编号.
pub fn otsu_threshold(data: &Array3<f32>) -> f32 {
    let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
    for &v in data.iter() {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if !(hi > lo) {
        return lo;
    }

    let scale = (OTSU_BINS - 1) as f32 / (hi - lo);
    let mut histogram = [0usize; OTSU_BINS];
    for &v in data.iter() {
        histogram[((v - lo) * scale) as usize] += 1;
    }

    let total = data.len() as f64;
    let total_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    // 遍历候选阈值, 记录类间方差最大的 bin 区间.
    // 两峰之间的空 bin 上方差恒定, 取平台中点作为阈值.
    let (mut first_best, mut last_best, mut best_var) = (0usize, 0usize, f64::NEG_INFINITY);
    let (mut weight_bg, mut sum_bg) = (0.0f64, 0.0f64);
    for (i, &count) in histogram.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * count as f64;

        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (total_sum - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between > best_var {
            best_var = between;
            first_best = i;
            last_best = i;
        } else if between == best_var {
            last_best = i;
        }
    }

    lo + ((first_best + last_best) / 2) as f32 / scale
}

/// 对单通道 8-bit 栈做 "高斯模糊 + Otsu 阈值".
///
/// # 返回值
///
/// `(otsu 阈值, 模糊后图像, 二值掩膜)`. 掩膜为 `模糊值 > 阈值`.
pub fn blur_and_threshold(data: ArrayView3<'_, u8>, sigma: f64) -> (f32, Array3<f32>, Array3<bool>) {
    let as_f32 = data.mapv(|v| v as f32);
    let blurred = gaussian_blur_3d(&as_f32, sigma);
    let threshold = otsu_threshold(&blurred);
    let binary = blurred.mapv(|v| v > threshold);
    (threshold, blurred, binary)
}
