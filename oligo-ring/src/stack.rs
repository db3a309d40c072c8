//! 原始双通道荧光栈与缩放后的 rgb 栈.
//!
//! 原始栈为 nii 格式的 4D `u16` 体数据, 轴按 (z, 高, 宽, 通道) 排列
//! (nifti 文件内为 \[W, H, z, c\], 打开时转换). rgb 栈由原始栈按
//! `xyScaleFactor` 水平缩放并转 8 位得到, 以 npy 产物形式持久化.

use std::path::Path;

use itertools::Itertools;
use ndarray::{Array3, Array4, ArrayView3, Axis, Ix4};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::OligoError;
use crate::Result;

/// 原始栈要求的通道数.
pub const RAW_CHANNELS: usize = 2;

/// rgb 栈的颜色平面数.
pub const RGB_PLANES: usize = 3;

/// nii 文件 header 的共用属性.
pub trait StackHeaderAttr {
    /// 获取 header 部分.
    fn nifti_header(&self) -> &NiftiHeader;

    /// 获取数据形状大小, 按 (z, 高, 宽, 通道) 排列.
    #[inline]
    fn shape(&self) -> (usize, usize, usize, usize) {
        get_shape_from_header(self.nifti_header())
    }

    /// 获取通道个数.
    #[inline]
    fn num_channels(&self) -> usize {
        self.shape().3
    }

    /// 获取水平切片个数.
    #[inline]
    fn num_slices(&self) -> usize {
        self.shape().0
    }

    /// 获取 (x, y, z) 方向体素个数.
    #[inline]
    fn pixels(&self) -> (u64, u64, u64) {
        let [_, w, h, z, ..] = self.nifti_header().dim;
        (w as u64, h as u64, z as u64)
    }

    /// 获取 (x, y, z) 方向单体素尺寸, 以微米为单位.
    #[inline]
    fn voxels(&self) -> (f64, f64, f64) {
        let [_, w, h, z, ..] = self.nifti_header().pixdim;
        (w as f64, h as f64, z as f64)
    }
}

/// nii 格式原始双通道荧光栈, 包括 header 和 `u16` 体数据.
#[derive(Debug, Clone)]
pub struct RawStack {
    header: Box<NiftiHeader>,
    data: Array4<u16>,
}

/// 将 (W, H, z, c) 转换成 (z, H, W, c). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> (usize, usize, usize, usize) {
    // [W, H, z, c]. 体素个数数组.
    let [_, w, h, z, c, ..] = h.dim;
    (z as usize, h as usize, w as usize, c as usize)
}

impl StackHeaderAttr for RawStack {
    #[inline]
    fn nifti_header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl RawStack {
    /// 打开 nii 文件格式的 4D 原始栈. `path` 为 nii 文件的本地路径.
    ///
    /// # 注意
    ///
    /// 1. `path` 必须是常规文件, 否则返回 [`OligoError::NotAFile`].
    /// 2. 通道数必须恰为 2, 否则返回 [`OligoError::ChannelCount`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OligoError::NotAFile(path.to_owned()));
        }

        let obj = ReaderOptions::new().read_file(path)?;
        let header = Box::new(obj.header().clone());

        let data = obj.into_volume().into_ndarray::<u16>()?;
        let data = match data.into_dimensionality::<Ix4>() {
            Ok(d) => d,
            // 3D (或更低维) 文件视为单通道.
            Err(_) => return Err(OligoError::ChannelCount(1)),
        };
        if data.shape()[3] != RAW_CHANNELS {
            return Err(OligoError::ChannelCount(data.shape()[3]));
        }

        // [W, H, z, c] -> [z, H, W, c].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = data.permuted_axes([2, 1, 0, 3]);
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };

        Ok(Self { header, data })
    }

    /// 只读取 nii 文件的 header 部分, 不加载体数据.
    pub fn header_only<P: AsRef<Path>>(path: P) -> Result<Box<NiftiHeader>> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(OligoError::NotAFile(path.to_owned()));
        }
        Ok(Box::new(NiftiHeader::from_file(path)?))
    }

    /// 获取 `plane` 通道的 3D 视图, 按 (z, 高, 宽) 排列.
    ///
    /// 如果 `plane` 越界, 则程序 panic.
    #[inline]
    pub fn channel_plane(&self, plane: usize) -> ArrayView3<'_, u16> {
        self.data.index_axis(Axis(3), plane)
    }

    /// 计算 `plane` 通道的最小/最大强度. 空数据时为 `(0, 0)`.
    pub fn plane_min_max(&self, plane: usize) -> (u16, u16) {
        self.channel_plane(plane)
            .iter()
            .minmax()
            .into_option()
            .map(|(lo, hi)| (*lo, *hi))
            .unwrap_or((0, 0))
    }
}

/// 缩放后的 8 位 rgb 栈, 按 (z, 高, 宽, 3) 排列.
///
/// 平面 0 为信号通道, 平面 1 为细胞核通道, 平面 2 恒为 0.
#[derive(Debug, Clone)]
pub struct RgbStack {
    data: Array4<u8>,
}

impl RgbStack {
    /// 从原始栈合成 rgb 栈.
    ///
    /// 两个通道先从 16 位降到 8 位 (右移 8 位), 再按 `xy_scale_factor`
    /// 对高/宽两个方向做最近邻缩放; z 方向不缩放.
    pub fn compose(
        raw: &RawStack,
        cyto_plane: usize,
        dapi_plane: usize,
        xy_scale_factor: f64,
    ) -> Self {
        let cyto = zoom_plane(raw.channel_plane(cyto_plane), xy_scale_factor);
        let dapi = zoom_plane(raw.channel_plane(dapi_plane), xy_scale_factor);
        debug_assert_eq!(cyto.dim(), dapi.dim());

        let (z, h, w) = cyto.dim();
        let mut data = Array4::<u8>::zeros((z, h, w, RGB_PLANES));
        data.index_axis_mut(Axis(3), 0).assign(&cyto);
        data.index_axis_mut(Axis(3), 1).assign(&dapi);

        Self { data }
    }

    /// 从 npy 产物加载.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data: Array4<u8> = ndarray_npy::read_npy(path)?;
        Ok(Self { data })
    }

    /// 持久化为 npy 产物.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ndarray_npy::write_npy(path, &self.data)?;
        Ok(())
    }

    /// 获取数据形状大小, 按 (z, 高, 宽, 3) 排列.
    #[inline]
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// 获取 `plane` 颜色平面的 3D 视图.
    ///
    /// 如果 `plane` 越界, 则程序 panic.
    #[inline]
    pub fn plane(&self, plane: usize) -> ArrayView3<'_, u8> {
        self.data.index_axis(Axis(3), plane)
    }
}

/// 单通道 16 位转 8 位并做水平方向最近邻缩放.
///
/// `factor <= 0` 或为 1 时只做位深转换.
fn zoom_plane(plane: ArrayView3<'_, u16>, factor: f64) -> Array3<u8> {
    let (z, h, w) = plane.dim();
    if factor <= 0.0 || (factor - 1.0).abs() < f64::EPSILON {
        return plane.mapv(|v| (v >> 8) as u8);
    }

    let oh = ((h as f64 * factor).round() as usize).max(1);
    let ow = ((w as f64 * factor).round() as usize).max(1);

    Array3::from_shape_fn((z, oh, ow), |(k, i, j)| {
        let si = ((i as f64 / factor) as usize).min(h - 1);
        let sj = ((j as f64 / factor) as usize).min(w - 1);
        (plane[(k, si, sj)] >> 8) as u8
    })
}

#[cfg(test)]
mod tests {
    use super::{zoom_plane, RawStack, RgbStack, StackHeaderAttr};
    use ndarray::{Array3, Array4};
    use nifti::writer::WriterOptions;

    /// 生成 (W, H, z, c) 形状的测试栈并写入 nii 文件.
    fn write_stack(dir: &std::path::Path, name: &str, shape: (usize, usize, usize, usize)) -> std::path::PathBuf {
        let (w, h, z, c) = shape;
        let mut n = 0u16;
        let data = Array4::<u16>::from_shape_fn((w, h, z, c), |_| {
            n = n.wrapping_add(257);
            n
        });
        let path = dir.join(name);
        WriterOptions::new(&path).write_nifti(&data).unwrap();
        path
    }

    /// 打开后形状转为 (z, H, W, c), header 属性一致.
    #[test]
    fn test_open_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stack(dir.path(), "two.nii", (8, 6, 3, 2));

        let raw = RawStack::open(&path).unwrap();
        assert_eq!(raw.shape(), (3, 6, 8, 2));
        assert_eq!(raw.num_channels(), 2);
        assert_eq!(raw.num_slices(), 3);
        assert_eq!(raw.pixels(), (8, 6, 3));
        assert_eq!(raw.channel_plane(0).dim(), (3, 6, 8));
    }

    /// 写入与读回的体素一一对应 (轴换序).
    #[test]
    fn test_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (w, h, z, c) = (5, 4, 3, 2);
        let src = Array4::<u16>::from_shape_fn((w, h, z, c), |(a, b, k, p)| {
            (a * 1000 + b * 100 + k * 10 + p) as u16
        });
        let path = dir.path().join("rt.nii");
        WriterOptions::new(&path).write_nifti(&src).unwrap();

        let raw = RawStack::open(&path).unwrap();
        for a in 0..w {
            for b in 0..h {
                for k in 0..z {
                    for p in 0..c {
                        assert_eq!(raw.channel_plane(p)[(k, b, a)], src[(a, b, k, p)]);
                    }
                }
            }
        }
    }

    /// 通道数不为 2 时拒绝打开.
    #[test]
    fn test_open_wrong_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stack(dir.path(), "three.nii", (4, 4, 2, 3));
        assert!(matches!(
            RawStack::open(&path),
            Err(crate::OligoError::ChannelCount(3))
        ));
    }

    /// 路径不是常规文件时拒绝打开.
    #[test]
    fn test_open_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RawStack::open(dir.path().join("absent.nii")),
            Err(crate::OligoError::NotAFile(_))
        ));
    }

    /// header_only 与完整打开给出同样的几何属性.
    #[test]
    fn test_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stack(dir.path(), "ho.nii", (8, 6, 3, 2));

        let raw = RawStack::open(&path).unwrap();
        let header = RawStack::header_only(&path).unwrap();
        let [_, w, h, z, c, ..] = header.dim;
        assert_eq!(
            (z as usize, h as usize, w as usize, c as usize),
            raw.shape()
        );
    }

    /// 16 位到 8 位转换按高字节截取.
    #[test]
    fn test_zoom_bit_depth() {
        let plane = Array3::<u16>::from_elem((1, 2, 2), 0x1234);
        let out = zoom_plane(plane.view(), 1.0);
        assert!(out.iter().all(|&v| v == 0x12));
    }

    /// 最近邻缩放: 0.5 因子把 4x4 缩成 2x2, 取每个 2x2 块的左上角.
    #[test]
    fn test_zoom_nearest() {
        let plane = Array3::<u16>::from_shape_fn((1, 4, 4), |(_, i, j)| ((i * 4 + j) as u16) << 8);
        let out = zoom_plane(plane.view(), 0.5);
        assert_eq!(out.dim(), (1, 2, 2));
        assert_eq!(out[(0, 0, 0)], 0);
        assert_eq!(out[(0, 0, 1)], 2);
        assert_eq!(out[(0, 1, 0)], 8);
        assert_eq!(out[(0, 1, 1)], 10);
    }

    /// rgb 合成: 平面 0/1 来自两个通道, 平面 2 恒为 0; npy 往返一致.
    #[test]
    fn test_compose_and_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_stack(dir.path(), "rgb.nii", (4, 4, 2, 2));
        let raw = RawStack::open(&path).unwrap();

        let rgb = RgbStack::compose(&raw, 0, 1, 1.0);
        assert_eq!(rgb.shape(), (2, 4, 4, 3));
        assert!(rgb.plane(2).iter().all(|&v| v == 0));
        assert_eq!(
            rgb.plane(0)[(0, 0, 0)],
            (raw.channel_plane(0)[(0, 0, 0)] >> 8) as u8
        );

        let npy = dir.path().join("rgb.npy");
        rgb.save(&npy).unwrap();
        let back = RgbStack::load(&npy).unwrap();
        assert_eq!(back.shape(), rgb.shape());
        assert_eq!(back.plane(1)[(1, 2, 3)], rgb.plane(1)[(1, 2, 3)]);
    }
}
