//! 通用常量.

/// 标签体素.
pub mod label {
    /// 对象掩膜中背景体素的标签值.
    pub const BACKGROUND: u16 = 0;

    /// 体素是否是背景?
    #[inline]
    pub const fn is_background(p: u16) -> bool {
        p == BACKGROUND
    }

    /// 体素是否属于某个分割对象?
    #[inline]
    pub const fn is_object(p: u16) -> bool {
        p != BACKGROUND
    }
}

/// 原始栈在 x/y 方向的默认缩放因子.
///
/// 外部分割模型期望细胞核约 10 像素宽, 而原始数据约 30 像素,
/// 因此在推理前按该因子缩小.
pub const DEFAULT_XY_SCALE_FACTOR: f64 = 0.25;

/// 构造二值掩膜时高斯模糊的默认 sigma.
pub const DEFAULT_GAUSSIAN_SIGMA: f64 = 1.0;

/// 环形掩膜构造的默认腐蚀迭代数.
pub const DEFAULT_ERODE_ITERATIONS: usize = 2;

/// 环形掩膜构造的默认膨胀迭代数.
pub const DEFAULT_DILATE_ITERATIONS: usize = 2;

/// 批处理中信号通道 (cyto) 的默认高斯 sigma.
pub const DEFAULT_BATCH_CYTO_SIGMA: f64 = 0.7;

/// 批处理中细胞核通道 (dapi) 的默认高斯 sigma.
pub const DEFAULT_BATCH_DAPI_SIGMA: f64 = 3.0;

/// 分析输出目录的后缀. 文件枚举时会排除包含该子串的路径.
pub const ANALYSIS_DIR_SUFFIX: &str = "-analysis";

/// 所有派生产物文件名公共 stub 的后缀.
///
/// 之所以带 `-rgb-small`, 是因为派生链从缩放后的 rgb 栈开始,
/// 外部分割模型的掩膜文件也按该 stub 命名.
pub const BASE_STUB_SUFFIX: &str = "-rgb-small";

/// 可作为原始输入加载的文件扩展名.
pub const RAW_EXTENSIONS: [&str; 2] = [".nii", ".nii.gz"];

/// `path` 的文件名是否具备受支持的原始栈扩展名?
#[inline]
pub fn is_raw_file_name(name: &str) -> bool {
    RAW_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// 去除受支持扩展名后的文件名主干. 不认识的扩展名按最后一个 `.` 截断.
pub fn raw_file_stem(name: &str) -> &str {
    for ext in RAW_EXTENSIONS {
        if let Some(stem) = name.strip_suffix(ext) {
            return stem;
        }
    }
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}
