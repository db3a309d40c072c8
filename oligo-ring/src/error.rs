//! 库级错误类型.

use std::fmt;
use std::path::PathBuf;

/// 本库的 `Result` 别名.
pub type Result<T> = std::result::Result<T, OligoError>;

/// 分析过程中可能出现的致单文件失败的错误.
///
/// # 注意
///
/// "对象掩膜缺失" 一类可恢复情形不属于错误, 相关接口以 `Option`/`bool`
/// 表达; 该枚举只覆盖底层 I/O 与格式问题.
#[derive(Debug)]
pub enum OligoError {
    /// 给定路径不是常规文件.
    NotAFile(PathBuf),

    /// 原始栈的通道数不符合预期 (应为 2).
    ChannelCount(usize),

    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// nifti 文件读写错误.
    Nifti(nifti::NiftiError),

    /// npy 产物读取错误.
    ReadNpy(ndarray_npy::ReadNpyError),

    /// npy 产物写入错误.
    WriteNpy(ndarray_npy::WriteNpyError),

    /// json 序列化/反序列化错误.
    Json(serde_json::Error),

    /// 预览图写入错误.
    Image(image::ImageError),
}

impl fmt::Display for OligoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAFile(p) => write!(f, "not a regular file: {}", p.display()),
            Self::ChannelCount(c) => write!(f, "expected a 2-channel raw stack, got {c} channels"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Nifti(e) => write!(f, "nifti error: {e}"),
            Self::ReadNpy(e) => write!(f, "npy read error: {e}"),
            Self::WriteNpy(e) => write!(f, "npy write error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Image(e) => write!(f, "image error: {e}"),
        }
    }
}

impl std::error::Error for OligoError {}

impl From<std::io::Error> for OligoError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<nifti::NiftiError> for OligoError {
    fn from(e: nifti::NiftiError) -> Self {
        Self::Nifti(e)
    }
}

impl From<ndarray_npy::ReadNpyError> for OligoError {
    fn from(e: ndarray_npy::ReadNpyError) -> Self {
        Self::ReadNpy(e)
    }
}

impl From<ndarray_npy::WriteNpyError> for OligoError {
    fn from(e: ndarray_npy::WriteNpyError) -> Self {
        Self::WriteNpy(e)
    }
}

impl From<serde_json::Error> for OligoError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<image::ImageError> for OligoError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}
