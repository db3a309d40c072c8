//! 染色通道类型.

use std::fmt;

/// 双通道栈的染色通道.
///
/// 该枚举自带 header 键前缀与显示颜色, 用于消除按字符串分派的重复分支.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StainChannel {
    /// 信号通道 (oligo / 胞浆染色). 显示为红色.
    Cyto,

    /// 细胞核通道 (DAPI). 显示为绿色.
    Dapi,
}

impl StainChannel {
    /// 两个通道, 按分析顺序排列 (先信号后细胞核).
    pub const BOTH: [StainChannel; 2] = [StainChannel::Cyto, StainChannel::Dapi];

    /// header 中按通道前缀命名的键使用的前缀, 如 `cytoOtsuThreshold`.
    #[inline]
    pub const fn key_prefix(&self) -> &'static str {
        match self {
            Self::Cyto => "cyto",
            Self::Dapi => "dapi",
        }
    }

    /// rgb 栈中该通道默认所在的平面索引.
    #[inline]
    pub const fn default_plane(&self) -> usize {
        match self {
            Self::Cyto => 0,
            Self::Dapi => 1,
        }
    }

    /// 叠加显示时该通道的 rgb 颜色.
    #[inline]
    pub const fn display_color(&self) -> [u8; 3] {
        match self {
            Self::Cyto => [255, 0, 0],
            Self::Dapi => [0, 255, 0],
        }
    }
}

impl fmt::Display for StainChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_prefix())
    }
}
