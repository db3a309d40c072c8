#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供共聚焦双通道显微镜 3D 栈的细胞核环形掩膜分析功能.
//!
//! 分析对象是两通道 (cyto 信号通道 + DAPI 细胞核通道) 的 3D 图像栈.
//! 外部分割模型 (cellpose 类) 对细胞核产生整数标签掩膜,
//! 本库对每个标签构造环形 (annulus) 区域, 并统计信号通道在环内的占比.
//!
//! # 注意
//!
//! 1. 原始栈以 nifti 4D 文件组织 (两个 `u16` 通道).
//!   派生产物均以单文件 `.npy` 格式落盘, 可独立加载.
//! 2. 单个文件的分析失败不应使整个批处理中止.
//!   可恢复的 "缺输入" 情形以 `Option`/软失败表达, 而不是错误传播.
//!
//! # 功能总览
//!
//! ### 环形掩膜引擎 ✅
//!
//! 对每个标签做 `dilate(M, d) XOR erode(M, e)`, 并统计信号通道像素.
//!
//! 实现位于 `oligo-ring/src/ring.rs`.
//!
//! ### 逐文件分析生命周期与产物缓存 ✅
//!
//! header-only -> 完全加载 -> 已分析 -> 保存 -> 卸载.
//! 每个派生产物带参数溯源 sidecar, 以参数匹配决定缓存复用.
//!
//! 实现位于 `oligo-ring/src/analysis.rs`.
//!
//! ### Header 存取 ✅
//!
//! 固定 schema 的类型化记录 + 泛化 `extra` 扩展表,
//! json 持久化, 按 "已知键合并" 语义加载.
//!
//! 实现位于 `oligo-ring/src/header.rs`.
//!
//! ### 文件夹聚合与批处理 ✅
//!
//! 递归枚举原始文件, 逐文件运行完整管线, 各文件夹结果增量拼接.
//!
//! 实现位于 `oligo-ring/src/{folder, batch}.rs`.

/// 二维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引, 同时也可一定程度上用作非负整数向量. 按 `(z, h, w)` 组织.
pub type Idx3d = (usize, usize, usize);

pub mod consts;

mod error;

pub use error::{OligoError, Result};

mod channel;

pub use channel::StainChannel;

pub mod filename;

pub mod filter;

pub mod morphology;

mod labels;

pub use labels::{Accept, LabelRow, LabelTable};

pub mod ring;

mod header;

pub use header::{ChannelMaskResult, Header};

mod stack;

pub use stack::{RawStack, RgbStack, StackHeaderAttr};

pub mod preview;

mod analysis;

pub use analysis::OligoAnalysis;

mod folder;

pub use folder::{AggregateTable, OligoAnalysisFolder};

mod batch;

pub use batch::{run_batch, BatchConfig};

pub mod prelude;
