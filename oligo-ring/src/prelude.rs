//! 🔬欢迎光临🧫
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::analysis::OligoAnalysis;
pub use crate::batch::{run_batch, BatchConfig};
pub use crate::channel::StainChannel;
pub use crate::error::{OligoError, Result};
pub use crate::folder::{AggregateTable, OligoAnalysisFolder};
pub use crate::header::{ChannelMaskResult, Header};
pub use crate::labels::{Accept, LabelRow, LabelTable};
pub use crate::stack::{RawStack, RgbStack, StackHeaderAttr};

pub use crate::consts::{
    is_raw_file_name, raw_file_stem, DEFAULT_DILATE_ITERATIONS, DEFAULT_ERODE_ITERATIONS,
    DEFAULT_GAUSSIAN_SIGMA, DEFAULT_XY_SCALE_FACTOR,
};

pub use crate::ring::compute_ring_statistics;
