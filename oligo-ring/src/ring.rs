//! 环形掩膜引擎.
//!
//! 对对象掩膜中的每个正标签 L, 从同一种子掩膜分别计算膨胀 `D` 与腐蚀 `E`
//! (而不是彼此串联), 环即对称差 `D XOR E`; 随后统计信号通道二值掩膜
//! 在环内的重叠体素数与占比.

use std::collections::BTreeSet;

use log::info;
use ndarray::{Array3, ArrayView3, Zip};

use crate::consts::label::is_object;
use crate::labels::{Accept, LabelRow, LabelTable};
use crate::morphology::{binary_dilate, binary_erode};

/// 对整个对象掩膜做逐标签环形分析.
///
/// 输出体积与 `object_mask` 同形状, 标签 L 的环以 `L + 1` 标记
/// (避开 0 背景, 便于查看器区分); 多个标签的环发生重叠时取
/// **较大值** (max-wins), 决不累加, 因此任何体素都不会超过
/// `max(label) + 1`.
///
/// # 注意
///
/// 1. 标签按升序处理, 输出对相同输入逐位可复现.
/// 2. `dilate_iterations == erode_iterations == 0` 时每个环都为空,
///   相应行的占比为 `NaN`.
/// 3. 返回的统计表是从头重建的, 不包含先前的人工标注.
///
/// # 返回值
///
/// `(环形掩膜体积, 逐标签统计表)`.
pub fn compute_ring_statistics(
    object_mask: ArrayView3<'_, u16>,
    signal_mask: ArrayView3<'_, bool>,
    dilate_iterations: usize,
    erode_iterations: usize,
) -> (Array3<u16>, LabelTable) {
    assert_eq!(
        object_mask.dim(),
        signal_mask.dim(),
        "对象掩膜与信号掩膜形状不一致"
    );

    // BTreeSet 保证升序遍历.
    let labels: BTreeSet<u16> = object_mask.iter().copied().filter(|&l| is_object(l)).collect();
    info!(
        "ring analysis over {} labels, dilate={dilate_iterations} erode={erode_iterations}",
        labels.len()
    );

    let mut ring_volume = Array3::<u16>::zeros(object_mask.raw_dim());
    let mut rows = Vec::with_capacity(labels.len());

    for label in labels {
        let seed = object_mask.mapv(|v| v == label);

        let dilated = binary_dilate(&seed, dilate_iterations);
        let eroded = binary_erode(&seed, erode_iterations);

        let mut ring_count = 0usize;
        let mut signal_sum = 0usize;
        Zip::from(&mut ring_volume)
            .and(&dilated)
            .and(&eroded)
            .and(signal_mask)
            .for_each(|out, &d, &e, &sig| {
                if d ^ e {
                    ring_count += 1;
                    signal_sum += sig as usize;
                    // max-wins 合成.
                    *out = (*out).max(label + 1);
                }
            });

        let percent = if ring_count == 0 {
            f64::NAN
        } else {
            signal_sum as f64 / ring_count as f64 * 100.0
        };

        rows.push(LabelRow {
            label,
            final_mask_count: ring_count,
            cyto_image_mask_sum: signal_sum,
            cyto_image_mask_percent: percent,
            accept: Accept::Unset,
        });
    }

    (ring_volume, LabelTable::new(rows))
}
