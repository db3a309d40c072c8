//! 逐标签统计表.
//!
//! 每行对应对象掩膜中的一个标签, 记录环形掩膜像素数与信号占比,
//! 以及用户标注的接受标志. 该表以 csv 文本持久化.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::error;

/// csv 文件首行.
const CSV_HEADER: &str = "label,finalMaskCount,cytoImageMaskSum,cytoImageMaskPercent,accept";

/// 用户对单个标签的接受标注. 新建行默认为未标注.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Accept {
    /// 尚未人工审查.
    #[default]
    Unset,

    /// 接受.
    Yes,

    /// 拒绝.
    No,
}

impl fmt::Display for Accept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unset => "",
            Self::Yes => "Yes",
            Self::No => "No",
        })
    }
}

impl FromStr for Accept {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "" => Ok(Self::Unset),
            "Yes" => Ok(Self::Yes),
            "No" => Ok(Self::No),
            _ => Err(()),
        }
    }
}

/// 单个标签的环形掩膜统计行.
#[derive(Clone, Debug)]
pub struct LabelRow {
    /// 对象掩膜中的标签值.
    pub label: u16,

    /// 环形掩膜体素数.
    pub final_mask_count: usize,

    /// 信号通道掩膜与环形掩膜重叠的体素数.
    pub cyto_image_mask_sum: usize,

    /// 重叠占环形掩膜的百分比. 环为空时为 `NaN`.
    pub cyto_image_mask_percent: f64,

    /// 人工接受标志.
    pub accept: Accept,
}

impl LabelRow {
    /// 按 [`LabelTable::columns`] 的顺序渲染单元格.
    pub fn cells(&self) -> [String; 5] {
        [
            self.label.to_string(),
            self.final_mask_count.to_string(),
            self.cyto_image_mask_sum.to_string(),
            self.cyto_image_mask_percent.to_string(),
            self.accept.to_string(),
        ]
    }
}

/// 逐标签统计表.
///
/// # 注意
///
/// 该表每次环形分析都会从头重建, 不会与旧表合并;
/// 先前的人工 `accept` 标注需要调用方在覆盖持久化之前按标签值重放.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    rows: Vec<LabelRow>,
}

impl LabelTable {
    /// 从统计行构造.
    #[inline]
    pub fn new(rows: Vec<LabelRow>) -> Self {
        Self { rows }
    }

    /// 本表的列名集合, 与 csv 首行一致.
    pub fn columns() -> [&'static str; 5] {
        [
            "label",
            "finalMaskCount",
            "cytoImageMaskSum",
            "cytoImageMaskPercent",
            "accept",
        ]
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否为空表.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 全部行.
    #[inline]
    pub fn rows(&self) -> &[LabelRow] {
        &self.rows
    }

    /// 按标签值查找行.
    pub fn row_by_label(&self, label: u16) -> Option<&LabelRow> {
        self.rows.iter().find(|r| r.label == label)
    }

    /// 按 **标签值** (而不是行号) 设置接受标志.
    ///
    /// # 返回值
    ///
    /// 标签存在则返回 `true`.
    pub fn set_accept(&mut self, label: u16, accept: Accept) -> bool {
        match self.rows.iter_mut().find(|r| r.label == label) {
            Some(row) => {
                row.accept = accept;
                true
            }
            None => false,
        }
    }

    /// 将旧表中的接受标注按标签值重放到本表. 本表中不存在的标签被忽略.
    pub fn replay_accepts(&mut self, old: &LabelTable) {
        for row in old.rows().iter().filter(|r| r.accept != Accept::Unset) {
            self.set_accept(row.label, row.accept);
        }
    }

    /// 保存为 csv 文本.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut text = String::from(CSV_HEADER);
        text.push('\n');
        for r in &self.rows {
            text.push_str(&format!(
                "{},{},{},{},{}\n",
                r.label, r.final_mask_count, r.cyto_image_mask_sum, r.cyto_image_mask_percent, r.accept,
            ));
        }
        fs::write(path, text)
    }

    /// 从 csv 文本加载. 无法解析的行记录错误日志并跳过.
    pub fn load<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let mut rows = Vec::new();
        for line in text.lines().skip(1).filter(|l| !l.trim().is_empty()) {
            match parse_row(line) {
                Some(row) => rows.push(row),
                None => error!("malformed label row in {}: {line}", path.as_ref().display()),
            }
        }
        Ok(Self { rows })
    }
}

/// 解析单行 csv. 列数或字段格式不符时返回 `None`.
fn parse_row(line: &str) -> Option<LabelRow> {
    let mut cols = line.split(',');
    let label = cols.next()?.parse().ok()?;
    let final_mask_count = cols.next()?.parse().ok()?;
    let cyto_image_mask_sum = cols.next()?.parse().ok()?;
    let cyto_image_mask_percent = cols.next()?.parse().ok()?;
    let accept = cols.next()?.parse().ok()?;
    if cols.next().is_some() {
        return None;
    }
    Some(LabelRow {
        label,
        final_mask_count,
        cyto_image_mask_sum,
        cyto_image_mask_percent,
        accept,
    })
}

#[cfg(test)]
mod tests {
    use super::{Accept, LabelRow, LabelTable};

    fn sample_table() -> LabelTable {
        LabelTable::new(vec![
            LabelRow {
                label: 1,
                final_mask_count: 120,
                cyto_image_mask_sum: 40,
                cyto_image_mask_percent: 100.0 * 40.0 / 120.0,
                accept: Accept::Unset,
            },
            LabelRow {
                label: 3,
                final_mask_count: 0,
                cyto_image_mask_sum: 0,
                cyto_image_mask_percent: f64::NAN,
                accept: Accept::Yes,
            },
            LabelRow {
                label: 7,
                final_mask_count: 55,
                cyto_image_mask_sum: 0,
                cyto_image_mask_percent: 0.0,
                accept: Accept::No,
            },
        ])
    }

    /// 行数/标签值/接受标志在保存-加载后精确保持.
    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");

        let table = sample_table();
        table.save(&path).unwrap();
        let loaded = LabelTable::load(&path).unwrap();

        assert_eq!(loaded.len(), table.len());
        for (a, b) in table.rows().iter().zip(loaded.rows()) {
            assert_eq!(a.label, b.label);
            assert_eq!(a.final_mask_count, b.final_mask_count);
            assert_eq!(a.cyto_image_mask_sum, b.cyto_image_mask_sum);
            assert_eq!(a.accept, b.accept);
            // NaN 无法用 == 比较.
            assert_eq!(
                a.cyto_image_mask_percent.is_nan(),
                b.cyto_image_mask_percent.is_nan()
            );
        }
    }

    /// 接受标志按标签值寻址, 与行位置无关.
    #[test]
    fn test_set_accept_by_label() {
        let mut table = sample_table();
        assert!(table.set_accept(7, Accept::Yes));
        assert_eq!(table.row_by_label(7).unwrap().accept, Accept::Yes);
        assert_eq!(table.rows()[0].accept, Accept::Unset);

        assert!(!table.set_accept(42, Accept::Yes));
    }

    /// 旧表标注可以重放到重建后的新表.
    #[test]
    fn test_replay_accepts() {
        let old = sample_table();
        let mut fresh = LabelTable::new(
            old.rows()
                .iter()
                .map(|r| LabelRow {
                    accept: Accept::Unset,
                    ..r.clone()
                })
                .collect(),
        );
        fresh.replay_accepts(&old);
        assert_eq!(fresh.row_by_label(3).unwrap().accept, Accept::Yes);
        assert_eq!(fresh.row_by_label(7).unwrap().accept, Accept::No);
        assert_eq!(fresh.row_by_label(1).unwrap().accept, Accept::Unset);
    }

    /// 残缺行被跳过而不是使加载失败.
    #[test]
    fn test_malformed_row_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(
            &path,
            "label,finalMaskCount,cytoImageMaskSum,cytoImageMaskPercent,accept\n\
             1,10,5,50,\nnot,a,row\n2,20,10,50,Yes\n",
        )
        .unwrap();
        let loaded = LabelTable::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.rows()[1].label, 2);
    }
}
