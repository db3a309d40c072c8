//! 文件夹级分析集合与结果聚合.
//!
//! 一个文件夹对应一次采集批次: 递归枚举其中全部原始 nii 文件
//! (产物目录被排除), 逐文件构造 [`OligoAnalysis`].
//! 聚合有两种行粒度: 每文件一行的 header 总表 (批处理主 csv 所用),
//! 以及逐标签明细 (每行由标签统计列与该文件的 header 列拼接而成).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};

use crate::analysis::OligoAnalysis;
use crate::consts::{is_raw_file_name, ANALYSIS_DIR_SUFFIX};
use crate::labels::LabelTable;
use crate::Result;

/// 文件夹级聚合表, 行粒度取决于构造方式 (逐文件 header 或逐标签).
///
/// 列集合由第一个参与聚合的文件决定, 之后列不一致的块会被拒绝.
#[derive(Clone, Debug, Default)]
pub struct AggregateTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl AggregateTable {
    /// 构造空表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 从单个分析实体构造: 每个标签一行, 标签列在前, header 列在后.
    ///
    /// 未分析 (标签表为空) 的文件产出零行, 但列集合仍然就位.
    pub fn from_analysis(oa: &OligoAnalysis) -> Self {
        let mut columns: Vec<String> = LabelTable::columns()
            .iter()
            .map(|&c| c.to_owned())
            .collect();
        columns.extend(oa.header().csv_columns());

        let header_cells = oa.header().csv_row();
        let rows = oa
            .label_table()
            .rows()
            .iter()
            .map(|r| {
                let mut row: Vec<String> = r.cells().into();
                row.extend(header_cells.iter().cloned());
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// 列名集合.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// 数据行.
    #[inline]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// 数据行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否无数据行.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 将另一块聚合表拼接到本表尾部.
    ///
    /// 本表尚无列集合时直接采纳对方的; 列不一致时记录错误日志并丢弃对方.
    pub fn append(&mut self, other: AggregateTable) {
        if self.columns.is_empty() {
            *self = other;
            return;
        }
        if other.columns.is_empty() {
            return;
        }
        if self.columns != other.columns {
            error!(
                "aggregate column mismatch ({} vs {} columns), block dropped",
                self.columns.len(),
                other.columns.len()
            );
            return;
        }
        self.rows.extend(other.rows);
    }

    /// 渲染为 csv 文本.
    pub fn to_csv_string(&self) -> String {
        let mut text = self.columns.join(",");
        text.push('\n');
        for row in &self.rows {
            text.push_str(&row.join(","));
            text.push('\n');
        }
        text
    }

    /// 保存为 csv 文件.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_csv_string())?;
        Ok(())
    }
}

/// 单个采集文件夹的分析集合.
#[derive(Debug)]
pub struct OligoAnalysisFolder {
    folder: PathBuf,
    analyses: BTreeMap<PathBuf, OligoAnalysis>,
}

impl OligoAnalysisFolder {
    /// 打开 `folder` 下的全部原始文件.
    ///
    /// # 注意
    ///
    /// 1. 枚举是递归的, 但以 `-analysis` 结尾的产物目录被整体排除.
    /// 2. 单文件打开失败记录错误日志并跳过, 不使整个文件夹失败.
    /// 3. 未找到任何原始文件不是错误, 只记录警告.
    pub fn open<P: AsRef<Path>>(folder: P) -> Result<Self> {
        let folder = folder.as_ref().to_owned();
        let mut paths = Vec::new();
        collect_raw_files(&folder, &mut paths)?;
        paths.sort();

        let mut analyses = BTreeMap::new();
        for path in paths {
            match OligoAnalysis::open(&path) {
                Ok(oa) => {
                    analyses.insert(path, oa);
                }
                Err(e) => error!("skipping {}: {e}", path.display()),
            }
        }

        if analyses.is_empty() {
            warn!("no raw files found under {}", folder.display());
        } else {
            info!(
                "{}: {} raw file(s) enumerated",
                folder.display(),
                analyses.len()
            );
        }
        Ok(Self { folder, analyses })
    }

    /// 文件夹路径.
    #[inline]
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// 文件个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.analyses.len()
    }

    /// 是否为空集合.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.analyses.is_empty()
    }

    /// 全部原始文件路径 (字典序).
    pub fn paths(&self) -> Vec<&Path> {
        self.analyses.keys().map(PathBuf::as_path).collect()
    }

    /// 按原始文件路径查找分析实体. 不存在时记录错误日志.
    pub fn get<P: AsRef<Path>>(&self, path: P) -> Option<&OligoAnalysis> {
        let path = path.as_ref();
        let found = self.analyses.get(path);
        if found.is_none() {
            error!("{} is not part of this folder", path.display());
        }
        found
    }

    /// 按原始文件路径查找分析实体的可变引用. 不存在时记录错误日志.
    pub fn get_mut<P: AsRef<Path>>(&mut self, path: P) -> Option<&mut OligoAnalysis> {
        let path = path.as_ref();
        let found = self.analyses.get_mut(path);
        if found.is_none() {
            error!("{} is not part of this folder", path.display());
        }
        found
    }

    /// 遍历全部分析实体 (按路径字典序).
    pub fn iter(&self) -> impl Iterator<Item = &OligoAnalysis> {
        self.analyses.values()
    }

    /// 遍历全部分析实体的可变引用 (按路径字典序).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut OligoAnalysis> {
        self.analyses.values_mut()
    }

    /// 每文件一行的 header 总表, 反映各实体的 **当前** 内存状态.
    /// 批处理主 csv 以此为行粒度.
    pub fn header_table(&self) -> AggregateTable {
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        for oa in self.analyses.values() {
            if columns.is_empty() {
                columns = oa.header().csv_columns();
            }
            rows.push(oa.header().csv_row());
        }
        AggregateTable { columns, rows }
    }

    /// 聚合本文件夹全部文件的逐标签结果.
    pub fn aggregate(&self) -> AggregateTable {
        let mut table = AggregateTable::new();
        for oa in self.analyses.values() {
            table.append(AggregateTable::from_analysis(oa));
        }
        table
    }
}

/// 递归收集 `dir` 下的原始文件路径. 产物目录被整体排除.
fn collect_raw_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if path.is_dir() {
            if name.ends_with(ANALYSIS_DIR_SUFFIX) {
                continue;
            }
            collect_raw_files(&path, out)?;
        } else if is_raw_file_name(&name) {
            out.push(path);
        }
    }
    Ok(())
}
