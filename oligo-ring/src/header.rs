//! 文件级 header: 采集几何 + 分析参数 + 分析结果.
//!
//! header 是固定 schema 的类型化记录, 额外再带一个 `extra` 扩展表
//! 存放从文件名解析出的实验元信息等泛化指标. 持久化为 json 文本;
//! 加载采用 "已知键合并" 语义: 只有 schema 内 (或构造时已存在于
//! `extra` 的) 键会被覆盖, 未知的持久化键被忽略, 缺失的键保持当前值.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{error, warn};
use serde::Serialize;
use serde_json::Value;

use crate::channel::StainChannel;
use crate::consts::{
    DEFAULT_DILATE_ITERATIONS, DEFAULT_ERODE_ITERATIONS, DEFAULT_GAUSSIAN_SIGMA,
    DEFAULT_XY_SCALE_FACTOR,
};
use crate::filename::parse_file_name;

/// 聚合表的固定列集合, 与字段声明顺序一致. `extra` 键排在其后.
const CSV_COLUMNS: [&str; 33] = [
    "file",
    "parentFolder",
    "grandParentFolder",
    "xPixels",
    "yPixels",
    "zPixels",
    "xVoxel",
    "yVoxel",
    "zVoxel",
    "dapiChannel",
    "cytoChannel",
    "dapiMinInt",
    "dapiMaxInt",
    "cytoMinInt",
    "cytoMaxInt",
    "cellpose",
    "numLabels",
    "xyScaleFactor",
    "gaussianSigma",
    "cytoGausSigma",
    "cytoOtsuThreshold",
    "cytoStackPixels",
    "cytoMaskPixels",
    "cytoMaskPercent",
    "dapiGausSigma",
    "dapiOtsuThreshold",
    "dapiStackPixels",
    "dapiMaskPixels",
    "dapiMaskPercent",
    "erodeIterations",
    "dilateIterations",
    "cytoDapiRatio",
    "path",
];

/// 单通道掩膜分析的结果集合, 写入 header 中按通道前缀命名的键.
#[derive(Copy, Clone, Debug)]
pub struct ChannelMaskResult {
    /// 本次分析使用的高斯 sigma.
    pub gaus_sigma: f64,

    /// Otsu 阈值.
    pub otsu_threshold: f64,

    /// 栈内体素总数.
    pub stack_pixels: u64,

    /// 掩膜前景体素数.
    pub mask_pixels: u64,

    /// 前景体素百分比.
    pub mask_percent: f64,
}

/// 逐文件 header.
///
/// 构造时从原始栈 header 与文件路径生成默认值, 随后与已持久化的
/// json (若存在) 合并; 每个分析步骤都会写入自己的结果字段.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    /// 原始文件名.
    pub file: String,

    /// 父目录名.
    pub parent_folder: String,

    /// 祖父目录名.
    pub grand_parent_folder: String,

    /// x 方向像素数.
    pub x_pixels: u64,
    /// y 方向像素数.
    pub y_pixels: u64,
    /// z 方向切片数.
    pub z_pixels: u64,

    /// x 方向体素尺寸 (微米).
    pub x_voxel: f64,
    /// y 方向体素尺寸 (微米).
    pub y_voxel: f64,
    /// z 方向体素尺寸 (微米).
    pub z_voxel: f64,

    /// rgb 栈中细胞核通道所在平面.
    pub dapi_channel: usize,

    /// rgb 栈中信号通道所在平面.
    pub cyto_channel: usize,

    /// 细胞核通道最小强度 (rgb 合成时记录).
    pub dapi_min_int: Option<i64>,
    /// 细胞核通道最大强度.
    pub dapi_max_int: Option<i64>,
    /// 信号通道最小强度.
    pub cyto_min_int: Option<i64>,
    /// 信号通道最大强度.
    pub cyto_max_int: Option<i64>,

    /// 外部分割模型是否已为该文件产出对象掩膜文件.
    pub cellpose: bool,

    /// 对象掩膜中的对象标签个数 (不含背景).
    pub num_labels: Option<u64>,

    /// rgb 合成时 x/y 方向缩放因子.
    pub xy_scale_factor: f64,

    /// 未显式指定 sigma 时掩膜分析采用的默认值.
    pub gaussian_sigma: f64,

    /// 信号通道: 实际使用的 sigma.
    pub cyto_gaus_sigma: Option<f64>,
    /// 信号通道: Otsu 阈值.
    pub cyto_otsu_threshold: Option<f64>,
    /// 信号通道: 体素总数.
    pub cyto_stack_pixels: Option<u64>,
    /// 信号通道: 掩膜前景体素数.
    pub cyto_mask_pixels: Option<u64>,
    /// 信号通道: 前景百分比.
    pub cyto_mask_percent: Option<f64>,

    /// 细胞核通道: 实际使用的 sigma.
    pub dapi_gaus_sigma: Option<f64>,
    /// 细胞核通道: Otsu 阈值.
    pub dapi_otsu_threshold: Option<f64>,
    /// 细胞核通道: 体素总数.
    pub dapi_stack_pixels: Option<u64>,
    /// 细胞核通道: 掩膜前景体素数.
    pub dapi_mask_pixels: Option<u64>,
    /// 细胞核通道: 前景百分比.
    pub dapi_mask_percent: Option<f64>,

    /// 环形掩膜的腐蚀迭代数.
    pub erode_iterations: usize,

    /// 环形掩膜的膨胀迭代数.
    pub dilate_iterations: usize,

    /// 信号/细胞核掩膜百分比之比. 分母为 0 时为 `NaN` (序列化为 null).
    pub cyto_dapi_ratio: Option<f64>,

    /// 原始文件全路径.
    pub path: String,

    /// 泛化扩展表. 构造时填入文件名元信息, 可按需追加指标.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Header {
    /// 以默认分析参数构造.
    ///
    /// `pixels` 与 `voxels` 按 `(x, y, z)` 排列, 分别来自原始栈
    /// header 的 `dim` 与 `pixdim`.
    pub fn new(path: &Path, pixels: (u64, u64, u64), voxels: (f64, f64, f64)) -> Self {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent_folder = dir_name(path, 1);
        let grand_parent_folder = dir_name(path, 2);

        let extra: BTreeMap<String, Value> = parse_file_name(&file)
            .to_extra_entries()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();

        Self {
            file,
            parent_folder,
            grand_parent_folder,
            x_pixels: pixels.0,
            y_pixels: pixels.1,
            z_pixels: pixels.2,
            x_voxel: voxels.0,
            y_voxel: voxels.1,
            z_voxel: voxels.2,
            dapi_channel: StainChannel::Dapi.default_plane(),
            cyto_channel: StainChannel::Cyto.default_plane(),
            dapi_min_int: None,
            dapi_max_int: None,
            cyto_min_int: None,
            cyto_max_int: None,
            cellpose: false,
            num_labels: None,
            xy_scale_factor: DEFAULT_XY_SCALE_FACTOR,
            gaussian_sigma: DEFAULT_GAUSSIAN_SIGMA,
            cyto_gaus_sigma: None,
            cyto_otsu_threshold: None,
            cyto_stack_pixels: None,
            cyto_mask_pixels: None,
            cyto_mask_percent: None,
            dapi_gaus_sigma: None,
            dapi_otsu_threshold: None,
            dapi_stack_pixels: None,
            dapi_mask_pixels: None,
            dapi_mask_percent: None,
            erode_iterations: DEFAULT_ERODE_ITERATIONS,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
            cyto_dapi_ratio: None,
            path: path.to_string_lossy().into_owned(),
            extra,
        }
    }

    /// rgb 栈中 `channel` 所在的平面索引.
    #[inline]
    pub fn channel_plane(&self, channel: StainChannel) -> usize {
        match channel {
            StainChannel::Cyto => self.cyto_channel,
            StainChannel::Dapi => self.dapi_channel,
        }
    }

    /// 记录 `channel` 的强度范围.
    pub fn set_channel_intensity(&mut self, channel: StainChannel, min: i64, max: i64) {
        let (lo, hi) = match channel {
            StainChannel::Cyto => (&mut self.cyto_min_int, &mut self.cyto_max_int),
            StainChannel::Dapi => (&mut self.dapi_min_int, &mut self.dapi_max_int),
        };
        *lo = Some(min);
        *hi = Some(max);
    }

    /// 写入 `channel` 的掩膜分析结果.
    pub fn set_channel_results(&mut self, channel: StainChannel, r: ChannelMaskResult) {
        let (sigma, otsu, stack, mask, percent) = match channel {
            StainChannel::Cyto => (
                &mut self.cyto_gaus_sigma,
                &mut self.cyto_otsu_threshold,
                &mut self.cyto_stack_pixels,
                &mut self.cyto_mask_pixels,
                &mut self.cyto_mask_percent,
            ),
            StainChannel::Dapi => (
                &mut self.dapi_gaus_sigma,
                &mut self.dapi_otsu_threshold,
                &mut self.dapi_stack_pixels,
                &mut self.dapi_mask_pixels,
                &mut self.dapi_mask_percent,
            ),
        };
        *sigma = Some(r.gaus_sigma);
        *otsu = Some(r.otsu_threshold);
        *stack = Some(r.stack_pixels);
        *mask = Some(r.mask_pixels);
        *percent = Some(r.mask_percent);
    }

    /// 读取 `channel` 的掩膜前景百分比.
    #[inline]
    pub fn channel_mask_percent(&self, channel: StainChannel) -> Option<f64> {
        match channel {
            StainChannel::Cyto => self.cyto_mask_percent,
            StainChannel::Dapi => self.dapi_mask_percent,
        }
    }

    /// 持久化为 json 文本.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// 与已持久化的 json 文本合并.
    ///
    /// 只有 schema 内的键与构造时已存在于 `extra` 的键会被覆盖;
    /// json 残缺时记录错误日志, 所有字段保持当前值.
    pub fn merge_from_json(&mut self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                error!("malformed header json, keeping defaults: {e}");
                return;
            }
        };
        let Some(obj) = value.as_object() else {
            error!("header json is not an object, keeping defaults");
            return;
        };

        // 字段类型不符按残缺处理: 告警并保持当前值.
        macro_rules! merge {
            ($key:literal, $field:expr, $extract:expr) => {
                if let Some(v) = obj.get($key) {
                    match $extract(v) {
                        Some(x) => $field = x,
                        None => warn!("header key `{}` has unexpected type, ignored", $key),
                    }
                }
            };
        }

        let as_string = |v: &Value| v.as_str().map(str::to_owned);
        let as_u64 = Value::as_u64;
        let as_f64 = Value::as_f64;
        let as_usize = |v: &Value| v.as_u64().map(|x| x as usize);
        let as_bool = Value::as_bool;
        let as_opt_i64 = |v: &Value| {
            if v.is_null() {
                Some(None)
            } else {
                v.as_i64().map(Some)
            }
        };
        let as_opt_u64 = |v: &Value| {
            if v.is_null() {
                Some(None)
            } else {
                v.as_u64().map(Some)
            }
        };
        let as_opt_f64 = |v: &Value| {
            if v.is_null() {
                Some(None)
            } else {
                v.as_f64().map(Some)
            }
        };

        merge!("file", self.file, as_string);
        merge!("parentFolder", self.parent_folder, as_string);
        merge!("grandParentFolder", self.grand_parent_folder, as_string);
        merge!("xPixels", self.x_pixels, as_u64);
        merge!("yPixels", self.y_pixels, as_u64);
        merge!("zPixels", self.z_pixels, as_u64);
        merge!("xVoxel", self.x_voxel, as_f64);
        merge!("yVoxel", self.y_voxel, as_f64);
        merge!("zVoxel", self.z_voxel, as_f64);
        merge!("dapiChannel", self.dapi_channel, as_usize);
        merge!("cytoChannel", self.cyto_channel, as_usize);
        merge!("dapiMinInt", self.dapi_min_int, as_opt_i64);
        merge!("dapiMaxInt", self.dapi_max_int, as_opt_i64);
        merge!("cytoMinInt", self.cyto_min_int, as_opt_i64);
        merge!("cytoMaxInt", self.cyto_max_int, as_opt_i64);
        merge!("cellpose", self.cellpose, as_bool);
        merge!("numLabels", self.num_labels, as_opt_u64);
        merge!("xyScaleFactor", self.xy_scale_factor, as_f64);
        merge!("gaussianSigma", self.gaussian_sigma, as_f64);
        merge!("cytoGausSigma", self.cyto_gaus_sigma, as_opt_f64);
        merge!("cytoOtsuThreshold", self.cyto_otsu_threshold, as_opt_f64);
        merge!("cytoStackPixels", self.cyto_stack_pixels, as_opt_u64);
        merge!("cytoMaskPixels", self.cyto_mask_pixels, as_opt_u64);
        merge!("cytoMaskPercent", self.cyto_mask_percent, as_opt_f64);
        merge!("dapiGausSigma", self.dapi_gaus_sigma, as_opt_f64);
        merge!("dapiOtsuThreshold", self.dapi_otsu_threshold, as_opt_f64);
        merge!("dapiStackPixels", self.dapi_stack_pixels, as_opt_u64);
        merge!("dapiMaskPixels", self.dapi_mask_pixels, as_opt_u64);
        merge!("dapiMaskPercent", self.dapi_mask_percent, as_opt_f64);
        merge!("erodeIterations", self.erode_iterations, as_usize);
        merge!("dilateIterations", self.dilate_iterations, as_usize);
        merge!("cytoDapiRatio", self.cyto_dapi_ratio, as_opt_f64);
        merge!("path", self.path, as_string);

        // extra 表中只合并构造时已有的键.
        for (key, slot) in self.extra.iter_mut() {
            if let Some(v) = obj.get(key) {
                *slot = v.clone();
            }
        }
    }

    /// 聚合表列名: 固定列 + `extra` 键 (字典序).
    pub fn csv_columns(&self) -> Vec<String> {
        CSV_COLUMNS
            .iter()
            .map(|&c| c.to_owned())
            .chain(self.extra.keys().cloned())
            .collect()
    }

    /// 按 [`Self::csv_columns`] 的顺序渲染一行. 空值渲染为空单元格.
    pub fn csv_row(&self) -> Vec<String> {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(T::to_string).unwrap_or_default()
        }
        fn value_cell(v: &Value) -> String {
            match v {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        }

        let mut row = vec![
            self.file.clone(),
            self.parent_folder.clone(),
            self.grand_parent_folder.clone(),
            self.x_pixels.to_string(),
            self.y_pixels.to_string(),
            self.z_pixels.to_string(),
            self.x_voxel.to_string(),
            self.y_voxel.to_string(),
            self.z_voxel.to_string(),
            self.dapi_channel.to_string(),
            self.cyto_channel.to_string(),
            opt(&self.dapi_min_int),
            opt(&self.dapi_max_int),
            opt(&self.cyto_min_int),
            opt(&self.cyto_max_int),
            self.cellpose.to_string(),
            opt(&self.num_labels),
            self.xy_scale_factor.to_string(),
            self.gaussian_sigma.to_string(),
            opt(&self.cyto_gaus_sigma),
            opt(&self.cyto_otsu_threshold),
            opt(&self.cyto_stack_pixels),
            opt(&self.cyto_mask_pixels),
            opt(&self.cyto_mask_percent),
            opt(&self.dapi_gaus_sigma),
            opt(&self.dapi_otsu_threshold),
            opt(&self.dapi_stack_pixels),
            opt(&self.dapi_mask_pixels),
            opt(&self.dapi_mask_percent),
            self.erode_iterations.to_string(),
            self.dilate_iterations.to_string(),
            opt(&self.cyto_dapi_ratio),
            self.path.clone(),
        ];
        row.extend(self.extra.values().map(value_cell));
        debug_assert_eq!(row.len(), self.csv_columns().len());
        row
    }
}

/// `path` 向上第 `level` 级目录的名字. 不存在时为空串.
fn dir_name(path: &Path, level: usize) -> String {
    let mut cur = path;
    for _ in 0..level {
        match cur.parent() {
            Some(p) => cur = p,
            None => return String::new(),
        }
    }
    cur.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::Header;
    use crate::channel::StainChannel;
    use crate::header::ChannelMaskResult;
    use std::path::Path;

    fn sample_header() -> Header {
        Header::new(
            Path::new("/data/20221010/FST/B35_Slice2_RS_DS1.nii"),
            (784, 784, 21),
            (0.25, 0.25, 1.0),
        )
    }

    /// 构造时几何字段与目录字段就位, 文件名元信息进入 extra.
    #[test]
    fn test_new_defaults() {
        let h = sample_header();
        assert_eq!(h.file, "B35_Slice2_RS_DS1.nii");
        assert_eq!(h.parent_folder, "FST");
        assert_eq!(h.grand_parent_folder, "20221010");
        assert_eq!((h.x_pixels, h.y_pixels, h.z_pixels), (784, 784, 21));
        assert_eq!(h.dapi_channel, 1);
        assert_eq!(h.cyto_channel, 0);
        assert_eq!(h.erode_iterations, 2);
        assert_eq!(h.dilate_iterations, 2);
        assert!(!h.cellpose);
        assert_eq!(
            h.extra.get("animalID").and_then(|v| v.as_str()),
            Some("B35")
        );
    }

    /// 保存再合并可复原所有非默认字段.
    #[test]
    fn test_json_round_trip() {
        let mut h = sample_header();
        h.cellpose = true;
        h.num_labels = Some(42);
        h.set_channel_intensity(StainChannel::Dapi, 3, 250);
        h.set_channel_results(
            StainChannel::Cyto,
            ChannelMaskResult {
                gaus_sigma: 0.7,
                otsu_threshold: 17.25,
                stack_pixels: 1000,
                mask_pixels: 120,
                mask_percent: 12.0,
            },
        );

        let text = serde_json::to_string_pretty(&h).unwrap();
        let mut fresh = sample_header();
        fresh.merge_from_json(&text);

        assert!(fresh.cellpose);
        assert_eq!(fresh.num_labels, Some(42));
        assert_eq!(fresh.dapi_min_int, Some(3));
        assert_eq!(fresh.dapi_max_int, Some(250));
        assert_eq!(fresh.cyto_gaus_sigma, Some(0.7));
        assert_eq!(fresh.cyto_otsu_threshold, Some(17.25));
        assert_eq!(fresh.cyto_mask_percent, Some(12.0));
    }

    /// 未知键被忽略, 缺失键保持当前值, 类型不符不覆盖.
    #[test]
    fn test_merge_semantics() {
        let mut h = sample_header();
        h.num_labels = Some(7);
        h.merge_from_json(
            r#"{ "bogusKey": 1, "gaussianSigma": 2.5, "erodeIterations": "three" }"#,
        );

        assert_eq!(h.gaussian_sigma, 2.5);
        // 类型不符: 保持默认.
        assert_eq!(h.erode_iterations, 2);
        // 未提及: 保持当前值.
        assert_eq!(h.num_labels, Some(7));
        assert!(!h.extra.contains_key("bogusKey"));
    }

    /// 残缺 json 不 panic, 全部字段保持当前值.
    #[test]
    fn test_merge_malformed_json() {
        let mut h = sample_header();
        h.merge_from_json("{ not json");
        assert_eq!(h.gaussian_sigma, 1.0);
    }

    /// NaN 比率序列化为 null, 合并后保持 None.
    #[test]
    fn test_nan_serializes_as_null() {
        let mut h = sample_header();
        h.cyto_dapi_ratio = Some(f64::NAN);
        let text = serde_json::to_string(&h).unwrap();
        assert!(text.contains(r#""cytoDapiRatio":null"#));

        let mut fresh = sample_header();
        fresh.cyto_dapi_ratio = Some(1.0);
        fresh.merge_from_json(&text);
        assert_eq!(fresh.cyto_dapi_ratio, None);
    }

    /// 行与列的长度一致, extra 列紧随固定列.
    #[test]
    fn test_csv_shape() {
        let h = sample_header();
        let cols = h.csv_columns();
        let row = h.csv_row();
        assert_eq!(cols.len(), row.len());
        assert_eq!(cols[0], "file");
        assert!(cols.contains(&"animalID".to_owned()));
        assert_eq!(row[0], "B35_Slice2_RS_DS1.nii");
    }
}
