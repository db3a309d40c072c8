//! 逐文件分析生命周期: 打开 -> 加载 -> 分析 -> 保存 -> 卸载.
//!
//! 打开只读取 nii header 与已持久化的轻量产物 (header json 与标签表),
//! 体数据按需加载. 每个重型派生产物 (rgb 栈, 掩膜, 环形掩膜)
//! 都配有参数溯源 sidecar (`*.prov.json`); `ensure_*`
//! 接口先以参数匹配决定能否复用磁盘缓存, 不匹配才重新计算.
//!
//! # 注意
//!
//! 1. 对象掩膜 (`*_seg.npy`) 由外部分割模型产出, 位于原始文件旁.
//!   它缺失时环形分析以 `Ok(false)` 软失败, 不中断批处理.
//! 2. [`OligoAnalysis::save`] 只持久化当前驻留内存的产物.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::channel::StainChannel;
use crate::consts::{raw_file_stem, ANALYSIS_DIR_SUFFIX, BASE_STUB_SUFFIX};
use crate::error::OligoError;
use crate::header::{ChannelMaskResult, Header};
use crate::labels::LabelTable;
use crate::stack::{RawStack, RgbStack};
use crate::{filter, preview, ring, Result};

/// header json 产物后缀.
const SUFFIX_HEADER: &str = "-header.json";

/// 标签表产物后缀.
const SUFFIX_LABELS: &str = "-labels.csv";

/// 环形掩膜产物后缀.
const SUFFIX_RING: &str = "-dapi-final-mask.npy";

/// 预览图产物后缀.
const SUFFIX_PREVIEW: &str = "-preview.png";

/// 外部分割模型输出的对象掩膜后缀 (位于原始文件旁).
const SEG_SUFFIX: &str = "_seg.npy";

/// 派生产物的参数溯源记录, 以 `*.prov.json` sidecar 持久化.
///
/// 各产物只填与自己相关的字段. 任一字段不匹配即视为缓存过期.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    xy_scale_factor: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    gaussian_sigma: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    dilate_iterations: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    erode_iterations: Option<usize>,
}

impl Provenance {
    /// sidecar 路径: 在产物文件名后替换扩展名为 `prov.json`.
    fn side_path(artifact: &Path) -> PathBuf {
        artifact.with_extension("prov.json")
    }

    /// 将本记录写到 `artifact` 旁.
    fn save(&self, artifact: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(Self::side_path(artifact), text)?;
        Ok(())
    }

    /// 判断 `artifact` 及其 sidecar 是否存在且与本记录一致.
    ///
    /// sidecar 缺失或残缺一律视为不一致.
    fn matches(&self, artifact: &Path) -> bool {
        if !artifact.is_file() {
            return false;
        }
        let side = Self::side_path(artifact);
        let text = match fs::read_to_string(&side) {
            Ok(t) => t,
            Err(_) => return false,
        };
        match serde_json::from_str::<Provenance>(&text) {
            Ok(on_disk) => on_disk == *self,
            Err(e) => {
                warn!("malformed provenance sidecar {}: {e}", side.display());
                false
            }
        }
    }
}

/// 单个原始文件的分析实体.
///
/// 打开即可查询 header 与标签表; 体数据与派生产物全部延迟加载,
/// 用毕可 [`unload`](Self::unload) 释放而不丢失已持久化的状态.
#[derive(Debug)]
pub struct OligoAnalysis {
    path: PathBuf,
    header: Header,
    label_table: LabelTable,

    rgb: Option<RgbStack>,
    cyto_filtered: Option<Array3<f32>>,
    cyto_mask: Option<Array3<bool>>,
    dapi_filtered: Option<Array3<f32>>,
    dapi_mask: Option<Array3<bool>>,
    ring: Option<Array3<u16>>,
}

impl OligoAnalysis {
    /// 打开单个原始文件.
    ///
    /// 只读取 nii header 构造默认 header, 随后与已持久化的
    /// header json 合并, 并加载已持久化的标签表 (若存在).
    /// 对象掩膜文件是否存在会即时刷新 `cellpose` 标志.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let nifti_header = RawStack::header_only(&path)?;

        let [_, w, h, z, ..] = nifti_header.dim;
        let [_, vw, vh, vz, ..] = nifti_header.pixdim;
        let header = Header::new(
            &path,
            (w as u64, h as u64, z as u64),
            (vw as f64, vh as f64, vz as f64),
        );

        let mut me = Self {
            path,
            header,
            label_table: LabelTable::new(Vec::new()),
            rgb: None,
            cyto_filtered: None,
            cyto_mask: None,
            dapi_filtered: None,
            dapi_mask: None,
            ring: None,
        };

        let header_path = me.artifact_path(SUFFIX_HEADER);
        if header_path.is_file() {
            let text = fs::read_to_string(&header_path)?;
            me.header.merge_from_json(&text);
        }

        let labels_path = me.artifact_path(SUFFIX_LABELS);
        if labels_path.is_file() {
            me.label_table = LabelTable::load(&labels_path)?;
        }

        me.header.cellpose = me.seg_mask_path().is_file();
        info!("opened {} ({} labels)", me.header.file, me.label_table.len());
        Ok(me)
    }

    /// 原始文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 逐文件 header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// 逐文件 header 的可变引用.
    #[inline]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// 标签表.
    #[inline]
    pub fn label_table(&self) -> &LabelTable {
        &self.label_table
    }

    /// 标签表的可变引用.
    #[inline]
    pub fn label_table_mut(&mut self) -> &mut LabelTable {
        &mut self.label_table
    }

    /// rgb 栈是否驻留内存.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.rgb.is_some()
    }

    /// 环形掩膜是否已产出 (驻留内存或已持久化).
    #[inline]
    pub fn is_analyzed(&self) -> bool {
        self.ring.is_some() || self.artifact_path(SUFFIX_RING).is_file()
    }

    /// 环形掩膜 (若驻留内存).
    #[inline]
    pub fn ring_mask(&self) -> Option<&Array3<u16>> {
        self.ring.as_ref()
    }

    /// 产物目录: `<父目录>/<父目录名>-analysis/<文件名>/`.
    pub fn save_folder(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let parent_name = parent
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        parent
            .join(format!("{parent_name}{ANALYSIS_DIR_SUFFIX}"))
            .join(file_name)
    }

    /// 产物文件名公共主干: `<原始文件 stem>-rgb-small`.
    fn base_stub(&self) -> String {
        format!("{}{}", raw_file_stem(&self.header.file), BASE_STUB_SUFFIX)
    }

    /// 产物目录下后缀为 `suffix` 的产物路径.
    fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.save_folder().join(format!("{}{suffix}", self.base_stub()))
    }

    /// 对象掩膜路径: 与原始文件同目录的 `<stem>_seg.npy`.
    pub fn seg_mask_path(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let stem = raw_file_stem(&self.header.file).to_owned();
        parent.join(format!("{stem}{SEG_SUFFIX}"))
    }

    /// rgb 栈产物路径 (无额外后缀, 仅 `.npy`).
    fn rgb_path(&self) -> PathBuf {
        self.artifact_path(".npy")
    }

    /// `channel` 的二值掩膜产物路径.
    fn mask_path(&self, channel: StainChannel) -> PathBuf {
        self.artifact_path(&format!("-mask-{}.npy", channel.key_prefix()))
    }

    /// `channel` 的模糊结果产物路径.
    fn filtered_path(&self, channel: StainChannel) -> PathBuf {
        self.artifact_path(&format!("-filtered-{}.npy", channel.key_prefix()))
    }

    /// 确保 rgb 栈驻留内存.
    ///
    /// 优先级: 内存 -> 参数匹配的磁盘缓存 -> 从原始文件重新合成.
    /// `force` 为真时跳过前两级.
    pub fn ensure_rgb_stack(&mut self, force: bool) -> Result<()> {
        if !force && self.rgb.is_some() {
            return Ok(());
        }

        let prov = Provenance {
            xy_scale_factor: Some(self.header.xy_scale_factor),
            ..Provenance::default()
        };
        let rgb_path = self.rgb_path();
        if !force && prov.matches(&rgb_path) {
            self.rgb = Some(RgbStack::load(&rgb_path)?);
            info!("{}: rgb stack loaded from cache", self.header.file);
            return Ok(());
        }

        let raw = RawStack::open(&self.path)?;
        for channel in StainChannel::BOTH {
            let (lo, hi) = raw.plane_min_max(self.header.channel_plane(channel));
            self.header
                .set_channel_intensity(channel, lo as i64, hi as i64);
        }
        self.rgb = Some(RgbStack::compose(
            &raw,
            self.header.cyto_channel,
            self.header.dapi_channel,
            self.header.xy_scale_factor,
        ));
        info!("{}: rgb stack composed from raw", self.header.file);
        Ok(())
    }

    /// 确保 `channel` 的模糊结果与二值掩膜驻留内存.
    ///
    /// `sigma` 缺省时使用 header 的 `gaussianSigma`. 磁盘缓存只在
    /// sigma 与溯源记录一致时复用; 重新计算会刷新 header
    /// 中该通道的全部结果字段.
    pub fn ensure_masks(&mut self, channel: StainChannel, sigma: Option<f64>) -> Result<()> {
        let sigma = sigma.unwrap_or(self.header.gaussian_sigma);

        let in_memory = match channel {
            StainChannel::Cyto => self.cyto_mask.is_some(),
            StainChannel::Dapi => self.dapi_mask.is_some(),
        };
        let recorded = self.header_channel_sigma(channel);
        if in_memory && recorded == Some(sigma) {
            return Ok(());
        }

        let prov = Provenance {
            gaussian_sigma: Some(sigma),
            ..Provenance::default()
        };
        let mask_path = self.mask_path(channel);
        let filtered_path = self.filtered_path(channel);
        if prov.matches(&mask_path) && prov.matches(&filtered_path) {
            let mask: Array3<bool> = ndarray_npy::read_npy(&mask_path)?;
            let filtered: Array3<f32> = ndarray_npy::read_npy(&filtered_path)?;
            self.store_channel(channel, filtered, mask);
            info!("{}: {channel} mask loaded from cache", self.header.file);
            return Ok(());
        }

        self.ensure_rgb_stack(false)?;
        let (otsu, filtered, mask) = {
            // `ensure_rgb_stack` 成功后 rgb 必然驻留.
            let rgb = self.rgb.as_ref().ok_or_else(|| {
                OligoError::Io(std::io::Error::other("rgb stack missing after ensure"))
            })?;
            let plane = rgb.plane(self.header.channel_plane(channel));
            filter::blur_and_threshold(plane, sigma)
        };

        let stack_pixels = mask.len() as u64;
        let mask_pixels = mask.iter().filter(|&&m| m).count() as u64;
        let mask_percent = if stack_pixels == 0 {
            f64::NAN
        } else {
            mask_pixels as f64 / stack_pixels as f64 * 100.0
        };
        self.header.set_channel_results(
            channel,
            ChannelMaskResult {
                gaus_sigma: sigma,
                otsu_threshold: otsu as f64,
                stack_pixels,
                mask_pixels,
                mask_percent,
            },
        );
        self.store_channel(channel, filtered, mask);
        info!(
            "{}: {channel} mask computed (sigma={sigma}, otsu={otsu})",
            self.header.file
        );
        Ok(())
    }

    /// 确保环形掩膜与标签表就绪.
    ///
    /// 迭代数缺省时取 header 当前值. 返回 `Ok(false)` 表示对象掩膜
    /// 缺失 (软失败, `cellpose` 标志被清除); `Ok(true)` 表示环形掩膜
    /// 驻留内存且标签表与之同步.
    ///
    /// # 注意
    ///
    /// 标签表每次都从头重建; 旧表中人工标记的 accept
    /// 状态按标签号重放到新表.
    pub fn ensure_ring(
        &mut self,
        dilate_iterations: Option<usize>,
        erode_iterations: Option<usize>,
    ) -> Result<bool> {
        let seg_path = self.seg_mask_path();
        if !seg_path.is_file() {
            warn!(
                "{}: object mask {} not found, skipping ring analysis",
                self.header.file,
                seg_path.display()
            );
            self.header.cellpose = false;
            return Ok(false);
        }
        self.header.cellpose = true;

        let dilate = dilate_iterations.unwrap_or(self.header.dilate_iterations);
        let erode = erode_iterations.unwrap_or(self.header.erode_iterations);

        // 驻留内存的环形掩膜与 header 记录的参数同源.
        if self.ring.is_some()
            && (self.header.dilate_iterations, self.header.erode_iterations) == (dilate, erode)
        {
            return Ok(true);
        }
        self.header.dilate_iterations = dilate;
        self.header.erode_iterations = erode;

        let prov = Provenance {
            dilate_iterations: Some(dilate),
            erode_iterations: Some(erode),
            ..Provenance::default()
        };
        let ring_path = self.artifact_path(SUFFIX_RING);
        if prov.matches(&ring_path) && !self.label_table.is_empty() {
            self.ring = Some(ndarray_npy::read_npy(&ring_path)?);
            info!("{}: ring mask loaded from cache", self.header.file);
            return Ok(true);
        }

        // 复用已记录的 sigma; 尚无记录时采用默认值.
        let recorded_sigma = self.header_channel_sigma(StainChannel::Cyto);
        self.ensure_masks(StainChannel::Cyto, recorded_sigma)?;
        let seg: Array3<u16> = ndarray_npy::read_npy(&seg_path)?;
        let signal = match self.cyto_mask.as_ref() {
            Some(m) => m,
            None => {
                return Err(OligoError::Io(std::io::Error::other(
                    "cyto mask missing after ensure",
                )))
            }
        };
        if seg.dim() != signal.dim() {
            error!(
                "{}: object mask shape {:?} does not match image shape {:?}",
                self.header.file,
                seg.dim(),
                signal.dim()
            );
            return Ok(false);
        }

        let (ring_volume, mut table) =
            ring::compute_ring_statistics(seg.view(), signal.view(), dilate, erode);

        if !self.label_table.is_empty() && self.label_table.len() != table.len() {
            error!(
                "{}: label table rebuilt with {} rows, previously {} (labels changed on disk?)",
                self.header.file,
                table.len(),
                self.label_table.len()
            );
        }
        table.replay_accepts(&self.label_table);

        self.header.num_labels = Some(table.len() as u64);
        self.label_table = table;
        self.ring = Some(ring_volume);
        info!(
            "{}: ring mask computed (dilate={dilate}, erode={erode}, {} labels)",
            self.header.file,
            self.label_table.len()
        );
        Ok(true)
    }

    /// 运行全部 ensure 步骤: rgb 栈, 双通道掩膜与环形掩膜.
    ///
    /// 掩膜 sigma 与迭代数取 header 当前值.
    ///
    /// # 返回值
    ///
    /// 环形掩膜是否可用 (对象掩膜缺失时为 `false`).
    pub fn load(&mut self) -> Result<bool> {
        self.ensure_rgb_stack(false)?;
        self.ensure_masks(StainChannel::Cyto, None)?;
        self.ensure_masks(StainChannel::Dapi, None)?;
        self.ensure_ring(None, None)
    }

    /// 持久化当前驻留内存的全部产物.
    ///
    /// 固定写出 header json 与标签表; rgb 栈, 信号通道掩膜/模糊结果,
    /// 环形掩膜与预览图只在驻留内存时写出, 并各自带上溯源 sidecar.
    pub fn save(&self) -> Result<()> {
        let folder = self.save_folder();
        fs::create_dir_all(&folder)?;

        self.header.save(self.artifact_path(SUFFIX_HEADER))?;
        self.label_table.save(self.artifact_path(SUFFIX_LABELS))?;

        if let Some(rgb) = &self.rgb {
            let path = self.rgb_path();
            rgb.save(&path)?;
            Provenance {
                xy_scale_factor: Some(self.header.xy_scale_factor),
                ..Provenance::default()
            }
            .save(&path)?;

            preview::save_rgb_preview(rgb, self.artifact_path(SUFFIX_PREVIEW))?;
        }

        if let (Some(mask), Some(filtered)) = (&self.cyto_mask, &self.cyto_filtered) {
            let prov = Provenance {
                gaussian_sigma: self.header.cyto_gaus_sigma,
                ..Provenance::default()
            };
            let mask_path = self.mask_path(StainChannel::Cyto);
            ndarray_npy::write_npy(&mask_path, mask)?;
            prov.save(&mask_path)?;

            let filtered_path = self.filtered_path(StainChannel::Cyto);
            ndarray_npy::write_npy(&filtered_path, filtered)?;
            prov.save(&filtered_path)?;
        }

        if let Some(ring_volume) = &self.ring {
            let path = self.artifact_path(SUFFIX_RING);
            ndarray_npy::write_npy(&path, ring_volume)?;
            Provenance {
                dilate_iterations: Some(self.header.dilate_iterations),
                erode_iterations: Some(self.header.erode_iterations),
                ..Provenance::default()
            }
            .save(&path)?;
        }

        info!("{}: artifacts saved to {}", self.header.file, folder.display());
        Ok(())
    }

    /// 释放全部驻留内存的体数据. 已持久化的状态不受影响.
    pub fn unload(&mut self) {
        self.rgb = None;
        self.cyto_filtered = None;
        self.cyto_mask = None;
        self.dapi_filtered = None;
        self.dapi_mask = None;
        self.ring = None;
    }

    /// header 中 `channel` 已记录的 sigma.
    fn header_channel_sigma(&self, channel: StainChannel) -> Option<f64> {
        match channel {
            StainChannel::Cyto => self.header.cyto_gaus_sigma,
            StainChannel::Dapi => self.header.dapi_gaus_sigma,
        }
    }

    /// 写入 `channel` 的内存槽位.
    fn store_channel(&mut self, channel: StainChannel, filtered: Array3<f32>, mask: Array3<bool>) {
        match channel {
            StainChannel::Cyto => {
                self.cyto_filtered = Some(filtered);
                self.cyto_mask = Some(mask);
            }
            StainChannel::Dapi => {
                self.dapi_filtered = Some(filtered);
                self.dapi_mask = Some(mask);
            }
        }
    }
}
