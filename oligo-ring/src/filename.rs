//! 原始文件名中的实验元信息解析.
//!
//! 采集文件名形如 `B35_Slice2_RS_DS1.nii`:
//! 依次为动物编号, 切片号, 左右半球 (LS/RS),
//! 脑区 (DS 背侧纹状体 / NA 伏隔核) 与末尾的图像编号.

use log::error;
use serde_json::Value;

use crate::consts::raw_file_stem;

/// 从文件名解析出的实验元信息. 解析失败的字段保持 `None`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileNameMeta {
    /// 动物编号, 如 `B35`.
    pub animal_id: Option<String>,

    /// 切片号, 如 `Slice2`.
    pub slice_number: Option<String>,

    /// 半球, `LS` 或 `RS`.
    pub hemisphere: Option<String>,

    /// 脑区, `DoS` (背侧纹状体) 或 `NuA` (伏隔核).
    pub region: Option<String>,

    /// 末尾图像编号 (脑区标记之后, 扩展名之前的部分).
    pub image_number: Option<String>,
}

impl FileNameMeta {
    /// 转换为 header `extra` 表使用的 `(键, 值)` 序列. 五个键总是全部给出,
    /// 未解析出的字段以 `null` 表示, 以保证聚合表列集合一致.
    pub fn to_extra_entries(&self) -> [(&'static str, Value); 5] {
        fn val(v: &Option<String>) -> Value {
            v.as_deref().map_or(Value::Null, Into::into)
        }
        [
            ("animalID", val(&self.animal_id)),
            ("sliceNumber", val(&self.slice_number)),
            ("hemisphere", val(&self.hemisphere)),
            ("region", val(&self.region)),
            ("imageNumber", val(&self.image_number)),
        ]
    }
}

/// 解析采集文件名.
///
/// 半球或脑区标记缺失/含糊 (两者同时出现或同时缺席) 时记录错误日志,
/// 对应字段保持 `None`; 该函数从不失败.
pub fn parse_file_name(file_name: &str) -> FileNameMeta {
    let mut meta = FileNameMeta::default();

    let Some(first) = file_name.find('_') else {
        error!("no `_` in file name: {file_name}");
        return meta;
    };
    meta.animal_id = Some(file_name[..first].to_owned());

    if let Some(second) = file_name[first + 1..].find('_') {
        meta.slice_number = Some(file_name[first + 1..first + 1 + second].to_owned());
    }

    let left = file_name.contains("LS_");
    let right = file_name.contains("RS_");
    match (left, right) {
        (true, false) => meta.hemisphere = Some("LS".to_owned()),
        (false, true) => meta.hemisphere = Some("RS".to_owned()),
        _ => error!("ambiguous left/right hemisphere: {file_name}"),
    }

    let dorsal = file_name.contains("_DS");
    let accumbens = file_name.contains("_NA") || file_name.contains("_Na");
    let marker_end = match (dorsal, accumbens) {
        (true, false) => {
            meta.region = Some("DoS".to_owned());
            file_name.find("_DS").map(|i| i + 3)
        }
        (false, true) => {
            meta.region = Some("NuA".to_owned());
            // 逐个写法查找, 避免大小写折叠改变字节偏移.
            file_name
                .find("_NA")
                .or_else(|| file_name.find("_Na"))
                .map(|i| i + 3)
        }
        _ => {
            error!("ambiguous region for DS/NA: {file_name}");
            None
        }
    };
    if let Some(idx) = marker_end {
        meta.image_number = Some(raw_file_stem(&file_name[idx..]).to_owned());
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::parse_file_name;

    /// 对文档中列出的真实文件名逐一验证.
    #[test]
    fn test_parse_documented_names() {
        let m = parse_file_name("B35_Slice2_RS_DS1.nii");
        assert_eq!(m.animal_id.as_deref(), Some("B35"));
        assert_eq!(m.slice_number.as_deref(), Some("Slice2"));
        assert_eq!(m.hemisphere.as_deref(), Some("RS"));
        assert_eq!(m.region.as_deref(), Some("DoS"));
        assert_eq!(m.image_number.as_deref(), Some("1"));

        let m = parse_file_name("B36_Slice2_LS_DS_1.0.nii");
        assert_eq!(m.hemisphere.as_deref(), Some("LS"));
        assert_eq!(m.image_number.as_deref(), Some("_1.0"));

        let m = parse_file_name("G19_Slice1_LS_NAc.nii");
        assert_eq!(m.region.as_deref(), Some("NuA"));
        assert_eq!(m.image_number.as_deref(), Some("c"));

        let m = parse_file_name("P11_Slice1_LS_NAcmedial.nii");
        assert_eq!(m.animal_id.as_deref(), Some("P11"));
        assert_eq!(m.region.as_deref(), Some("NuA"));
        assert_eq!(m.image_number.as_deref(), Some("cmedial"));
    }

    /// 含糊或残缺的文件名不会 panic, 相应字段保持 `None`.
    #[test]
    fn test_parse_degenerate_names() {
        let m = parse_file_name("noseparator.nii");
        assert_eq!(m.animal_id, None);

        // 同时出现 LS_ 和 RS_, 半球无法判定.
        let m = parse_file_name("B1_Slice1_LS_RS_DS1.nii");
        assert_eq!(m.animal_id.as_deref(), Some("B1"));
        assert_eq!(m.hemisphere, None);
        assert_eq!(m.region.as_deref(), Some("DoS"));

        // 既无 DS 也无 NA.
        let m = parse_file_name("B1_Slice1_RS_XX1.nii");
        assert_eq!(m.region, None);
        assert_eq!(m.image_number, None);
    }

    /// 非 ASCII 文件名: 大小写折叠可能改变字节长度,
    /// 标记定位必须基于原始字符串.
    #[test]
    fn test_parse_non_ascii_name() {
        let m = parse_file_name("Bʞß_Slice1_LS_Na7.nii");
        assert_eq!(m.region.as_deref(), Some("NuA"));
        assert_eq!(m.image_number.as_deref(), Some("7"));
    }

    #[test]
    fn test_extra_entries_complete() {
        let m = parse_file_name("noseparator.nii");
        let entries = m.to_extra_entries();
        assert_eq!(entries.len(), 5);
        assert!(entries.iter().all(|(_, v)| v.is_null()));
    }
}
