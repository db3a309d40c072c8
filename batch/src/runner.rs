//! 程序运行函数.

use std::env;
use std::path::{Path, PathBuf};

use oligo_ring::prelude::*;

const SEP: &str = "--------------------------------------------------------";

/// 从环境变量读取批处理参数, 缺省时退回默认配置.
///
/// 1. `$OLIGO_CYTO_SIGMA` / `$OLIGO_DAPI_SIGMA`: 两个通道的高斯 sigma;
/// 2. `$OLIGO_SUMMARY_CSV`: 主 csv 输出路径.
///
/// 无法解析的 sigma 值按未设置处理.
pub fn config_from_env() -> BatchConfig {
    let mut config = BatchConfig::default();

    if let Some(sigma) = env_f64("OLIGO_CYTO_SIGMA") {
        config.cyto_sigma = sigma;
    }
    if let Some(sigma) = env_f64("OLIGO_DAPI_SIGMA") {
        config.dapi_sigma = sigma;
    }
    if let Ok(path) = env::var("OLIGO_SUMMARY_CSV") {
        config.output_path = PathBuf::from(path);
    }
    config
}

fn env_f64(key: &str) -> Option<f64> {
    let raw = env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparsable ${key}={raw}");
            None
        }
    }
}

/// 实际运行.
pub fn run(folders: &[PathBuf]) {
    let config = config_from_env();
    let folders: Vec<PathBuf> = folders.iter().map(|f| absolutize(f)).collect();

    println!("Running ring analysis batch...");
    println!(
        "  folders: {}, cyto sigma: {}, dapi sigma: {}",
        folders.len(),
        config.cyto_sigma,
        config.dapi_sigma
    );
    println!("{SEP}");

    let master = run_batch(&folders, &config);

    println!("{SEP}");
    println!(
        "Done: {} file row(s) -> {}",
        master.len(),
        config.output_path.display()
    );
}

/// 允许相对路径输入; 统一转为绝对路径便于日志阅读.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_owned())
    }
}
