//! 批处理命令行入口.
//!
//! 用法: `oligo-batch <文件夹>...`
//!
//! 对每个文件夹递归运行完整分析管线, 并把每文件一行的主 csv
//! 写到 `$OLIGO_SUMMARY_CSV` (或用户主目录).

use std::path::PathBuf;

mod runner;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("logger init error");

    let folders: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if folders.is_empty() {
        eprintln!("usage: oligo-batch <folder>...");
        std::process::exit(2);
    }

    runner::run(&folders);
}
