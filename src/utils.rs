use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::info;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .expect("valid progress template")
        .progress_chars("#>-")
}

/// 展开输入路径：文件原样保留，目录递归扫描后缀匹配的文件
///
/// suffix 为逗号分隔的后缀列表，例如 `jpg,png,npy`，结果按路径排序
pub fn scan_images(paths: &[impl AsRef<Path>], suffix: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!("^(?i:{})$", suffix.replace(',', "|"));
    let re_suf = Regex::new(&pattern).map_err(|e| Error::InvalidArgument(e.to_string()))?;

    let mut images = vec![];
    for path in paths {
        let path = path.as_ref();
        if path.is_file() {
            images.push(path.to_path_buf());
            continue;
        }
        info!("开始扫描目录: {}", path.display());
        let pb = ProgressBar::no_length().with_style(pb_style());
        let entries = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .progress_with(pb)
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.is_file()
                    && path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
            });
        images.extend(entries);
    }
    images.sort();
    info!("扫描完成，共 {} 张图片", images.len());
    Ok(images)
}
