//! 重定位评估
//!
//! 对每张查询图片进行检索，只保留路径中包含参考集名称的结果，
//! 用排名第一的结果对应的轨迹坐标估计查询图片的位置，并计算相对误差。

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::feature::FeatureExtractor;
use crate::index::{SearchHit, Searcher};

/// 没有任何匹配结果时记录的误差
pub const UNMATCHED_ERROR: f64 = 1.0;

/// 轨迹文件：每行对应一帧，以空白分隔，第 1、2 列为 x、y 坐标
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    positions: Vec<(f64, f64)>,
}

impl Trajectory {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut positions = vec![];
        for (nr, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns = line
                .split_whitespace()
                .map(|v| v.parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::InvalidArgument(format!("trajectory line {}: {}", nr + 1, e)))?;
            if columns.len() < 3 {
                return Err(Error::InvalidArgument(format!(
                    "trajectory line {}: expected at least 3 columns, got {}",
                    nr + 1,
                    columns.len()
                )));
            }
            positions.push((columns[1], columns[2]));
        }
        Ok(Self { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, frame: usize) -> Option<(f64, f64)> {
        self.positions.get(frame).copied()
    }

    /// 根据图片文件名中的帧编号查找坐标
    pub fn position_of(&self, path: impl AsRef<Path>) -> Option<(f64, f64)> {
        frame_number(path.as_ref()).and_then(|frame| self.position(frame))
    }
}

/// 文件名（不含扩展名）末尾的连续数字，例如 `RGB/000123.png` → 123
pub fn frame_number(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    stem[stem.len() - digits..].parse().ok()
}

/// 估计位置相对于真实位置的误差
pub fn relative_error(predicted: (f64, f64), truth: (f64, f64)) -> f64 {
    ((predicted.0 - truth.0) / (truth.0 + 1e-3)).abs() + ((predicted.1 - truth.1) / (truth.1 + 1e-3)).abs()
}

/// 保留路径中包含 reference 的前 top_n 个结果，顺序不变
pub fn filter_results<'a>(hits: &'a [SearchHit], reference: &str, top_n: usize) -> Vec<&'a SearchHit> {
    hits.iter().filter(|hit| hit.path.contains(reference)).take(top_n).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalEntry {
    pub query: PathBuf,
    /// 用于估计位置的结果，没有匹配时为空
    pub matched: Option<SearchHit>,
    pub error: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub entries: Vec<EvalEntry>,
    /// 没有坐标或无法提取特征而被跳过的查询
    pub skipped: Vec<PathBuf>,
}

impl EvalReport {
    pub fn unmatched(&self) -> usize {
        self.entries.iter().filter(|e| e.matched.is_none()).count()
    }

    pub fn mean_error(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.iter().map(|e| e.error).sum::<f64>() / self.entries.len() as f64)
    }
}

/// 评估参数
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// 参考集名称，结果路径中必须包含该字符串
    pub reference: String,
    /// 过滤后保留的结果数量
    pub top_n: usize,
    /// 每次检索返回的结果数量，过滤前
    pub search_depth: usize,
}

pub async fn evaluate<E>(
    searcher: &Searcher,
    extractor: &E,
    queries: &[PathBuf],
    trajectory: &Trajectory,
    options: &EvalOptions,
) -> Result<EvalReport>
where
    E: FeatureExtractor + ?Sized,
{
    let mut report = EvalReport::default();
    for query in queries {
        let Some(truth) = trajectory.position_of(query) else {
            warn!("无法确定查询图片的坐标：{}", query.display());
            report.skipped.push(query.clone());
            continue;
        };
        let hits = match searcher.query_image(query, extractor, options.search_depth).await {
            Ok(hits) => hits,
            Err(Error::Extraction(failure)) => {
                warn!("跳过查询图片：{}", failure);
                report.skipped.push(query.clone());
                continue;
            }
            Err(e) => return Err(e),
        };

        let matched = filter_results(&hits, &options.reference, options.top_n)
            .into_iter()
            .find_map(|hit| trajectory.position_of(&hit.path).map(|pos| (hit.clone(), pos)));
        let entry = match matched {
            Some((hit, predicted)) => {
                let error = relative_error(predicted, truth);
                EvalEntry { query: query.clone(), matched: Some(hit), error }
            }
            None => {
                warn!("没有匹配结果：{}", query.display());
                EvalEntry { query: query.clone(), matched: None, error: UNMATCHED_ERROR }
            }
        };
        report.entries.push(entry);
    }

    info!(
        "评估完成：{} 张查询图片，{} 张没有匹配，{} 张被跳过",
        report.entries.len(),
        report.unmatched(),
        report.skipped.len()
    );
    Ok(report)
}
