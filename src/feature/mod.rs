mod npy;
#[cfg(feature = "opencv")]
mod opencv;

use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

pub use self::npy::NpyExtractor;
#[cfg(feature = "opencv")]
pub use self::opencv::OpenCvExtractor;
use crate::error::{ExtractionFailure, Result};
use crate::hamming::CODE_SIZE;

/// SIFT 描述子维数
pub const SIFT_DIM: usize = 128;

/// 特征类型，决定了描述子的表示方式和距离度量
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// ORB 二进制描述子，256 bit，汉明距离
    Orb,
    /// SIFT 浮点描述子，128 维，欧氏距离
    Sift,
}

impl FeatureKind {
    pub fn metric(self) -> Metric {
        match self {
            Self::Orb => Metric::Hamming,
            Self::Sift => Metric::Euclidean,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orb => "orb",
            Self::Sift => "sift",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Hamming,
    Euclidean,
}

/// 一张图片的全部描述子，顺序与特征点顺序一致
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorSet {
    Binary(Vec<[u8; CODE_SIZE]>),
    /// 每行一个描述子
    Real(Array2<f32>),
}

/// 单个描述子的引用
#[derive(Debug, Clone, Copy)]
pub enum Descriptor<'a> {
    Binary(&'a [u8; CODE_SIZE]),
    Real(ArrayView1<'a, f32>),
}

impl DescriptorSet {
    /// 指定类型的空描述子集合
    pub fn empty(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Orb => Self::Binary(vec![]),
            FeatureKind::Sift => Self::Real(Array2::zeros((0, SIFT_DIM))),
        }
    }

    pub fn kind(&self) -> FeatureKind {
        match self {
            Self::Binary(_) => FeatureKind::Orb,
            Self::Real(_) => FeatureKind::Sift,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary(v) => v.len(),
            Self::Real(m) => m.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 描述子的维数，二进制描述子按 bit 计
    pub fn dim(&self) -> usize {
        match self {
            Self::Binary(_) => CODE_SIZE * 8,
            Self::Real(m) => m.ncols(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = Descriptor<'_>> + '_> {
        match self {
            Self::Binary(v) => Box::new(v.iter().map(Descriptor::Binary)),
            Self::Real(m) => Box::new(m.rows().into_iter().map(Descriptor::Real)),
        }
    }
}

/// 特征提取器：图片路径 → 描述子集合
///
/// 训练、建索引和查询必须使用同一种特征类型，否则结果没有可比性
pub trait FeatureExtractor: Send + Sync {
    fn kind(&self) -> FeatureKind;

    fn extract(&self, path: &Path) -> Result<DescriptorSet, ExtractionFailure>;
}

impl<T: FeatureExtractor + ?Sized> FeatureExtractor for Box<T> {
    fn kind(&self) -> FeatureKind {
        (**self).kind()
    }

    fn extract(&self, path: &Path) -> Result<DescriptorSet, ExtractionFailure> {
        (**self).extract(path)
    }
}

/// 特征提取后端
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// 读取预先计算好的 .npy 描述子矩阵
    Npy,
    /// 使用 OpenCV 从图片中提取，需要启用 opencv feature
    Opencv,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "opencv") { Self::Opencv } else { Self::Npy }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npy => f.write_str("npy"),
            Self::Opencv => f.write_str("opencv"),
        }
    }
}

/// 根据特征类型和后端创建特征提取器
#[cfg_attr(not(feature = "opencv"), allow(unused_variables))]
pub fn create_extractor(
    kind: FeatureKind,
    backend: Backend,
    nfeatures: u32,
) -> Result<Box<dyn FeatureExtractor>> {
    match backend {
        Backend::Npy => Ok(Box::new(NpyExtractor::new(kind))),
        #[cfg(feature = "opencv")]
        Backend::Opencv => Ok(Box::new(OpenCvExtractor::new(kind, nfeatures))),
        #[cfg(not(feature = "opencv"))]
        Backend::Opencv => {
            Err(crate::Error::InvalidArgument("built without the opencv feature".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_empty_descriptor_set() {
        let orb = DescriptorSet::empty(FeatureKind::Orb);
        assert!(orb.is_empty());
        assert_eq!(orb.kind(), FeatureKind::Orb);
        assert_eq!(orb.dim(), 256);

        let sift = DescriptorSet::empty(FeatureKind::Sift);
        assert!(sift.is_empty());
        assert_eq!(sift.dim(), SIFT_DIM);
    }

    #[test]
    fn test_descriptor_iter_keeps_order() {
        let set = DescriptorSet::Real(array![[1.0f32, 2.0], [3.0, 4.0]]);
        let firsts: Vec<f32> = set
            .iter()
            .map(|d| match d {
                Descriptor::Real(row) => row[0],
                Descriptor::Binary(_) => unreachable!(),
            })
            .collect();
        assert_eq!(firsts, vec![1.0, 3.0]);
    }

    #[test]
    fn test_metric_follows_kind() {
        assert_eq!(FeatureKind::Orb.metric(), Metric::Hamming);
        assert_eq!(FeatureKind::Sift.metric(), Metric::Euclidean);
        assert_eq!(FeatureKind::Sift.to_string(), "sift");
    }

    #[test]
    fn test_create_npy_extractor() {
        let extractor = create_extractor(FeatureKind::Orb, Backend::Npy, 500).unwrap();
        assert_eq!(extractor.kind(), FeatureKind::Orb);
    }
}
