use std::path::{Path, PathBuf};

use ndarray::Array2;
use ndarray_npy::read_npy;

use super::{DescriptorSet, FeatureExtractor, FeatureKind, SIFT_DIM};
use crate::error::ExtractionFailure;
use crate::hamming::CODE_SIZE;

/// 读取预先计算好的描述子矩阵
///
/// 如果路径本身是 `.npy` 文件则直接读取，否则读取同名的 `.npy` 文件，
/// 例如 `RGB/000123.png` 对应 `RGB/000123.npy`。
/// ORB 为 `n x 32` 的 u8 矩阵，SIFT 为 `n x 128` 的 f32 矩阵。
#[derive(Debug, Clone)]
pub struct NpyExtractor {
    kind: FeatureKind,
}

impl NpyExtractor {
    pub fn new(kind: FeatureKind) -> Self {
        Self { kind }
    }

    /// 返回图片对应的描述子文件路径
    pub fn descriptor_path(path: &Path) -> PathBuf {
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("npy")) {
            path.to_path_buf()
        } else {
            path.with_extension("npy")
        }
    }
}

impl FeatureExtractor for NpyExtractor {
    fn kind(&self) -> FeatureKind {
        self.kind
    }

    fn extract(&self, path: &Path) -> Result<DescriptorSet, ExtractionFailure> {
        let file = Self::descriptor_path(path);
        match self.kind {
            FeatureKind::Orb => {
                let data: Array2<u8> =
                    read_npy(&file).map_err(|e| ExtractionFailure::new(path, e))?;
                if data.ncols() != CODE_SIZE && data.nrows() != 0 {
                    return Err(ExtractionFailure::new(
                        path,
                        format!("expected {} bytes per descriptor, got {}", CODE_SIZE, data.ncols()),
                    ));
                }
                let codes = data
                    .rows()
                    .into_iter()
                    .map(|row| {
                        let mut code = [0u8; CODE_SIZE];
                        code.iter_mut().zip(row.iter()).for_each(|(dst, &src)| *dst = src);
                        code
                    })
                    .collect();
                Ok(DescriptorSet::Binary(codes))
            }
            FeatureKind::Sift => {
                let data: Array2<f32> =
                    read_npy(&file).map_err(|e| ExtractionFailure::new(path, e))?;
                if data.nrows() == 0 {
                    return Ok(DescriptorSet::empty(FeatureKind::Sift));
                }
                if data.ncols() != SIFT_DIM {
                    return Err(ExtractionFailure::new(
                        path,
                        format!("expected {} dimensions per descriptor, got {}", SIFT_DIM, data.ncols()),
                    ));
                }
                Ok(DescriptorSet::Real(data))
            }
        }
    }
}
