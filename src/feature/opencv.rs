use std::path::Path;

use ndarray::Array2;
use opencv::core::{KeyPoint, Mat, Vector};
use opencv::features2d::{ORB, ORB_ScoreType, SIFT};
use opencv::imgcodecs;
use opencv::prelude::*;

use super::{DescriptorSet, FeatureExtractor, FeatureKind, SIFT_DIM};
use crate::error::ExtractionFailure;
use crate::hamming::CODE_SIZE;

/// 使用 OpenCV 从灰度图中检测特征点并计算描述子
#[derive(Debug, Clone)]
pub struct OpenCvExtractor {
    kind: FeatureKind,
    nfeatures: u32,
}

impl OpenCvExtractor {
    pub fn new(kind: FeatureKind, nfeatures: u32) -> Self {
        Self { kind, nfeatures }
    }

    fn detect(&self, path: &Path) -> opencv::Result<Mat> {
        let image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)?;
        if image.empty() {
            return Err(opencv::Error::new(opencv::core::StsError, "failed to read image"));
        }

        let mask = Mat::default();
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        let nfeatures = self.nfeatures as i32;
        match self.kind {
            FeatureKind::Orb => {
                let mut orb =
                    ORB::create(nfeatures, 1.2, 8, 31, 0, 2, ORB_ScoreType::HARRIS_SCORE, 31, 20)?;
                orb.detect_and_compute(&image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
            FeatureKind::Sift => {
                let mut sift = SIFT::create(nfeatures, 3, 0.04, 10., 1.6, false)?;
                sift.detect_and_compute(&image, &mask, &mut keypoints, &mut descriptors, false)?;
            }
        }
        Ok(descriptors)
    }
}

impl FeatureExtractor for OpenCvExtractor {
    fn kind(&self) -> FeatureKind {
        self.kind
    }

    fn extract(&self, path: &Path) -> Result<DescriptorSet, ExtractionFailure> {
        let descriptors = self.detect(path).map_err(|e| ExtractionFailure::new(path, e))?;
        // 没有检测到特征点时 OpenCV 返回空矩阵
        if descriptors.rows() == 0 {
            return Ok(DescriptorSet::empty(self.kind));
        }

        let rows = descriptors.rows() as usize;
        match self.kind {
            FeatureKind::Orb => {
                let data =
                    descriptors.data_typed::<u8>().map_err(|e| ExtractionFailure::new(path, e))?;
                let codes = data
                    .chunks_exact(CODE_SIZE)
                    .map(|chunk| {
                        let mut code = [0u8; CODE_SIZE];
                        code.copy_from_slice(chunk);
                        code
                    })
                    .collect();
                Ok(DescriptorSet::Binary(codes))
            }
            FeatureKind::Sift => {
                let data =
                    descriptors.data_typed::<f32>().map_err(|e| ExtractionFailure::new(path, e))?;
                let matrix = Array2::from_shape_vec((rows, SIFT_DIM), data.to_vec())
                    .map_err(|e| ExtractionFailure::new(path, e))?;
                Ok(DescriptorSet::Real(matrix))
            }
        }
    }
}
