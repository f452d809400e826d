use sft_core::SftError;

/// Errors returned by matching, selection and outlier rejection.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum KeypointError {
    #[error("descriptor length mismatch: expected {expected}, got {got}")]
    DescriptorLength { expected: usize, got: usize },
    #[error("{keypoints} keypoints but {descriptors} descriptors")]
    DescriptorCount { keypoints: usize, descriptors: usize },
    #[error("match refers to missing keypoint (query {query}, train {train})")]
    InvalidMatch { query: usize, train: usize },
    #[error("cluster labels cover {labels} keypoints, match queries index {query}")]
    MissingClusterLabel { labels: usize, query: usize },
    #[error("feature extraction failed: {0}")]
    Extraction(String),
    #[error(transparent)]
    Core(#[from] SftError),
}
