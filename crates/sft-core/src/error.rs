use std::fmt;

/// Pipeline stage that owns a linear solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SolveStage {
    /// Radial-basis warp fit between two point sets.
    WarpFit,
    /// Final template-to-camera fit of the isometric solver.
    IsometricFit,
    /// Mixture-model fit of the geometric outlier rejection.
    OutlierRejection,
}

impl fmt::Display for SolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveStage::WarpFit => f.write_str("warp fit"),
            SolveStage::IsometricFit => f.write_str("isometric embedding fit"),
            SolveStage::OutlierRejection => f.write_str("outlier rejection"),
        }
    }
}

/// Errors shared by every stage of the reconstruction.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SftError {
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("singular linear system during {stage}")]
    SingularSystem { stage: SolveStage },

    #[error("empty input: {context}")]
    EmptyInput { context: &'static str },

    #[error("invalid parameter `{name}` = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

impl SftError {
    pub(crate) fn dims(context: &'static str, expected: usize, got: usize) -> Self {
        SftError::DimensionMismatch {
            context,
            expected,
            got,
        }
    }

    /// Re-label a singular solve as belonging to `stage`.
    pub fn in_stage(self, stage: SolveStage) -> Self {
        match self {
            SftError::SingularSystem { .. } => SftError::SingularSystem { stage },
            other => other,
        }
    }
}
