//! Model inference seam.
//!
//! The pipeline only needs `predict(input) -> probabilities`. Anything that
//! implements [`Predictor`] can be plugged in: the ONNX Runtime backend
//! (feature `onnx`), a remote service, or a closure in tests.
//!
//! Input is `(n, model_rows, model_cols, channels)`, output must be
//! `(n, model_rows, model_cols, 1)` foreground probabilities.

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxPredictor;

use std::path::PathBuf;

use ndarray::{Array4, ArrayView4};
use thiserror::Error;

/// Result type for inference.
pub type PredictResult<T> = Result<T, PredictError>;

/// Errors raised by a predictor.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("failed to load model {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model returned shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("no model backend compiled in (rebuild with the `onnx` feature)")]
    BackendUnavailable,
}

/// Produces per-pixel foreground probabilities for a batch.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: ArrayView4<'_, f32>) -> PredictResult<Array4<f32>>;
}

impl<F> Predictor for F
where
    F: Fn(ArrayView4<'_, f32>) -> PredictResult<Array4<f32>> + Send + Sync,
{
    fn predict(&self, input: ArrayView4<'_, f32>) -> PredictResult<Array4<f32>> {
        self(input)
    }
}

/// Run `predictor` and reject output that is not `(n, rows, cols, 1)`.
pub fn predict_checked(
    predictor: &dyn Predictor,
    input: ArrayView4<'_, f32>,
) -> PredictResult<Array4<f32>> {
    let (n, rows, cols, _) = input.dim();
    let output = predictor.predict(input)?;
    let expected = [n, rows, cols, 1];
    if output.shape() != expected {
        return Err(PredictError::ShapeMismatch {
            expected,
            actual: output.shape().to_vec(),
        });
    }
    Ok(output)
}
