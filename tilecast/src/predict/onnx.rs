//! ONNX Runtime predictor.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{s, Array4, ArrayView4};
use ort::logging::LogLevel;
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

use super::{PredictError, PredictResult, Predictor};

/// Runs an exported segmentation model with ONNX Runtime.
///
/// The session is created once and reused for every batch. Batches are fed
/// to the model `chunk` tiles at a time to bound device memory.
pub struct OnnxPredictor {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    model_path: PathBuf,
    chunk: usize,
}

impl OnnxPredictor {
    /// Load `model_path`, using the model's first input and output.
    pub fn new(model_path: impl AsRef<Path>, chunk: usize) -> PredictResult<Self> {
        let path = model_path.as_ref();
        let load_err = |e: ort::Error| PredictError::ModelLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let session = Session::builder()
            .map_err(load_err)?
            .with_log_level(LogLevel::Error)
            .map_err(load_err)?
            .commit_from_file(path)
            .map_err(load_err)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PredictError::ModelLoad {
                path: path.to_path_buf(),
                reason: "model declares no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PredictError::ModelLoad {
                path: path.to_path_buf(),
                reason: "model declares no outputs".to_string(),
            })?;

        info!(
            model = %path.display(),
            input = %input_name,
            output = %output_name,
            chunk,
            "Loaded ONNX model"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            model_path: path.to_path_buf(),
            chunk: chunk.max(1),
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn run_chunk(&self, input: ArrayView4<'_, f32>) -> PredictResult<Array4<f32>> {
        let contiguous = input.as_standard_layout();
        let dims: Vec<i64> = contiguous.shape().iter().map(|&d| d as i64).collect();
        let data = contiguous
            .as_slice()
            .ok_or_else(|| PredictError::Inference("input is not contiguous".to_string()))?;
        let tensor = TensorRef::from_array_view((dims, data))
            .map_err(|e| PredictError::Inference(format!("tensor conversion: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PredictError::Inference("session lock poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| PredictError::Inference(format!("forward pass: {e}")))?;

        let (shape, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictError::Inference(format!("output extraction: {e}")))?;
        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let (n, rows, cols, _) = input.dim();
        // A trailing channel of 1 is optional in exported models.
        let expected = [n, rows, cols, 1];
        if shape.iter().product::<usize>() != expected.iter().product::<usize>() {
            return Err(PredictError::ShapeMismatch {
                expected,
                actual: shape,
            });
        }

        Array4::from_shape_vec((n, rows, cols, 1), values.to_vec())
            .map_err(|e| PredictError::Inference(format!("output reshape: {e}")))
    }
}

impl Predictor for OnnxPredictor {
    fn predict(&self, input: ArrayView4<'_, f32>) -> PredictResult<Array4<f32>> {
        let (n, rows, cols, _) = input.dim();
        let mut output = Array4::<f32>::zeros((n, rows, cols, 1));

        let mut start = 0;
        while start < n {
            let end = (start + self.chunk).min(n);
            let part = self.run_chunk(input.slice(s![start..end, .., .., ..]))?;
            output
                .slice_mut(s![start..end, .., .., ..])
                .assign(&part);
            debug!(start, end, "Inference chunk complete");
            start = end;
        }

        Ok(output)
    }
}
