use super::preprocess::Preprocessor;
use super::types::{BatchShape, MattingModel, ModelProvider};
use crate::config::{Device, PipelineConfig};
use crate::frame::{Frame, FrameShape};
use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array4, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Square input resolution of the U²-Net family of models
pub const U2NET_INPUT_SIZE: u32 = 320;

/// U²-Net salient object / human segmentation model
///
/// Stateless per frame, so batches of any frames can be processed by any
/// worker. Output mattes are `U2NET_INPUT_SIZE` wide and `matte_height` tall.
pub struct U2NetMatting {
    session: Session,
    preprocessor: Preprocessor,
    matte_height: u32,
    prepared: Option<BatchShape>,
}

impl U2NetMatting {
    /// Create a new U²-Net model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `device` - Execution provider to register on the session
    /// * `intra_threads` - ONNX Runtime intra-op thread count
    /// * `matte_height` - Height of the produced mattes
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        intra_threads: usize,
        matte_height: u32,
    ) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading U²-Net model from {} on {}", path.display(), device);

        let builder = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {e}"))?
            .with_intra_threads(intra_threads)
            .map_err(|e| anyhow!("Failed to set intra-op threads: {e}"))?;
        let mut builder = register_device(builder, device)?;

        let session = builder
            .commit_from_file(path)
            .map_err(|e| anyhow!("Failed to load model from {}: {e}", path.display()))?;

        tracing::info!("U²-Net model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(U2NET_INPUT_SIZE, U2NET_INPUT_SIZE),
            matte_height,
            prepared: None,
        })
    }

    fn run(&mut self, input: &Array4<f32>) -> Result<Vec<Vec<f32>>> {
        let _infer_span = tracing::debug_span!("inference", batch = input.shape()[0]).entered();

        let tensor = TensorRef::from_array_view(input.view())
            .context("Failed to wrap input tensor")?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("Failed to run inference")?;

        // First output (d1) is the fused saliency map, shape [N, 1, H, W]
        let d1 = outputs[0]
            .try_extract_array::<f32>()
            .context("Model output is not an f32 tensor")?;
        if d1.ndim() != 4 || d1.shape()[1] != 1 {
            bail!("Unexpected matte tensor shape {:?}", d1.shape());
        }

        Ok(d1
            .axis_iter(Axis(0))
            .map(|plane| plane.iter().copied().collect())
            .collect())
    }
}

#[cfg(feature = "cuda")]
fn register_cuda(
    builder: ort::session::builder::SessionBuilder,
    device_id: i32,
) -> Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;
    builder
        .with_execution_providers([CUDAExecutionProvider::default()
            .with_device_id(device_id)
            .build()])
        .map_err(|e| anyhow!("Failed to register CUDA execution provider: {e}"))
}

#[cfg(feature = "tensorrt")]
fn register_tensorrt(
    builder: ort::session::builder::SessionBuilder,
    device_id: i32,
) -> Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::TensorRTExecutionProvider;
    builder
        .with_execution_providers([TensorRTExecutionProvider::default()
            .with_device_id(device_id)
            .build()])
        .map_err(|e| anyhow!("Failed to register TensorRT execution provider: {e}"))
}

fn register_device(
    builder: ort::session::builder::SessionBuilder,
    device: Device,
) -> Result<ort::session::builder::SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        #[cfg(feature = "cuda")]
        Device::Cuda { device_id } => register_cuda(builder, device_id),
        #[cfg(feature = "tensorrt")]
        Device::TensorRt { device_id } => register_tensorrt(builder, device_id),
        #[allow(unreachable_patterns)]
        other => bail!("Device {other} is not compiled into this build"),
    }
}

impl MattingModel for U2NetMatting {
    fn prepare(&mut self, shape: BatchShape) -> Result<()> {
        let _span = tracing::debug_span!("u2net_prepare").entered();

        // One warm-up pass lets the execution provider build its kernels for
        // this batch size before real frames arrive
        let size = U2NET_INPUT_SIZE as usize;
        let warmup = Array4::<f32>::zeros((shape.batch, 3, size, size));
        self.run(&warmup).context("Warm-up inference failed")?;

        tracing::debug!("U²-Net specialised for {} x {}", shape.batch, shape.frame);
        self.prepared = Some(shape);
        Ok(())
    }

    fn matte(&mut self, frames: &[Arc<Frame>]) -> Result<Vec<Frame>> {
        let _span = tracing::debug_span!("u2net_matte").entered();

        if let Some(prepared) = self.prepared {
            if frames.len() != prepared.batch {
                bail!(
                    "Model prepared for batches of {} but received {}",
                    prepared.batch,
                    frames.len()
                );
            }
        }

        let input = self.preprocessor.preprocess_batch(frames)?;
        let planes = self.run(&input)?;
        if planes.len() != frames.len() {
            bail!("Model returned {} mattes for {} frames", planes.len(), frames.len());
        }

        let shape = FrameShape::gray(self.matte_height, U2NET_INPUT_SIZE);
        frames
            .iter()
            .zip(planes)
            .map(|(frame, plane)| -> Result<Frame> {
                let bytes = Preprocessor::postprocess_matte(
                    &plane,
                    U2NET_INPUT_SIZE,
                    U2NET_INPUT_SIZE,
                    shape.width,
                    shape.height,
                )?;
                Ok(Frame::new(frame.index(), shape, bytes)?)
            })
            .collect()
    }
}

/// Loads a [`U2NetMatting`] session for each worker
pub struct U2NetProvider {
    model_path: PathBuf,
    device: Device,
    intra_threads: usize,
    matte_height: u32,
}

impl U2NetProvider {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            model_path: PathBuf::from(&config.model),
            device: config.device,
            intra_threads: config.intra_threads,
            matte_height: config.matte_height,
        }
    }
}

impl ModelProvider for U2NetProvider {
    fn load(&self, worker: usize) -> Result<Box<dyn MattingModel>> {
        tracing::debug!("Worker {} loading {}", worker, self.model_path.display());
        let model = U2NetMatting::new(
            &self.model_path,
            self.device,
            self.intra_threads,
            self.matte_height,
        )?;
        Ok(Box::new(model))
    }
}
