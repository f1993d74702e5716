mod preprocess;
pub mod types;
mod u2net;

pub use preprocess::Preprocessor;
pub use types::{BatchShape, MattingModel, ModelProvider};
pub use u2net::{U2NetMatting, U2NetProvider, U2NET_INPUT_SIZE};

use crate::config::PipelineConfig;
use std::sync::Arc;

/// Create the default model provider (U²-Net over ONNX Runtime)
pub fn create_default_provider(config: &PipelineConfig) -> Arc<dyn ModelProvider> {
    Arc::new(U2NetProvider::new(config))
}
