//! 服务模块

pub mod control;
pub mod fusion;
pub mod interpolation;
pub mod retrieval;

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::Result;

pub use control::{ControlChannels, ControlLoop, TickOutcome};
pub use fusion::{TrackingFusion, run_fusion, serve_tracking, spawn_fusion, tracking_frames};
pub use interpolation::{FingerJointMap, interpolate};
pub use retrieval::{
    ChatInterpreter, LocalMatcher, Resolution, RetrievalAdapter, RetrievalOutcome,
    RetrievalWorker, TypeInterpreter,
};

/// 创建使用对话补全接口的检索适配器
pub fn create_retrieval_adapter(config: &RetrievalConfig) -> Result<Arc<RetrievalAdapter>> {
    let interpreter = Arc::new(ChatInterpreter::new(config)?);
    Ok(Arc::new(RetrievalAdapter::new(interpreter, config.clone())?))
}
