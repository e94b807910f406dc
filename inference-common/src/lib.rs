//! Inference Gateway Common Types
//!
//! Wire types shared by the gateway backend and its clients.

pub mod batch;
pub mod inference;
pub mod model;
pub mod stream;

pub use batch::{
    BatchItemResult, BatchResultsResponse, BatchStatus, BatchStatusView, BatchSummary,
    ResultFormat, SubmitBatchRequest, SubmitBatchResponse,
};
pub use inference::{input_id, InferenceOptions, InferenceRequest, InferenceResponse, InferenceResult};
pub use model::{names, LatencyClass, ModeRateLimits, ModelLimits, ModelSpec, ModelsResponse};
pub use stream::{progress_percent, StreamEvent, StreamRequest};
