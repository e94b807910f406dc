//! Model invocation layer.
//!
//! This module defines the `ModelInvoker` trait that abstracts model backends
//! behind a common interface, the built-in model catalog, and the registry
//! that maps model names to invokers.

mod catalog;
mod http;
mod registry;

pub use catalog::{builtin_specs, endpoint_spec};
pub use http::HttpModelInvoker;
pub use registry::{ModelRegistry, RegisteredModel};

use async_trait::async_trait;

use crate::error::ModelError;

/// A backend able to run model computations.
///
/// One invoker may serve several models; the model name is passed on every
/// call.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run `model` on `input` and return its structured output.
    async fn invoke(
        &self,
        model: &str,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ModelError>;
}
