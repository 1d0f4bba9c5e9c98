//! Seam to the external analysis backend.

use std::sync::Arc;

use crate::Result;
use crate::types::PreparedInput;

/// Performs one AI analysis call.
///
/// Implementations talk to the actual model. The dispatcher treats an
/// `Err`, a panic and an `Ok(None)` identically: the slot is stored with a
/// null payload.
#[async_trait::async_trait]
pub trait VariantInvoker: Send + Sync {
    /// Analyses the input with one prompt and returns the generated text.
    async fn invoke(&self, input: &PreparedInput, prompt: &str) -> Result<Option<String>>;
}

#[async_trait::async_trait]
impl<T> VariantInvoker for Arc<T>
where
    T: VariantInvoker + ?Sized,
{
    async fn invoke(&self, input: &PreparedInput, prompt: &str) -> Result<Option<String>> {
        (**self).invoke(input, prompt).await
    }
}
