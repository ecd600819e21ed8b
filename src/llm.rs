//! Language model providers.

pub mod gemini;
pub mod traits;

pub use gemini::GeminiModel;
pub use traits::{ChatModel, ChatModelDyn};

/// The message being sent to the model, on top of the stored history.
#[derive(Debug, Clone, Default)]
pub struct ModelInput {
    pub text: String,
    pub images: Vec<InlineImage>,
}

/// Image bytes sent inline with the current message.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}
