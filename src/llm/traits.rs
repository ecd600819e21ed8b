//! Chat model trait and dynamic dispatch companion.

use crate::conversation::ConversationTurn;
use crate::error::LlmError;
use crate::llm::ModelInput;

use std::future::Future;
use std::pin::Pin;

/// Static trait for model providers.
pub trait ChatModel: Send + Sync + 'static {
    /// Model name for logging.
    fn name(&self) -> &str;

    /// Generate a reply to `input` given the prior conversation.
    fn generate(
        &self,
        history: &[ConversationTurn],
        input: &ModelInput,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ChatModelDyn>`.
pub trait ChatModelDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn generate<'a>(
        &'a self,
        history: &'a [ConversationTurn],
        input: &'a ModelInput,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing ChatModel automatically implements ChatModelDyn.
impl<T: ChatModel> ChatModelDyn for T {
    fn name(&self) -> &str {
        ChatModel::name(self)
    }

    fn generate<'a>(
        &'a self,
        history: &'a [ConversationTurn],
        input: &'a ModelInput,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        Box::pin(ChatModel::generate(self, history, input))
    }
}
