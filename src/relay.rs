//! Message relay between active channels and the chat model.

use crate::config::Config;
use crate::conversation::{
    ActivationRegistry, ConversationTurn, DisableOutcome, HistoryStore, ImageRef,
};
use crate::error::{LlmError, Result, StoreError};
use crate::llm::{ChatModelDyn, InlineImage, ModelInput};
use crate::modules::{Module, ModuleRegistry};
use crate::{Attachment, InboundMessage, OutboundResponse};

use std::sync::Arc;
use tokio::sync::Mutex;

/// Prefix for fault notices sent back to the channel.
pub const FAULT_PREFIX: &str = "⚠️ An error occurred: ";

/// Owns the conversation state and forwards messages in active channels to
/// the model.
///
/// The registry and history each sit behind a mutex so command handlers and
/// the relay loop never interleave file writes. The model call itself runs
/// without holding either lock.
pub struct Relay {
    registry: Mutex<ActivationRegistry>,
    history: Mutex<HistoryStore>,
    model: Arc<dyn ChatModelDyn>,
    modules: Arc<ModuleRegistry>,
    http_client: reqwest::Client,
}

impl Relay {
    pub fn new(
        registry: ActivationRegistry,
        history: HistoryStore,
        model: Arc<dyn ChatModelDyn>,
        modules: Arc<ModuleRegistry>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            history: Mutex::new(history),
            model,
            modules,
            http_client,
        }
    }

    /// Load both stores from the configured data directory.
    pub fn load(
        config: &Config,
        model: Arc<dyn ChatModelDyn>,
        modules: Arc<ModuleRegistry>,
        http_client: reqwest::Client,
    ) -> Result<Self> {
        let registry = ActivationRegistry::load(config.registry_path())?;
        let history = HistoryStore::load(config.history_path())?;
        Ok(Self::new(registry, history, model, modules, http_client))
    }

    pub async fn enable(&self, channel_id: &str) -> std::result::Result<bool, StoreError> {
        self.registry.lock().await.enable(channel_id)
    }

    pub async fn disable(
        &self,
        channel_id: &str,
    ) -> std::result::Result<DisableOutcome, StoreError> {
        self.registry.lock().await.disable(channel_id)
    }

    pub async fn is_active(&self, channel_id: &str) -> bool {
        self.registry.lock().await.is_active(channel_id)
    }

    /// Copy of the stored turns for a user in a channel.
    pub async fn history(&self, channel_id: &str, user_id: &str) -> Vec<ConversationTurn> {
        self.history
            .lock()
            .await
            .get_history(channel_id, user_id)
            .to_vec()
    }

    /// Re-read both stores from disk, replacing the in-memory state.
    /// On failure the current state is kept.
    pub async fn reload(&self) -> std::result::Result<(), StoreError> {
        let mut registry = self.registry.lock().await;
        let mut history = self.history.lock().await;

        let fresh_registry = ActivationRegistry::load(registry.path().to_path_buf())?;
        let fresh_history = HistoryStore::load(history.path().to_path_buf())?;

        *registry = fresh_registry;
        *history = fresh_history;
        Ok(())
    }

    /// Handle one inbound message. Returns the reply to send, or `None`
    /// when the message is not relayed, including while the `aichat` module
    /// is unloaded.
    ///
    /// On any fault the user gets an error notice and nothing is recorded.
    pub async fn handle(&self, message: &InboundMessage) -> Option<OutboundResponse> {
        if message.sender_is_bot
            || !self.modules.is_loaded(Module::AiChat).await
            || !self.is_active(&message.channel_id).await
        {
            return None;
        }

        let text = message.text();
        let image_attachments: Vec<&Attachment> = message
            .attachments()
            .iter()
            .filter(|attachment| attachment.is_image())
            .collect();

        if text.trim().is_empty() && image_attachments.is_empty() {
            return None;
        }

        tracing::debug!(
            channel_id = %message.channel_id,
            user_id = %message.sender_id,
            images = image_attachments.len(),
            model = self.model.name(),
            "relaying message"
        );

        let images = match self.fetch_images(&image_attachments).await {
            Ok(images) => images,
            Err(error) => {
                tracing::warn!(%error, channel_id = %message.channel_id, "attachment fetch failed");
                return Some(fault_notice(&error));
            }
        };

        let history = self.history(&message.channel_id, &message.sender_id).await;
        let input = ModelInput {
            text: text.to_string(),
            images,
        };

        let reply = match self.model.generate(&history, &input).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(
                    %error,
                    channel_id = %message.channel_id,
                    user_id = %message.sender_id,
                    "model call failed"
                );
                return Some(fault_notice(&error));
            }
        };

        let image_refs = image_attachments
            .iter()
            .map(|attachment| ImageRef {
                filename: attachment.filename.clone(),
                mime_type: attachment.mime_type.clone(),
                url: attachment.url.clone(),
            })
            .collect();

        let appended = self.history.lock().await.append_exchange(
            &message.channel_id,
            &message.sender_id,
            ConversationTurn::user(text, image_refs),
            ConversationTurn::model(reply.clone()),
        );

        if let Err(error) = appended {
            tracing::error!(%error, channel_id = %message.channel_id, "failed to persist history");
            return Some(fault_notice(&error));
        }

        Some(OutboundResponse::Reply(reply))
    }

    async fn fetch_images(
        &self,
        attachments: &[&Attachment],
    ) -> std::result::Result<Vec<InlineImage>, LlmError> {
        let mut images = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let attachment_error = |reason: String| LlmError::Attachment {
                filename: attachment.filename.clone(),
                reason,
            };

            let response = self
                .http_client
                .get(&attachment.url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|e| attachment_error(e.to_string()))?;
            let data = response
                .bytes()
                .await
                .map_err(|e| attachment_error(e.to_string()))?;

            images.push(InlineImage {
                mime_type: attachment.mime_type.clone(),
                data: data.to_vec(),
            });
        }
        Ok(images)
    }
}

fn fault_notice(error: &dyn std::fmt::Display) -> OutboundResponse {
    OutboundResponse::Reply(format!("{FAULT_PREFIX}{error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageContent;
    use crate::conversation::Part;
    use crate::llm::ChatModel;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed reply, or fails when `reply` is `None`.
    struct ScriptedModel {
        reply: Option<String>,
        calls: AtomicUsize,
        last_history_len: AtomicUsize,
        last_image_count: AtomicUsize,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.into()),
                calls: AtomicUsize::new(0),
                last_history_len: AtomicUsize::new(0),
                last_image_count: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicUsize::new(0),
                last_history_len: AtomicUsize::new(0),
                last_image_count: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            history: &[ConversationTurn],
            input: &ModelInput,
        ) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last_history_len.store(history.len(), Ordering::SeqCst);
            self.last_image_count
                .store(input.images.len(), Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| LlmError::ProviderRequest("quota exceeded".into()))
        }
    }

    fn relay_in(dir: &tempfile::TempDir, model: Arc<ScriptedModel>) -> Relay {
        relay_with(
            dir.path().join("history.json"),
            dir,
            model,
            Arc::new(ModuleRegistry::with_all_loaded()),
        )
    }

    fn relay_with(
        history_path: std::path::PathBuf,
        dir: &tempfile::TempDir,
        model: Arc<ScriptedModel>,
        modules: Arc<ModuleRegistry>,
    ) -> Relay {
        let registry = ActivationRegistry::load(dir.path().join("active_channels.json")).unwrap();
        let history = HistoryStore::load(history_path).unwrap();
        Relay::new(registry, history, model, modules, reqwest::Client::new())
    }

    fn image_message(channel_id: &str, sender_id: &str, url: &str) -> InboundMessage {
        let mut message = message(channel_id, sender_id, "");
        message.content = MessageContent::Media {
            text: Some("what is this?".into()),
            attachments: vec![Attachment {
                filename: "x.png".into(),
                mime_type: "image/png".into(),
                url: url.into(),
            }],
        };
        message
    }

    /// Serve one PNG-typed HTTP response on a local port and return its URL.
    async fn serve_image_once(body: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{address}/x.png")
    }

    fn message(channel_id: &str, sender_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            id: "1".into(),
            source: "test".into(),
            channel_id: channel_id.into(),
            sender_id: sender_id.into(),
            sender_is_bot: false,
            content: MessageContent::Text(text.into()),
            timestamp: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn enable_relay_disable_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("hi there");
        let relay = relay_in(&dir, model.clone());

        relay.enable("100").await.unwrap();
        let response = relay.handle(&message("100", "7", "hello")).await;

        assert_eq!(response, Some(OutboundResponse::Reply("hi there".into())));
        assert_eq!(
            relay.history("100", "7").await,
            vec![
                ConversationTurn::user("hello", Vec::new()),
                ConversationTurn::model("hi there"),
            ]
        );

        assert_eq!(relay.disable("100").await.unwrap(), DisableOutcome::Disabled);
        assert!(!relay.is_active("100").await);

        let response = relay.handle(&message("100", "7", "are you there?")).await;

        assert!(response.is_none());
        assert_eq!(model.calls(), 1);
        assert_eq!(relay.history("100", "7").await.len(), 2);
    }

    #[tokio::test]
    async fn model_fault_is_reported_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::failing();
        let relay = relay_in(&dir, model.clone());
        relay.enable("100").await.unwrap();

        let response = relay.handle(&message("100", "7", "hello")).await;

        let Some(OutboundResponse::Reply(text)) = response else {
            panic!("expected an error notice, got {response:?}");
        };
        assert!(text.starts_with(FAULT_PREFIX));
        assert!(text.contains("quota exceeded"));
        assert!(relay.history("100", "7").await.is_empty());
        assert!(!dir.path().join("history.json").exists());
    }

    #[tokio::test]
    async fn inactive_channel_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("unused");
        let relay = relay_in(&dir, model.clone());

        assert!(relay.handle(&message("100", "7", "hello")).await.is_none());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn bot_and_empty_messages_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("unused");
        let relay = relay_in(&dir, model.clone());
        relay.enable("100").await.unwrap();

        let mut from_bot = message("100", "7", "hello");
        from_bot.sender_is_bot = true;

        assert!(relay.handle(&from_bot).await.is_none());
        assert!(relay.handle(&message("100", "7", "   ")).await.is_none());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn model_sees_prior_history() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("ok");
        let relay = relay_in(&dir, model.clone());
        relay.enable("100").await.unwrap();

        relay.handle(&message("100", "7", "one")).await;
        relay.handle(&message("100", "7", "two")).await;

        assert_eq!(model.last_history_len.load(Ordering::SeqCst), 2);
        assert_eq!(relay.history("100", "7").await.len(), 4);
    }

    #[tokio::test]
    async fn reload_picks_up_files_changed_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay_in(&dir, ScriptedModel::replying("ok"));
        relay.enable("100").await.unwrap();

        std::fs::write(dir.path().join("active_channels.json"), r#"{"200": true}"#).unwrap();
        relay.reload().await.unwrap();

        assert!(!relay.is_active("100").await);
        assert!(relay.is_active("200").await);
    }

    #[tokio::test]
    async fn failed_reload_keeps_current_state() {
        let dir = tempfile::tempdir().unwrap();
        let relay = relay_in(&dir, ScriptedModel::replying("ok"));
        relay.enable("100").await.unwrap();

        std::fs::write(dir.path().join("history.json"), "not json").unwrap();

        assert!(matches!(relay.reload().await, Err(StoreError::Corrupt { .. })));
        assert!(relay.is_active("100").await);
    }

    #[tokio::test]
    async fn image_exchange_sends_bytes_and_records_references() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("a cat");
        let relay = relay_in(&dir, model.clone());
        relay.enable("100").await.unwrap();
        let url = serve_image_once(&[1, 2, 3]).await;

        let response = relay.handle(&image_message("100", "7", &url)).await;

        assert_eq!(response, Some(OutboundResponse::Reply("a cat".into())));
        assert_eq!(model.last_image_count.load(Ordering::SeqCst), 1);
        let history = relay.history("100", "7").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "what is this?");
        assert!(history[0].parts.iter().any(|part| matches!(
            part,
            Part::Image(image) if image.filename == "x.png" && image.url == url
        )));
    }

    #[tokio::test]
    async fn failed_attachment_fetch_is_reported_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("unused");
        let relay = relay_in(&dir, model.clone());
        relay.enable("100").await.unwrap();

        let response = relay
            .handle(&image_message("100", "7", "http://127.0.0.1:1/x.png"))
            .await;

        let Some(OutboundResponse::Reply(text)) = response else {
            panic!("expected an error notice, got {response:?}");
        };
        assert!(text.starts_with(FAULT_PREFIX));
        assert!(text.contains("x.png"));
        assert_eq!(model.calls(), 0);
        assert!(relay.history("100", "7").await.is_empty());
    }

    #[tokio::test]
    async fn history_write_fault_is_reported_and_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let model = ScriptedModel::replying("hi there");
        let relay = relay_with(
            data_dir.join("history.json"),
            &dir,
            model.clone(),
            Arc::new(ModuleRegistry::with_all_loaded()),
        );
        relay.enable("100").await.unwrap();
        // A regular file where the history directory should be.
        std::fs::write(&data_dir, "").unwrap();

        let response = relay.handle(&message("100", "7", "hello")).await;

        let Some(OutboundResponse::Reply(text)) = response else {
            panic!("expected an error notice, got {response:?}");
        };
        assert!(text.starts_with(FAULT_PREFIX));
        assert!(text.contains("history.json"));
        assert_eq!(model.calls(), 1);
        assert!(relay.history("100", "7").await.is_empty());
    }

    #[tokio::test]
    async fn unloaded_aichat_module_stops_relaying() {
        let dir = tempfile::tempdir().unwrap();
        let model = ScriptedModel::replying("ok");
        let modules = Arc::new(ModuleRegistry::with_all_loaded());
        let relay = relay_with(
            dir.path().join("history.json"),
            &dir,
            model.clone(),
            modules.clone(),
        );
        relay.enable("100").await.unwrap();

        modules.unload("aichat").await.unwrap();
        assert!(relay.handle(&message("100", "7", "hello")).await.is_none());
        assert_eq!(model.calls(), 0);

        modules.load("aichat").await.unwrap();
        assert!(relay.handle(&message("100", "7", "hello")).await.is_some());
        assert_eq!(model.calls(), 1);
    }
}
