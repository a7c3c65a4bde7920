//! Conversation history for one chat mode.
//!
//! The conversation owns the ordered turns and the "primary" image payload(s) the chat
//! is about. The primary payload rides on the first user turn only, so large images are
//! not re-sent every turn. When ad-hoc attachments are enabled, a user turn may carry
//! one extra image, sent alongside the primary payload on that turn.

use crate::error::{Result, VisionChatError};
use crate::llm::accumulator::ResponseAccumulator;
use crate::llm::gateway::{CompletionConfig, LlmGateway, StreamChunk};
use crate::llm::models::{ChatMessage, MessageRole};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, warn};

/// One turn in the history
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    /// Base64 of an ad-hoc image sent with this turn only
    pub attachment: Option<String>,
}

/// Ordered chat history plus the image binding it refers to
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    history: Vec<Message>,
    primary: Option<Vec<String>>,
    in_flight: Option<ResponseAccumulator>,
    allow_attachments: bool,
}

impl Conversation {
    /// A conversation whose user turns may carry ad-hoc attachments
    pub fn with_attachments() -> Self {
        Self {
            allow_attachments: true,
            ..Default::default()
        }
    }

    /// A conversation about the primary image(s) only
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allows_attachments(&self) -> bool {
        self.allow_attachments
    }

    /// Bind the base64 payload(s) every request in this conversation is about
    pub fn bind_primary(&mut self, images: Vec<String>) {
        self.primary = (!images.is_empty()).then_some(images);
    }

    pub fn unbind_primary(&mut self) {
        self.primary = None;
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn append_user(&mut self, text: impl Into<String>, attachment: Option<String>) {
        self.history.push(Message {
            role: MessageRole::User,
            content: text.into(),
            attachment,
        });
    }

    /// Grow the in-flight assistant reply and return it in full
    pub fn append_assistant_partial(&mut self, delta: &str) -> &str {
        self.in_flight.get_or_insert_with(ResponseAccumulator::new).push(delta)
    }

    /// Reply text built up with `append_assistant_partial` and not yet committed
    pub fn partial(&self) -> Option<&str> {
        self.in_flight.as_ref().map(ResponseAccumulator::snapshot)
    }

    /// Commit an assistant reply; any in-flight text is superseded
    pub fn append_assistant_final(&mut self, text: impl Into<String>) {
        self.in_flight = None;
        self.history.push(Message {
            role: MessageRole::Assistant,
            content: text.into(),
            attachment: None,
        });
    }

    pub fn discard_partial(&mut self) {
        self.in_flight = None;
    }

    /// Forget everything, including the image binding
    pub fn clear(&mut self) {
        self.history.clear();
        self.in_flight = None;
        self.primary = None;
    }

    /// Build the message list for `/api/chat`.
    ///
    /// The first user turn carries the primary payload(s) (plus its own attachment, if
    /// any). Later user turns carry images only when they have an attachment, in which
    /// case they send the primary payload(s) followed by the attachment. Assistant
    /// turns never carry images.
    pub fn to_request_messages(&self) -> Vec<ChatMessage> {
        self.request_messages(None)
    }

    // History plus an uncommitted user turn
    fn request_messages(&self, pending: Option<&Message>) -> Vec<ChatMessage> {
        let primary = self.primary.clone().unwrap_or_default();
        let mut seen_user = false;

        self.history
            .iter()
            .chain(pending)
            .map(|turn| match turn.role {
                MessageRole::Assistant => ChatMessage::assistant(turn.content.clone()),
                MessageRole::User => {
                    let first = !seen_user;
                    seen_user = true;

                    let mut images = if first || turn.attachment.is_some() {
                        primary.clone()
                    } else {
                        Vec::new()
                    };
                    if let Some(attachment) = &turn.attachment {
                        images.push(attachment.clone());
                    }

                    let message = ChatMessage::user(turn.content.clone());
                    if images.is_empty() {
                        message
                    } else {
                        message.with_images(images)
                    }
                }
            })
            .collect()
    }

    /// Send a user turn and stream the reply as growing full-buffer snapshots.
    ///
    /// Without a bound primary image this fails before any gateway call. History is
    /// only touched once the reply completes, when the user turn and the reply are
    /// committed together. A failed or dropped stream leaves history as it was.
    pub fn send_stream<'a>(
        &'a mut self,
        gateway: &'a dyn LlmGateway,
        model: &'a str,
        text: &str,
        attachment: Option<String>,
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<String>> + 'a>> {
        let text = text.to_string();

        Box::pin(async_stream::stream! {
            if !self.has_primary() {
                yield Err(VisionChatError::MissingImage(
                    "Please load an image first".to_string(),
                ));
                return;
            }
            if attachment.is_some() && !self.allow_attachments {
                yield Err(VisionChatError::ConfigError(
                    "attachments are only available in single-image mode".to_string(),
                ));
                return;
            }

            self.discard_partial();
            let turn = Message {
                role: MessageRole::User,
                content: text,
                attachment,
            };
            let messages = self.request_messages(Some(&turn));
            debug!("Sending {} message(s) to {}", messages.len(), model);

            let mut reply = ResponseAccumulator::new();
            {
                let mut chunks = gateway.complete_stream(model, &messages, config);
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(StreamChunk::Content(delta)) => {
                            if !delta.is_empty() {
                                yield Ok(reply.push(&delta).to_string());
                            }
                        }
                        Ok(StreamChunk::Done) => break,
                        Err(e) => {
                            warn!("Chat failed, turn not recorded: {}", e);
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            self.history.push(turn);
            self.append_assistant_final(reply.finish());
        })
    }

    /// Send a user turn and wait for the whole reply
    pub async fn send(
        &mut self,
        gateway: &dyn LlmGateway,
        model: &str,
        text: &str,
        attachment: Option<String>,
        config: &CompletionConfig,
    ) -> Result<String> {
        let mut last = String::new();
        let mut stream = self.send_stream(gateway, model, text, attachment, config);
        while let Some(snapshot) = stream.next().await {
            last = snapshot?;
        }
        Ok(last)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::gateway::{ChunkStream, PullStream};
    use crate::llm::models::{ModelDetails, ModelSummary, RunningModel};
    use futures::stream;
    use std::sync::Mutex;

    /// Gateway that replays scripted chat chunks and counts calls
    pub(crate) struct MockGateway {
        chunks: Vec<std::result::Result<String, u16>>,
        stall: bool,
        pub(crate) chat_calls: Mutex<usize>,
        pub(crate) last_messages: Mutex<Vec<ChatMessage>>,
    }

    impl MockGateway {
        pub(crate) fn replying(parts: &[&str]) -> Self {
            Self {
                chunks: parts.iter().map(|p| Ok(p.to_string())).collect(),
                stall: false,
                chat_calls: Mutex::new(0),
                last_messages: Mutex::new(Vec::new()),
            }
        }

        /// Streams `parts`, then fails with an HTTP status
        pub(crate) fn failing_after(parts: &[&str], status: u16) -> Self {
            let mut gateway = Self::replying(parts);
            gateway.chunks.push(Err(status));
            gateway
        }

        /// Streams `parts`, then never produces another chunk
        pub(crate) fn stalling_after(parts: &[&str]) -> Self {
            let mut gateway = Self::replying(parts);
            gateway.stall = true;
            gateway
        }

        pub(crate) fn calls(&self) -> usize {
            *self.chat_calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl LlmGateway for MockGateway {
        fn complete_stream<'a>(
            &'a self,
            _model: &'a str,
            messages: &'a [ChatMessage],
            _config: &'a CompletionConfig,
        ) -> ChunkStream<'a> {
            *self.chat_calls.lock().unwrap() += 1;
            *self.last_messages.lock().unwrap() = messages.to_vec();

            let mut items: Vec<Result<StreamChunk>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(text) => Ok(StreamChunk::Content(text.clone())),
                    Err(status) => Err(VisionChatError::Status {
                        status: *status,
                        body: "server error".to_string(),
                    }),
                })
                .collect();
            if self.stall {
                return Box::pin(stream::iter(items).chain(stream::pending()));
            }
            if self.chunks.iter().all(|c| c.is_ok()) {
                items.push(Ok(StreamChunk::Done));
            }
            Box::pin(stream::iter(items))
        }

        async fn get_available_models(&self) -> Result<Vec<ModelSummary>> {
            Ok(vec![])
        }

        async fn show_model(&self, _name: &str) -> Result<ModelDetails> {
            Ok(ModelDetails::default())
        }

        fn pull_model<'a>(&'a self, _name: &'a str) -> PullStream<'a> {
            Box::pin(stream::empty())
        }

        async fn delete_model(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn running_models(&self) -> Result<Vec<RunningModel>> {
            Ok(vec![])
        }

        async fn unload_model(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        fn host(&self) -> &str {
            "http://mock"
        }
    }

    fn bound() -> Conversation {
        let mut conversation = Conversation::with_attachments();
        conversation.bind_primary(vec!["UFJJTUFSWQ==".to_string()]);
        conversation
    }

    fn with_images(messages: &[ChatMessage]) -> usize {
        messages.iter().filter(|m| m.images.is_some()).count()
    }

    #[test]
    fn test_images_only_on_first_user_turn() {
        let mut conversation = bound();
        conversation.append_user("What is this?", None);
        conversation.append_assistant_final("A cat.");
        conversation.append_user("What color?", None);
        conversation.append_assistant_final("Orange.");
        conversation.append_user("How old?", None);

        let messages = conversation.to_request_messages();

        assert_eq!(messages.len(), 5);
        assert_eq!(with_images(&messages), 1);
        assert_eq!(messages[0].images, Some(vec!["UFJJTUFSWQ==".to_string()]));
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(messages[1].images.is_none());
    }

    #[test]
    fn test_later_attachment_sends_primary_and_attachment() {
        let mut conversation = bound();
        conversation.append_user("What is this?", None);
        conversation.append_assistant_final("A cat.");
        conversation.append_user("And this one?", Some("QVRUQUNI".to_string()));

        let messages = conversation.to_request_messages();

        assert_eq!(with_images(&messages), 2);
        assert_eq!(
            messages[2].images,
            Some(vec!["UFJJTUFSWQ==".to_string(), "QVRUQUNI".to_string()])
        );
    }

    #[test]
    fn test_first_turn_keeps_its_attachment() {
        let mut conversation = bound();
        conversation.append_user("Compare", Some("QVRUQUNI".to_string()));

        let messages = conversation.to_request_messages();
        assert_eq!(messages[0].images.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_clear_empties_request_and_binding() {
        let mut conversation = bound();
        conversation.append_user("What is this?", None);
        conversation.append_assistant_partial("A c");

        conversation.clear();

        assert!(conversation.to_request_messages().is_empty());
        assert!(!conversation.has_primary());
        assert!(conversation.partial().is_none());
    }

    #[test]
    fn test_partial_grows_and_final_commits() {
        let mut conversation = bound();
        conversation.append_user("Hi", None);

        assert_eq!(conversation.append_assistant_partial("Hel"), "Hel");
        assert_eq!(conversation.append_assistant_partial("lo"), "Hello");
        assert_eq!(conversation.to_request_messages().len(), 1);

        conversation.append_assistant_final("Hello");
        assert!(conversation.partial().is_none());
        assert_eq!(conversation.history().last().unwrap().content, "Hello");
    }

    #[test]
    fn test_bind_empty_payload_is_unbound() {
        let mut conversation = Conversation::new();
        conversation.bind_primary(vec![]);
        assert!(!conversation.has_primary());
        assert!(!conversation.allows_attachments());
    }

    #[tokio::test]
    async fn test_send_stream_commits_reply() {
        let gateway = MockGateway::replying(&["Hel", "lo", " world"]);
        let config = CompletionConfig::default();
        let mut conversation = bound();

        let snapshots: Vec<String> = conversation
            .send_stream(&gateway, "llava", "Describe", None, &config)
            .map(|s| s.unwrap())
            .collect()
            .await;

        assert_eq!(snapshots, vec!["Hel", "Hello", "Hello world"]);
        assert_eq!(conversation.history().len(), 2);
        assert_eq!(conversation.history()[1].content, "Hello world");
        assert!(conversation.partial().is_none());

        let sent = gateway.last_messages.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].images.is_some());
    }

    #[tokio::test]
    async fn test_send_without_image_makes_no_call() {
        let gateway = MockGateway::replying(&["never"]);
        let config = CompletionConfig::default();
        let mut conversation = Conversation::new();

        let result = conversation.send(&gateway, "llava", "Describe", None, &config).await;

        assert!(matches!(result, Err(VisionChatError::MissingImage(_))));
        assert_eq!(gateway.calls(), 0);
        assert!(conversation.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_leaves_history_unchanged() {
        let gateway = MockGateway::failing_after(&["partial "], 500);
        let config = CompletionConfig::default();
        let mut conversation = bound();
        conversation.append_user("First", None);
        conversation.append_assistant_final("Reply");
        let before = conversation.history().to_vec();

        let result = conversation.send(&gateway, "llava", "Second", None, &config).await;

        assert!(matches!(result, Err(VisionChatError::Status { status: 500, .. })));
        assert_eq!(conversation.history(), before.as_slice());
        assert!(conversation.partial().is_none());
    }

    #[tokio::test]
    async fn test_dropped_stream_leaves_history_unchanged() {
        let gateway = MockGateway::stalling_after(&["Hel", "lo"]);
        let config = CompletionConfig::default();
        let mut conversation = bound();

        {
            let mut stream = conversation.send_stream(&gateway, "llava", "Describe", None, &config);
            assert_eq!(stream.next().await.unwrap().unwrap(), "Hel");
        }

        assert!(conversation.is_empty());
        assert!(conversation.partial().is_none());

        let retry = MockGateway::replying(&["A cat."]);
        let reply = conversation.send(&retry, "llava", "Describe", None, &config).await.unwrap();

        assert_eq!(reply, "A cat.");
        let roles: Vec<MessageRole> = conversation.history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
        assert_eq!(with_images(&retry.last_messages.lock().unwrap()), 1);
    }

    #[tokio::test]
    async fn test_attachment_rejected_when_disabled() {
        let gateway = MockGateway::replying(&["x"]);
        let config = CompletionConfig::default();
        let mut conversation = Conversation::new();
        conversation.bind_primary(vec!["Q09NUE9TSVRF".to_string()]);

        let result = conversation
            .send(&gateway, "llava", "Hi", Some("QVRU".to_string()), &config)
            .await;

        assert!(matches!(result, Err(VisionChatError::ConfigError(_))));
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_turn_sends_full_history_without_images() {
        let gateway = MockGateway::replying(&["ok"]);
        let config = CompletionConfig::default();
        let mut conversation = bound();

        conversation.send(&gateway, "llava", "One", None, &config).await.unwrap();
        conversation.send(&gateway, "llava", "Two", None, &config).await.unwrap();

        let sent = gateway.last_messages.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(with_images(&sent), 1);
        assert_eq!(sent[2].content, "Two");
        assert_eq!(gateway.calls(), 2);
    }
}
