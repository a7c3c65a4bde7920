//! Per-mode image slots and the conversation bound to them.
//!
//! Each mode (single, dual, triple) keeps its own slots, rotations and history, created
//! the first time the mode is used. Any change to a slot recomputes the conversation's
//! primary payload: the rotated image in single mode, or a fresh composite once every
//! slot in a multi-image mode is filled.

use crate::error::{Result, VisionChatError};
use crate::imaging::{compose, encode, rotate, CompositeImage, Rotation, UploadedImage};
use crate::llm::gateway::{CompletionConfig, LlmGateway};
use crate::session::conversation::Conversation;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use tracing::{debug, info};

/// How many images a conversation is about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConversationMode {
    #[default]
    Single,
    Dual,
    Triple,
}

impl ConversationMode {
    pub const ALL: [ConversationMode; 3] = [Self::Single, Self::Dual, Self::Triple];

    pub fn slot_count(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Dual => 2,
            Self::Triple => 3,
        }
    }
}

impl fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Single => "single",
            Self::Dual => "dual",
            Self::Triple => "triple",
        };
        f.write_str(label)
    }
}

impl FromStr for ConversationMode {
    type Err = VisionChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "1" => Ok(Self::Single),
            "dual" | "2" => Ok(Self::Dual),
            "triple" | "3" => Ok(Self::Triple),
            other => Err(VisionChatError::ConfigError(format!(
                "unknown mode '{}', expected single, dual or triple",
                other
            ))),
        }
    }
}

/// One image position and its on-screen rotation
#[derive(Debug, Clone, Default)]
pub struct ImageSlot {
    pub image: Option<UploadedImage>,
    pub rotation: Rotation,
}

/// Everything belonging to one mode
#[derive(Debug, Clone)]
pub struct ModeState {
    mode: ConversationMode,
    slots: Vec<ImageSlot>,
    pending_attachment: Option<UploadedImage>,
    composite: Option<CompositeImage>,
    conversation: Conversation,
}

impl ModeState {
    pub fn new(mode: ConversationMode) -> Self {
        let conversation = match mode {
            ConversationMode::Single => Conversation::with_attachments(),
            _ => Conversation::new(),
        };
        Self {
            mode,
            slots: vec![ImageSlot::default(); mode.slot_count()],
            pending_attachment: None,
            composite: None,
            conversation,
        }
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    pub fn slots(&self) -> &[ImageSlot] {
        &self.slots
    }

    pub fn composite(&self) -> Option<&CompositeImage> {
        self.composite.as_ref()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn pending_attachment(&self) -> Option<&UploadedImage> {
        self.pending_attachment.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.conversation.has_primary()
    }

    /// Put an image in a slot (0-based), resetting that slot's rotation
    pub fn load_image(&mut self, slot: usize, image: UploadedImage) -> Result<()> {
        let entry = self.slot_mut(slot)?;
        info!("Loaded {} ({}x{}) into slot {}", image.name, image.width, image.height, slot + 1);
        entry.image = Some(image);
        entry.rotation = Rotation::default();
        self.rebind()
    }

    /// Turn a slot's image by a further multiple of 90 degrees
    pub fn rotate(&mut self, slot: usize, degrees: i32) -> Result<Rotation> {
        let entry = self.slot_mut(slot)?;
        if entry.image.is_none() {
            return Err(VisionChatError::MissingImage(format!("slot {} is empty", slot + 1)));
        }
        let rotation = entry.rotation.turned(degrees)?;
        entry.rotation = rotation;
        self.rebind()?;
        Ok(rotation)
    }

    pub fn reset_rotation(&mut self, slot: usize) -> Result<()> {
        self.slot_mut(slot)?.rotation = Rotation::default();
        self.rebind()
    }

    pub fn remove_image(&mut self, slot: usize) -> Result<()> {
        let entry = self.slot_mut(slot)?;
        entry.image = None;
        entry.rotation = Rotation::default();
        self.rebind()
    }

    /// Queue an image to go out with the next message
    pub fn attach(&mut self, image: UploadedImage) -> Result<()> {
        if !self.conversation.allows_attachments() {
            return Err(VisionChatError::ConfigError(format!(
                "attachments are not available in {} mode",
                self.mode
            )));
        }
        self.pending_attachment = Some(image);
        Ok(())
    }

    /// Empty the slots and forget the conversation
    pub fn clear(&mut self) {
        self.slots = vec![ImageSlot::default(); self.mode.slot_count()];
        self.pending_attachment = None;
        self.composite = None;
        self.conversation.clear();
    }

    /// Send a message with any pending attachment.
    ///
    /// The attachment is only consumed once the reply completes; after a failed or
    /// dropped send it stays pending for the next message.
    pub fn send_stream<'a>(
        &'a mut self,
        gateway: &'a dyn LlmGateway,
        model: &'a str,
        text: &str,
        config: &'a CompletionConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<String>> + 'a>> {
        let text = text.to_string();
        let encoded = self.pending_attachment.as_ref().map(UploadedImage::to_base64);

        Box::pin(async_stream::stream! {
            let mut failed = false;
            {
                let mut replies = self
                    .conversation
                    .send_stream(gateway, model, &text, encoded, config);
                while let Some(reply) = replies.next().await {
                    failed |= reply.is_err();
                    yield reply;
                }
            }
            if !failed {
                self.pending_attachment = None;
            }
        })
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut ImageSlot> {
        let count = self.slots.len();
        self.slots.get_mut(slot).ok_or_else(|| {
            VisionChatError::ConfigError(format!(
                "slot {} does not exist, {} mode has {} slot(s)",
                slot + 1,
                self.mode,
                count
            ))
        })
    }

    /// Recompute the primary payload from the slots.
    ///
    /// A failure leaves the conversation unbound.
    fn rebind(&mut self) -> Result<()> {
        self.conversation.unbind_primary();
        self.composite = None;

        if self.slots.iter().any(|s| s.image.is_none()) {
            return Ok(());
        }

        let rotated = self
            .slots
            .iter()
            .filter_map(|s| s.image.as_ref().map(|img| (img, s.rotation)))
            .map(|(img, rotation)| rotate(&img.bytes, i32::from(rotation.degrees())))
            .collect::<Result<Vec<Vec<u8>>>>()?;

        match self.mode {
            ConversationMode::Single => {
                self.conversation.bind_primary(rotated.iter().map(|b| encode(b)).collect());
            }
            ConversationMode::Dual | ConversationMode::Triple => {
                let inputs: Vec<&[u8]> = rotated.iter().map(Vec::as_slice).collect();
                let composite = compose(&inputs)?;
                debug!("Bound {}x{} composite", composite.width(), composite.height());
                self.conversation.bind_primary(vec![composite.to_base64()]);
                self.composite = Some(composite);
            }
        }
        Ok(())
    }
}

/// All modes the user has touched, and which one is active
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    active: ConversationMode,
    modes: HashMap<ConversationMode, ModeState>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: ConversationMode) -> Self {
        Self {
            active: mode,
            modes: HashMap::new(),
        }
    }

    pub fn active_mode(&self) -> ConversationMode {
        self.active
    }

    /// Switch modes; the previous mode keeps its state
    pub fn set_mode(&mut self, mode: ConversationMode) {
        self.active = mode;
    }

    /// State of the active mode, created on first use
    pub fn active(&mut self) -> &mut ModeState {
        self.mode(self.active)
    }

    pub fn mode(&mut self, mode: ConversationMode) -> &mut ModeState {
        self.modes.entry(mode).or_insert_with(|| ModeState::new(mode))
    }

    /// Read-only view, `None` if the mode was never used
    pub fn peek(&self, mode: ConversationMode) -> Option<&ModeState> {
        self.modes.get(&mode)
    }
}
