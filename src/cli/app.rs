//! The interactive loop and its command handlers.

use crate::cli::commands::{self, Command};
use crate::config::{check_temperature, Settings, DEFAULT_MODEL};
use crate::error::Result;
use crate::imaging::UploadedImage;
use crate::llm::accumulator::CURSOR;
use crate::llm::gateway::{CompletionConfig, LlmGateway};
use crate::llm::model_directory::{ModelDirectory, VisionFilter};
use crate::llm::models::MessageRole;
use crate::session::{ConversationMode, Workspace};
use futures::stream::StreamExt;
use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

// Backspace over the one-column cursor, blank it, step back again
const ERASE_CURSOR: &str = "\u{8} \u{8}";

/// Whether the loop keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Chat state plus the output it renders to
pub struct App<W: Write> {
    directory: ModelDirectory,
    workspace: Workspace,
    model: String,
    config: CompletionConfig,
    keep_loaded: bool,
    out: W,
}

impl<W: Write> App<W> {
    pub fn new(gateway: Arc<dyn LlmGateway>, settings: &Settings, model: String, out: W) -> Self {
        Self {
            directory: ModelDirectory::new(gateway),
            workspace: Workspace::new(),
            model,
            config: CompletionConfig {
                temperature: settings.temperature,
            },
            keep_loaded: settings.keep_loaded,
            out,
        }
    }

    /// Start in `mode` instead of single-image mode
    pub fn with_mode(mut self, mode: ConversationMode) -> Self {
        self.workspace.set_mode(mode);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Read lines until `/quit`, end of input or Ctrl-C
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        let mut lines = input.lines();

        loop {
            write!(self.out, "[{}] > ", self.workspace.active_mode())?;
            self.out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                break;
            };

            if self.handle_line(&line).await? == Flow::Quit {
                break;
            }
        }

        self.shutdown().await
    }

    /// Dispatch one line of input; failures are reported and the loop continues
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Flow::Continue);
        }

        let Some(command_text) = line.strip_prefix('/') else {
            self.chat(line).await?;
            return Ok(Flow::Continue);
        };

        let command = match commands::parse(command_text) {
            Ok(command) => command,
            Err(e) => {
                writeln!(self.out, "{}", e.render())?;
                return Ok(Flow::Continue);
            }
        };

        match self.execute(command).await {
            Ok(flow) => Ok(flow),
            Err(e) => {
                writeln!(self.out, "Error: {}", e)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Stream a reply, printing each new piece as it arrives. Ctrl-C abandons it.
    async fn chat(&mut self, text: &str) -> Result<()> {
        self.chat_until(text, tokio::signal::ctrl_c()).await
    }

    /// Stream a reply until it ends or `interrupt` resolves.
    ///
    /// An abandoned reply is not recorded and any attachment stays pending.
    async fn chat_until<F: Future>(&mut self, text: &str, interrupt: F) -> Result<()> {
        let gateway = self.directory.gateway().clone();
        let mut replies =
            self.workspace
                .active()
                .send_stream(gateway.as_ref(), &self.model, text, &self.config);
        tokio::pin!(interrupt);

        // Only the new suffix is printed; the cursor is erased before each write
        let mut shown = 0;
        loop {
            let reply = tokio::select! {
                biased;
                reply = replies.next() => reply,
                _ = &mut interrupt => {
                    if shown > 0 {
                        writeln!(self.out, "{}", ERASE_CURSOR)?;
                    }
                    writeln!(self.out, "Interrupted; the message was not recorded")?;
                    return Ok(());
                }
            };
            let Some(reply) = reply else { break };
            if shown > 0 {
                write!(self.out, "{}", ERASE_CURSOR)?;
            }
            match reply {
                Ok(snapshot) => {
                    if let Some(fresh) = snapshot.get(shown..) {
                        write!(self.out, "{}{}", fresh, CURSOR)?;
                        self.out.flush()?;
                    }
                    shown = snapshot.len();
                }
                Err(e) => {
                    if shown > 0 {
                        writeln!(self.out)?;
                    }
                    writeln!(self.out, "Error: {}", e)?;
                    return Ok(());
                }
            }
        }
        if shown > 0 {
            write!(self.out, "{}", ERASE_CURSOR)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Mode { mode } => {
                self.workspace.set_mode(mode);
                writeln!(self.out, "Switched to {} mode ({} slot(s))", mode, mode.slot_count())?;
            }
            Command::Load { path, slot } => {
                let image = UploadedImage::from_path(&path)?;
                let summary = format!(
                    "{} ({}, {}x{})",
                    image.name,
                    image.mime_type(),
                    image.width,
                    image.height
                );
                let state = self.workspace.active();
                state.load_image(slot_index(slot), image)?;
                writeln!(self.out, "Loaded {} into slot {}", summary, slot)?;
                if !state.is_ready() {
                    writeln!(self.out, "Fill every slot to start chatting")?;
                }
            }
            Command::Rotate { degrees, slot } => {
                let rotation = self.workspace.active().rotate(slot_index(slot), degrees)?;
                writeln!(self.out, "Slot {} now rotated {}°", slot, rotation.degrees())?;
            }
            Command::ResetRotation { slot } => {
                self.workspace.active().reset_rotation(slot_index(slot))?;
                writeln!(self.out, "Slot {} rotation reset", slot)?;
            }
            Command::Remove { slot } => {
                self.workspace.active().remove_image(slot_index(slot))?;
                writeln!(self.out, "Slot {} emptied", slot)?;
            }
            Command::Attach { path } => {
                let image = UploadedImage::from_path(&path)?;
                let name = image.name.clone();
                self.workspace.active().attach(image)?;
                writeln!(self.out, "{} will be sent with your next message", name)?;
            }
            Command::Clear => {
                self.workspace.active().clear();
                writeln!(self.out, "Conversation cleared")?;
            }
            Command::History => self.print_history()?,
            Command::Models { filter, refresh } => self.print_models(filter, refresh).await?,
            Command::Model { name } => match name {
                Some(name) if !name.trim().is_empty() => {
                    info!("Model changed to {}", name);
                    self.model = name.trim().to_string();
                    writeln!(self.out, "Model set to {}", self.model)?;
                }
                _ => writeln!(self.out, "Model: {}", self.model)?,
            },
            Command::Temperature { value } => match value {
                Some(value) => {
                    check_temperature(value)?;
                    self.config.temperature = value;
                    writeln!(self.out, "Temperature set to {}", value)?;
                }
                None => writeln!(self.out, "Temperature: {}", self.config.temperature)?,
            },
            Command::Pull { name } => self.pull(&name).await?,
            Command::Delete { name } => {
                self.directory.delete(&name).await?;
                writeln!(self.out, "Deleted {}", name)?;
            }
            Command::Ps => {
                let running = self.directory.running().await?;
                if running.is_empty() {
                    writeln!(self.out, "No models loaded")?;
                }
                for model in running {
                    writeln!(self.out, "  {:<40} {:>8.2} GiB", model.name, model.size_gib())?;
                }
            }
            Command::Unload { name } => match name {
                Some(name) => {
                    self.directory.gateway().unload_model(&name).await?;
                    writeln!(self.out, "Unloaded {}", name)?;
                }
                None => {
                    let report = self.directory.unload_all().await?;
                    writeln!(self.out, "Unloaded {} model(s)", report.count())?;
                    for name in &report.failed {
                        writeln!(self.out, "  could not unload {}", name)?;
                    }
                }
            },
            Command::SaveComposite { path } => {
                let Some(composite) = self.workspace.active().composite() else {
                    writeln!(self.out, "No composite yet; load every slot in dual or triple mode")?;
                    return Ok(Flow::Continue);
                };
                tokio::fs::write(&path, composite.bytes()).await?;
                writeln!(
                    self.out,
                    "Wrote {}x{} composite to {}",
                    composite.width(),
                    composite.height(),
                    path.display()
                )?;
            }
            Command::Status => self.print_status()?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn print_history(&mut self) -> Result<()> {
        let history = self.workspace.active().conversation().history().to_vec();
        if history.is_empty() {
            writeln!(self.out, "No messages yet")?;
        }
        for (i, turn) in history.iter().enumerate() {
            let who = match turn.role {
                MessageRole::User => "you",
                MessageRole::Assistant => "model",
            };
            let marker = if turn.attachment.is_some() { " [+image]" } else { "" };
            writeln!(self.out, "{:>3}. {}{}: {}", i + 1, who, marker, turn.content)?;
        }
        Ok(())
    }

    async fn print_models(&mut self, filter: VisionFilter, refresh: bool) -> Result<()> {
        if refresh {
            self.directory.invalidate();
        }
        let listing = self.directory.list_models(filter).await;

        if let Some(failure) = &listing.failure {
            writeln!(self.out, "No models available: {}", failure)?;
            return Ok(());
        }
        if listing.models.is_empty() {
            writeln!(self.out, "No matching models installed")?;
        }
        for model in &listing.models {
            let current = if model.name == self.model { "*" } else { " " };
            let vision = if model.vision { "vision" } else { "" };
            let gib = model.size as f64 / (1024.0 * 1024.0 * 1024.0);
            writeln!(self.out, "{} {:<40} {:>8.2} GiB  {}", current, model.name, gib, vision)?;
        }
        Ok(())
    }

    /// Download with progress; Ctrl-C abandons the download
    async fn pull(&mut self, name: &str) -> Result<()> {
        let mut progress = self.directory.pull(name);
        let mut last_status = String::new();
        let interrupt = tokio::signal::ctrl_c();
        tokio::pin!(interrupt);

        loop {
            let update = tokio::select! {
                biased;
                update = progress.next() => update,
                _ = &mut interrupt => {
                    writeln!(self.out, "\rPull of {} interrupted", name)?;
                    return Ok(());
                }
            };
            let Some(update) = update else { break };
            let update = update?;
            match update.fraction() {
                Some(fraction) => {
                    write!(self.out, "\r{}: {:>5.1}%", update.status, fraction * 100.0)?;
                    self.out.flush()?;
                }
                None if update.status != last_status => {
                    writeln!(self.out, "\r{}", update.status)?;
                }
                None => {}
            }
            last_status = update.status;
        }
        writeln!(self.out, "\rPulled {}", name)?;
        Ok(())
    }

    fn print_status(&mut self) -> Result<()> {
        let mode = self.workspace.active_mode();
        let state = self.workspace.active();
        let mut lines = vec![
            format!("Mode:        {}", mode),
            format!("Model:       {}", self.model),
            format!("Temperature: {}", self.config.temperature),
            format!("Ollama:      {}", self.directory.gateway().host()),
        ];
        for (i, slot) in state.slots().iter().enumerate() {
            let content = match &slot.image {
                Some(img) => format!(
                    "{} ({}, {}x{}), {}°",
                    img.name,
                    img.mime_type(),
                    img.width,
                    img.height,
                    slot.rotation.degrees()
                ),
                None => "empty".to_string(),
            };
            lines.push(format!("Slot {}:      {}", i + 1, content));
        }
        if let Some(composite) = state.composite() {
            lines.push(format!("Composite:   {}x{}", composite.width(), composite.height()));
        }
        if let Some(attachment) = state.pending_attachment() {
            lines.push(format!("Attachment:  {}", attachment.name));
        }
        lines.push(format!("Turns:       {}", state.conversation().history().len()));
        lines.push(format!("Ready:       {}", if state.is_ready() { "yes" } else { "no" }));

        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }

    /// Unload models on the way out unless asked to keep them
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.keep_loaded {
            return Ok(());
        }
        match self.directory.unload_all().await {
            Ok(report) if report.count() > 0 => {
                writeln!(self.out, "Unloaded {} model(s)", report.count())?;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not unload models on exit: {}", e),
        }
        Ok(())
    }
}

/// The configured model, or the first vision model installed, or [`DEFAULT_MODEL`]
pub async fn resolve_model(directory: &ModelDirectory, requested: Option<String>) -> String {
    if let Some(model) = requested {
        return model;
    }

    let listing = directory.list_models(VisionFilter::Keyword).await;
    if let Some(failure) = &listing.failure {
        warn!("Could not list models ({}), using {}", failure, DEFAULT_MODEL);
    }
    listing
        .models
        .into_iter()
        .next()
        .map(|m| m.name)
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

// Slots are numbered from 1 on screen
fn slot_index(slot: usize) -> usize {
    slot.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::codec::tests::solid_png;
    use crate::session::conversation::tests::MockGateway;
    use std::time::Duration;

    fn app(gateway: MockGateway) -> App<Vec<u8>> {
        let settings = Settings {
            keep_loaded: true,
            ..Settings::default()
        };
        App::new(Arc::new(gateway), &settings, "llava".to_string(), Vec::new())
    }

    fn output(app: App<Vec<u8>>) -> String {
        String::from_utf8(app.into_output()).unwrap()
    }

    fn image_file(width: u32, height: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&solid_png(width, height, [90, 90, 200])).unwrap();
        file
    }

    #[tokio::test]
    async fn test_chat_without_image_prints_prompt_to_load() {
        let mut app = app(MockGateway::replying(&["never"]));

        let flow = app.handle_line("what is this?").await.unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(output(app).contains("Please load an image first"));
    }

    #[tokio::test]
    async fn test_load_then_chat_streams_reply() {
        let file = image_file(8, 8);
        let mut app = app(MockGateway::replying(&["A blue", " square."]));

        app.handle_line(&format!("/load \"{}\"", file.path().display())).await.unwrap();
        app.handle_line("what is this?").await.unwrap();

        let history_len = app.workspace_mut().active().conversation().history().len();
        assert_eq!(history_len, 2);
        let text = output(app).replace(CURSOR, "").replace(ERASE_CURSOR, "");
        assert!(text.contains("Loaded"));
        assert!(text.contains("A blue square.\n"));
    }

    #[tokio::test]
    async fn test_bad_command_keeps_running() {
        let mut app = app(MockGateway::replying(&[]));

        assert_eq!(app.handle_line("/rotate 45").await.unwrap(), Flow::Continue);
        assert_eq!(app.handle_line("/nonsense").await.unwrap(), Flow::Continue);
        assert_eq!(app.handle_line("/temperature 3.5").await.unwrap(), Flow::Continue);
        assert_eq!(app.handle_line("/quit").await.unwrap(), Flow::Quit);

        let text = output(app);
        assert!(text.contains("Error:"));
    }

    #[tokio::test]
    async fn test_mode_and_model_commands() {
        let mut app = app(MockGateway::replying(&[]));

        app.handle_line("/mode dual").await.unwrap();
        app.handle_line("/model qwen2.5vl:7b").await.unwrap();
        app.handle_line("/temperature 1.1").await.unwrap();

        assert_eq!(app.workspace().active_mode(), ConversationMode::Dual);
        assert_eq!(app.model(), "qwen2.5vl:7b");
        assert_eq!(app.config.temperature, 1.1);
    }

    #[tokio::test]
    async fn test_save_composite_writes_jpeg() {
        let left = image_file(20, 10);
        let right = image_file(10, 10);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("composite.jpg");
        let mut app = app(MockGateway::replying(&[]));

        app.handle_line("/mode dual").await.unwrap();
        app.handle_line(&format!("/load \"{}\"", left.path().display())).await.unwrap();
        app.handle_line(&format!("/load \"{}\" --slot 2", right.path().display()))
            .await
            .unwrap();
        app.handle_line(&format!("/save-composite \"{}\"", target.display()))
            .await
            .unwrap();

        let written = std::fs::read(&target).unwrap();
        assert_eq!(&written[..2], &[0xFF, 0xD8]);
        assert!(output(app).contains("30x10"));
    }

    #[tokio::test]
    async fn test_run_stops_at_end_of_input() {
        let mut app = app(MockGateway::replying(&[]));
        let input = tokio::io::BufReader::new("/status\n".as_bytes());

        app.run(input).await.unwrap();

        let text = output(app);
        assert!(text.contains("Mode:        single"));
        assert!(text.contains("Slot 1:      empty"));
    }

    #[tokio::test]
    async fn test_resolve_model_prefers_request_then_default() {
        let directory = ModelDirectory::new(Arc::new(MockGateway::replying(&[])));

        assert_eq!(resolve_model(&directory, Some("bakllava".to_string())).await, "bakllava");
        assert_eq!(resolve_model(&directory, None).await, DEFAULT_MODEL);
    }

    #[test]
    fn test_slot_index_is_one_based() {
        assert_eq!(slot_index(1), 0);
        assert_eq!(slot_index(3), 2);
    }

    #[tokio::test]
    async fn test_slot_zero_is_rejected() {
        let file = image_file(4, 4);
        let mut app = app(MockGateway::replying(&[]));

        let flow = app
            .handle_line(&format!("/load \"{}\" --slot 0", file.path().display()))
            .await
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert!(app.workspace_mut().active().slots()[0].image.is_none());
    }

    #[tokio::test]
    async fn test_interrupted_reply_is_not_recorded() {
        let file = image_file(8, 8);
        let mut app = app(MockGateway::stalling_after(&["A blue"]));
        app.handle_line(&format!("/load \"{}\"", file.path().display())).await.unwrap();
        app.handle_line(&format!("/attach \"{}\"", file.path().display())).await.unwrap();

        app.chat_until("what is this?", tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        let state = app.workspace_mut().active();
        assert!(state.conversation().is_empty());
        assert!(state.pending_attachment().is_some());
        let text = output(app);
        assert!(text.contains("A blue"));
        assert!(text.contains("Interrupted"));
    }

    #[tokio::test]
    async fn test_status_shows_image_type() {
        let file = image_file(6, 3);
        let mut app = app(MockGateway::replying(&[]));

        app.handle_line(&format!("/load \"{}\"", file.path().display())).await.unwrap();
        app.handle_line("/status").await.unwrap();

        let text = output(app);
        assert!(text.contains("image/png, 6x3"));
        assert!(text.contains("Ready:       yes"));
    }
}
