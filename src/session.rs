//! A chat session: one user, one transport, one pipeline.
//!
//! The session object holds what would otherwise be ambient globals (current
//! user, theme, last-seen message). [`ChatSession::run`] is a single task that
//! multiplexes transport batches and user commands with `tokio::select!`, so
//! ingestion calls never overlap.

use std::path::Path;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::identity::{validate_name, IdentityStore, Theme};
use crate::input::{Command, HELP_TEXT};
use crate::message::{encode_data_uri, mime_for_path, Draft, MessageRecord, Payload};
use crate::pipeline::IngestionPipeline;
use crate::render::Renderer;
use crate::transport::{batch_channel, Transport};

pub struct ChatSession<T: Transport, R, S> {
    transport: T,
    renderer: R,
    store: S,
    pipeline: IngestionPipeline<T::Id>,
    current_user: String,
    theme: Theme,
}

impl<T, R, S> ChatSession<T, R, S>
where
    T: Transport,
    R: Renderer<T::Id>,
    S: IdentityStore,
{
    /// Establish the session identity and load the saved theme.
    ///
    /// `name` wins over the stored name and is persisted. With neither, the
    /// session cannot start.
    pub fn start(transport: T, mut renderer: R, mut store: S, name: Option<&str>) -> Result<Self> {
        let current_user = match name {
            Some(raw) => {
                let name = validate_name(raw)?;
                store.set_current_user(&name)?;
                name
            }
            None => store
                .current_user()?
                .and_then(|stored| validate_name(&stored).ok())
                .ok_or(ChatError::NoIdentity)?,
        };
        let theme = store.theme()?;
        renderer.set_theme(theme);

        Ok(ChatSession {
            transport,
            renderer,
            store,
            pipeline: IngestionPipeline::new(),
            current_user,
            theme,
        })
    }

    pub fn current_user(&self) -> &str {
        &self.current_user
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn pipeline(&self) -> &IngestionPipeline<T::Id> {
        &self.pipeline
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest one batch and render whatever is new. Returns the number rendered.
    pub fn deliver(&mut self, batch: Vec<MessageRecord<T::Id>>) -> usize {
        let instructions = self.pipeline.ingest(batch, &self.current_user);
        for instruction in &instructions {
            self.renderer.render(instruction);
        }
        if !instructions.is_empty() {
            self.renderer.end_batch();
        }
        instructions.len()
    }

    /// Publish a draft as the current user.
    ///
    /// Text is trimmed; blank text is refused. If the transport minted the id
    /// itself, the message is shown immediately and its echo is suppressed.
    pub async fn send(&mut self, draft: Draft) -> Result<()> {
        if draft.is_blank() {
            return Err(ChatError::EmptyMessage);
        }
        let draft = match draft.payload {
            Payload::Text { text } => Draft::text(text.trim()),
            payload => Draft { payload },
        };

        let published = self.transport.publish(&self.current_user, &draft).await?;
        if let Some(record) = published {
            let instruction = self.pipeline.record_local(record);
            self.renderer.render(&instruction);
            self.renderer.end_batch();
        }
        Ok(())
    }

    /// Read an image file and send it as a `data:` URI.
    pub async fn send_image_file(&mut self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let uri = encode_data_uri(&bytes, mime_for_path(path));
        debug!(path = %path.display(), bytes = bytes.len(), "sending image");
        self.send(Draft::image(uri)).await
    }

    /// Change the display name for everything ingested from now on.
    pub fn rename(&mut self, raw: &str) -> Result<()> {
        let name = validate_name(raw)?;
        self.store.set_current_user(&name)?;
        info!(from = %self.current_user, to = %name, "display name changed");
        self.current_user = name;
        Ok(())
    }

    pub fn toggle_theme(&mut self) -> Result<Theme> {
        let theme = self.theme.toggle();
        self.store.set_theme(theme)?;
        self.theme = theme;
        self.renderer.set_theme(theme);
        Ok(theme)
    }

    /// Apply one command. Returns `false` when the session should end.
    ///
    /// Failures are reported to the renderer as notices; none of them end
    /// the session.
    pub async fn handle(&mut self, command: Command) -> bool {
        let outcome = match command {
            Command::Quit => return false,
            Command::SendText(text) => self.send(Draft::text(text)).await,
            Command::SendImage(path) => self.send_image_file(&path).await,
            Command::Rename(name) => self.rename(&name).map(|()| {
                let note = format!("you are now {}", self.current_user);
                self.renderer.notice(&note);
            }),
            Command::ToggleTheme => self.toggle_theme().map(|theme| {
                self.renderer.notice(&format!("theme: {theme}"));
            }),
            Command::Help => {
                self.renderer.notice(HELP_TEXT);
                Ok(())
            }
            Command::Unknown(name) => {
                self.renderer.notice(&format!("unknown command /{name} (try /help)"));
                Ok(())
            }
        };

        match outcome {
            Ok(()) | Err(ChatError::EmptyMessage) => {}
            Err(e @ ChatError::Transport(_)) | Err(e @ ChatError::Io(_)) => {
                warn!(error = %e, "send failed");
                self.renderer.notice(&format!("message could not be sent: {e}"));
            }
            Err(e) => {
                warn!(error = %e, "command failed");
                self.renderer.notice(&e.to_string());
            }
        }
        true
    }

    /// Subscribe to the transport and process batches and commands until
    /// `/quit` or until `input` closes. The subscription is torn down once on
    /// the way out. Returns the session so callers can inspect it.
    pub async fn run(mut self, mut input: mpsc::Receiver<Command>) -> Self {
        let (sink, mut batches) = batch_channel();
        let subscription = self.transport.subscribe(sink);
        info!(user = %self.current_user, "session started");
        self.renderer
            .notice(&format!("signed in as {} (/help for commands)", self.current_user));

        loop {
            tokio::select! {
                Some(batch) = batches.recv() => {
                    let rendered = self.deliver(batch);
                    debug!(rendered, "batch ingested");
                }
                command = input.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        subscription.unsubscribe();
        info!(
            user = %self.current_user,
            rendered = self.pipeline.rendered_count(),
            "session ended"
        );
        self
    }
}
