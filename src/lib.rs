//! # chatline
//!
//! A small chat client built around one deduplicating ingestion pipeline.
//!
//! Messages arrive from one of three transports: a REST poller, an
//! in-process broadcast hub, or a WebSocket push feed. Whatever the source,
//! every batch goes through [`pipeline::IngestionPipeline`], which drops what
//! was already shown, orders the rest by id, and renders each message exactly
//! once. Messages the user sends are shown immediately when the transport can
//! mint the id locally. The echo that comes back later is suppressed.
//!
//! ```rust,ignore
//! let transport = PollTransport::builder("http://127.0.0.1:8787").build();
//! let session = ChatSession::start(
//!     transport,
//!     TerminalRenderer::stdout(Theme::Light),
//!     MemoryIdentityStore::new(),
//!     Some("alice"),
//! )?;
//! session.run(commands_rx).await;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod input;
pub mod logging;
pub mod message;
pub mod pipeline;
pub mod render;
pub mod session;
pub mod transport;

pub use error::{ChatError, Result, TransportError};
pub use identity::{IdentityStore, Theme};
pub use message::{Draft, MessageRecord, Payload};
pub use pipeline::{IngestionPipeline, PipelineState, RenderInstruction};
pub use render::Renderer;
pub use session::ChatSession;
pub use transport::Transport;
