pub mod attachment;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod markup;
pub mod renderer;
pub mod session;
pub mod state;
pub mod transport;

// Re-export main types for convenience
pub use attachment::{compose_message, Attachment};
pub use classifier::{classify, AgentIdentity, Route, ROUTES};
pub use config::Config;
pub use controller::{LifecycleController, LiveReply, RequestState, TurnEvent, TurnId, TurnOutcome};
pub use error::ChatError;
pub use markup::{render_markdown, LineKind, Markup, MarkupLine, MarkupSpan, Rgb, SpanStyle};
pub use renderer::{Completion, Pacing, ProgressiveRenderer, RenderSurface};
pub use session::{SessionId, SessionStore};
pub use state::{ChatRole, ChatTurn, MessageLog, TurnContent};
pub use transport::{HttpTransport, Transport};
