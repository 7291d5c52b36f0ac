//! Incremental rendering of streamed model output into chat messages.
//!
//! A generation arrives as a stream of answer, reasoning and tool events. The
//! renderer turns it into a live preview plus an ordered set of permanent
//! messages that respect the platform's length limit and rich-text rules.

pub mod accumulator;
pub mod config;
pub mod delivery;
pub mod error_handling;
pub mod formatting;
pub mod generation;
pub mod history;
pub mod i18n;
pub mod outcome;
pub mod renderer;
pub mod split;
pub mod store;
pub mod telegram;
pub mod tool_status;

pub use accumulator::{AnswerSegment, SegmentKind, StreamAccumulator};
pub use config::{Config, RenderConfig, TelegramConfig};
pub use delivery::{ChatTarget, Delivery, MessageId, OutgoingText, SurfaceId, TextFormat};
pub use error_handling::{classify_api_error, DeliveryError};
pub use generation::{generate_reply, IncomingMessage, ReplyServices};
pub use history::{trim_history, TokenEstimator};
pub use i18n::{Language, Localizer};
pub use outcome::RenderOutcome;
pub use renderer::{RenderRequest, ResponseRenderer};
pub use store::{ConversationStore, InMemoryStore, StoredMessage};
pub use telegram::TelegramDelivery;

pub use quill_providers;
