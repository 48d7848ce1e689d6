pub mod context;
pub mod listener;
pub mod orchestrator;
pub mod pipeline;
pub mod source;
pub mod window;

pub use context::{EntityResolver, KnownEntity, Relations, Schema, SourceAnalysisContext, User};
pub use listener::{EventPublisher, ExtractionListener, RunningExtraction};
pub use orchestrator::{ExtractionComponents, IncrementalExtraction, SourceAnalysisRequest};
pub use pipeline::{ChunkPropositionResult, PropositionOutcome, PropositionPipeline};
pub use source::{Conversation, ConversationSource, IncrementalSource, Message};
pub use window::{WindowConfig, WindowConfigError};
