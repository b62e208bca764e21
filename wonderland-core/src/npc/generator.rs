//! The seam between NPCs and whatever produces their words.

use super::injector::PromptContext;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use voice::{Prompt, Voice};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("voice error: {0}")]
    Voice(#[from] voice::Error),

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator returned nothing")]
    Empty,

    #[error("generator unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    /// Whether asking again later might work.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Voice(err) => err.is_transient(),
            GenerationError::Timeout(_) => true,
            GenerationError::Empty | GenerationError::Unavailable(_) => false,
        }
    }
}

/// Produces one line of NPC speech from a composed context.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError>;
}

#[async_trait]
impl TextGenerator for Voice {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError> {
        let mut prompt = Prompt::line(context.utterance.clone())
            .with_system(context.system.clone())
            .with_max_tokens(context.max_tokens);
        if let Some(temperature) = context.temperature {
            prompt = prompt.with_temperature(temperature);
        }
        let reply = self.speak(&prompt).await?;
        if reply.truncated {
            debug!(npc = %context.npc, tokens = reply.output_tokens, "NPC line cut at token limit");
        }
        Ok(reply.text)
    }
}

/// A generator for worlds run without a model. Every NPC falls back to
/// its canned line.
#[derive(Debug, Clone, Default)]
pub struct Silent;

#[async_trait]
impl TextGenerator for Silent {
    async fn generate(&self, _context: &PromptContext) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("no voice configured".into()))
    }
}
