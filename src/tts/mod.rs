//! TTS (Text-to-Speech) Module
//!
//! Provides a unified interface for the Speak action's backends.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub mod speechd;
pub mod system;

/// Trait for TTS engines
#[async_trait]
pub trait TtsEngine: Send + Sync + std::fmt::Debug {
    /// Speak the given text
    async fn speak(&self, text: &str) -> Result<()>;

    /// Get the engine name
    fn name(&self) -> &str;
}

/// Factory to create the configured TTS engine
pub async fn create_engine(engine: &str) -> Result<Arc<dyn TtsEngine>> {
    info!("🛠️ Creating TTS engine: {}", engine);
    let engine: Arc<dyn TtsEngine> = match engine {
        "speechd_ng" | "speechd" => {
            let client = speechd::SpeechdEngine::connect().await?;
            Arc::new(client)
        }
        "system" => Arc::new(system::SystemEngine::new()),
        other => {
            warn!("  - Unknown engine '{}', falling back to System", other);
            Arc::new(system::SystemEngine::new())
        }
    };
    info!("✅ TTS engine '{}' initialized", engine.name());
    Ok(engine)
}
