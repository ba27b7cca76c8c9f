//! Model identifiers and usage accounting

use serde::Deserialize;

/// Default primary model when the config names none.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Secondary model tried exactly once after primary retries exhaust.
pub const FALLBACK_MODEL: &str = "openai/gpt-oss-120b";

/// Maximum completion tokens for generation requests.
pub const MAX_COMPLETION_TOKENS: u32 = 8192;

/// API usage information from OpenRouter
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Actual cost in USD as reported by OpenRouter (`total_cost` in the
    /// usage object). We don't estimate costs locally.
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

impl Usage {
    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }
}
