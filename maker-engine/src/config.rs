//! Environment-driven `MakerConfig` construction (SPEC_FULL §1.1), following
//! the teacher's `SwarmConfig::default()` pattern of falling back to sane
//! defaults when a `MAKER_*` variable is unset or unparsable.

use maker_core::state::{LlmProvider, MakerConfig, ProviderCredentials};

/// Builds a `MakerConfig` from environment variables, falling back to
/// `MakerConfig::default()` field-by-field.
///
/// Recognized variables:
/// - `MAKER_API_KEY` — provider credentials
/// - `MAKER_LLM_PROVIDER` — `gemini` (default) or `openai`
/// - `MAKER_RISK_THRESHOLD` — float in `[0, 1]`
/// - `MAKER_MAX_AGENTS` — positive integer
/// - `MAKER_MAX_PARALLELISM` — positive integer
/// - `MAKER_AUTO_FIX_LINTER` — `true`/`false`
/// - `MAKER_USE_GIT_WORKTREES` — `true`/`false`
pub fn from_env() -> MakerConfig {
    let mut config = MakerConfig::default();

    if let Ok(key) = std::env::var("MAKER_API_KEY") {
        config.provider_credentials = ProviderCredentials(Some(key));
    }

    if let Ok(provider) = std::env::var("MAKER_LLM_PROVIDER") {
        config.llm_provider = match provider.as_str() {
            "openai" => LlmProvider::OpenAi,
            _ => LlmProvider::Gemini,
        };
    }

    if let Some(v) = env_parsed::<f32>("MAKER_RISK_THRESHOLD") {
        if (0.0..=1.0).contains(&v) {
            config.risk_threshold = v;
        }
    }

    if let Some(v) = env_parsed::<u32>("MAKER_MAX_AGENTS") {
        if v >= 1 {
            config.max_agents = v;
        }
    }

    if let Some(v) = env_parsed::<u32>("MAKER_MAX_PARALLELISM") {
        if v >= 1 {
            config.max_parallelism = v;
        }
    }

    if let Some(v) = env_parsed::<bool>("MAKER_AUTO_FIX_LINTER") {
        config.auto_fix_linter = v;
    }

    if let Some(v) = env_parsed::<bool>("MAKER_USE_GIT_WORKTREES") {
        config.use_git_worktrees = v;
    }

    config
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_nothing_set() {
        // Clear in case a prior test left a variable set within this process.
        for key in ["MAKER_API_KEY", "MAKER_RISK_THRESHOLD", "MAKER_MAX_PARALLELISM"] {
            std::env::remove_var(key);
        }
        let config = from_env();
        assert_eq!(config.max_parallelism, MakerConfig::default().max_parallelism);
    }

    #[test]
    fn invalid_risk_threshold_falls_back_to_default() {
        std::env::set_var("MAKER_RISK_THRESHOLD", "5.0");
        let config = from_env();
        assert_eq!(config.risk_threshold, MakerConfig::default().risk_threshold);
        std::env::remove_var("MAKER_RISK_THRESHOLD");
    }
}
