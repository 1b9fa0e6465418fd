pub mod aggregate;
pub mod domain;
pub mod error;
pub mod extract;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod session;

pub mod config {
    use crate::aggregate::{RiskPolicy, ScoreScale};
    use crate::llm::retry::RetryPolicy;
    use anyhow::Context;
    use std::path::PathBuf;
    use std::time::Duration;

    const DEFAULT_TIMEOUT_SECS: u64 = 60;
    const DEFAULT_MAX_TOKENS: u32 = 8000;
    const DEFAULT_TEMPERATURE: f64 = 0.7;
    const DEFAULT_PROMPT_DIR: &str = "prompts";
    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub llm_api_url: Option<String>,
        pub llm_api_key: Option<String>,
        pub llm_model: Option<String>,
        pub llm_timeout_secs: u64,
        pub llm_max_tokens: u32,
        pub llm_temperature: f64,
        pub retry: RetryPolicy,
        pub prompt_dir: PathBuf,
        pub risk_policy: RiskPolicy,
        /// Largest request body the HTTP surface accepts.
        pub max_upload_bytes: usize,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let mut retry = RetryPolicy::default();
            if let Some(n) = env_parse::<u32>("LLM_MAX_ATTEMPTS")? {
                retry.max_attempts = n.max(1);
            }
            if let Some(ms) = env_parse::<u64>("LLM_RETRY_BASE_MS")? {
                retry.base_delay = Duration::from_millis(ms);
            }

            let mut risk_policy = RiskPolicy::default();
            if let Some(v) = env_parse::<f64>("RISK_HIGH_THRESHOLD")? {
                risk_policy.high = v;
            }
            if let Some(v) = env_parse::<f64>("RISK_MEDIUM_THRESHOLD")? {
                risk_policy.medium = v;
            }
            if let Ok(s) = std::env::var("RISK_SCORE_SCALE") {
                risk_policy.scale = s
                    .parse::<ScoreScale>()
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("invalid RISK_SCORE_SCALE: {s}"))?;
            }
            anyhow::ensure!(
                risk_policy.medium <= risk_policy.high,
                "RISK_MEDIUM_THRESHOLD ({}) must not exceed RISK_HIGH_THRESHOLD ({})",
                risk_policy.medium,
                risk_policy.high
            );

            Ok(Self {
                llm_api_url: non_empty_var("LLM_API_URL"),
                llm_api_key: non_empty_var("LLM_API_KEY"),
                llm_model: non_empty_var("LLM_MODEL"),
                llm_timeout_secs: env_parse("LLM_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS),
                llm_max_tokens: env_parse("LLM_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS),
                llm_temperature: env_parse("LLM_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE),
                retry,
                prompt_dir: non_empty_var("PROMPT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PROMPT_DIR)),
                risk_policy,
                max_upload_bytes: env_parse("MAX_UPLOAD_BYTES")?
                    .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        pub fn require_llm_api_url(&self) -> anyhow::Result<&str> {
            self.llm_api_url
                .as_deref()
                .context("LLM_API_URL is required")
        }

        pub fn require_llm_api_key(&self) -> anyhow::Result<&str> {
            self.llm_api_key
                .as_deref()
                .context("LLM_API_KEY is required")
        }

        pub fn require_llm_model(&self) -> anyhow::Result<&str> {
            self.llm_model.as_deref().context("LLM_MODEL is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        parse_var(key, std::env::var(key).ok().as_deref())
    }

    /// Unset or blank means "use the default"; anything else must parse.
    fn parse_var<T>(key: &str, raw: Option<&str>) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|err| anyhow::anyhow!("invalid {key}: {raw:?} ({err})"))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn unparseable_values_are_errors_not_defaults() {
            let err = parse_var::<f64>("RISK_HIGH_THRESHOLD", Some("seventy")).unwrap_err();
            assert!(err.to_string().contains("RISK_HIGH_THRESHOLD"));
            assert!(err.to_string().contains("seventy"));
            assert!(parse_var::<u32>("LLM_MAX_ATTEMPTS", Some("-3")).is_err());
            assert!(parse_var::<usize>("MAX_UPLOAD_BYTES", Some("10MB")).is_err());
        }

        #[test]
        fn unset_or_blank_values_fall_back() {
            assert_eq!(parse_var::<u64>("LLM_TIMEOUT_SECS", None).unwrap(), None);
            assert_eq!(parse_var::<u64>("LLM_TIMEOUT_SECS", Some("  ")).unwrap(), None);
            assert_eq!(parse_var::<u64>("LLM_TIMEOUT_SECS", Some(" 90 ")).unwrap(), Some(90));
        }
    }
}
