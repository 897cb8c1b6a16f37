//! Environment-variable configuration.
//!
//! Plain `std::env` access behind named constants and typed helpers, the
//! same shape the rest of the corpus uses for env-driven settings rather
//! than a config-file crate. `EngineConfig` is the single place callers
//! assemble configuration into a value they pass around explicitly; nothing
//! here is read lazily from a `static`.

use std::env;
use std::time::Duration;

/// API key for the LLM chat/completions collaborator.
pub const LLM_API_KEY: &str = "PRIORITIZER_LLM_API_KEY";
/// Model identifier for the embedding collaborator.
pub const EMBEDDING_MODEL_ID: &str = "PRIORITIZER_EMBEDDING_MODEL_ID";
/// Hex-encoded 32-byte symmetric key for the Secret/Key Service.
pub const ENCRYPTION_KEY: &str = "PRIORITIZER_ENCRYPTION_KEY";
/// `development` | `test` | `production`.
pub const NODE_ENV: &str = "PRIORITIZER_NODE_ENV";
/// Persistent-store connection string.
pub const STORE_URL: &str = "PRIORITIZER_STORE_URL";
/// Service-role credential for the persistent store.
pub const STORE_SERVICE_KEY: &str = "PRIORITIZER_STORE_SERVICE_KEY";
/// Anonymous/public credential for the persistent store.
pub const STORE_ANON_KEY: &str = "PRIORITIZER_STORE_ANON_KEY";
/// Fallback user id for single-tenant deployments/tests.
pub const DEFAULT_USER_ID: &str = "PRIORITIZER_DEFAULT_USER_ID";
/// Feature flag toggling the unified (single-pass) prioritization path.
pub const USE_UNIFIED_PRIORITIZATION: &str = "PRIORITIZER_USE_UNIFIED_PRIORITIZATION";
/// Explicit test-mode flag; never inferred from `NODE_ENV` alone (§9).
pub const TEST_MODE: &str = "PRIORITIZER_TEST_MODE";

pub fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn env_string_or_default(key: &str, default: &str) -> String {
    env_string(key).unwrap_or_else(|| default.to_string())
}

pub fn env_bool_or_default(key: &str, default: bool) -> bool {
    env_string(key)
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

pub fn env_u64_or_default(key: &str, default: u64) -> u64 {
    env_string(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

pub fn env_f64_or_default(key: &str, default: f64) -> f64 {
    env_string(key)
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

/// Runtime configuration assembled once at startup and threaded through
/// explicit dependency injection (§9: never implicit module-level state).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub embedding_model_id: String,
    pub node_env: NodeEnv,
    pub default_user_id: Option<String>,
    pub use_unified_prioritization: bool,
    /// Explicit flag, not inferred from `node_env`. Zeroes retry-queue
    /// backoff delays and debounce windows when true.
    pub test_mode: bool,
    /// Gap-analysis coverage threshold below which draft generation runs
    /// (default 70%, Open Question #2 in spec.md §9).
    pub coverage_threshold: f64,
    /// Phase-5 fallback threshold for triggering a second bridging pass
    /// (default 80%, Open Question #2 in spec.md §9).
    pub phase5_fallback_threshold: f64,
    /// Session force-fail wall-time budget (default 20 minutes, §4.1/§5).
    pub session_max_runtime: Duration,
    /// Session retention before opportunistic cleanup (default 30 days,
    /// §4.1).
    pub session_expiry: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEnv {
    Development,
    Test,
    Production,
}

impl NodeEnv {
    fn parse(raw: &str) -> Self {
        match raw {
            "production" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, applying spec
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            embedding_model_id: env_string_or_default(
                EMBEDDING_MODEL_ID,
                "text-embedding-3-small",
            ),
            node_env: NodeEnv::parse(&env_string_or_default(NODE_ENV, "development")),
            default_user_id: env_string(DEFAULT_USER_ID),
            use_unified_prioritization: env_bool_or_default(USE_UNIFIED_PRIORITIZATION, true),
            test_mode: env_bool_or_default(TEST_MODE, false),
            coverage_threshold: env_f64_or_default("PRIORITIZER_COVERAGE_THRESHOLD", 0.70),
            phase5_fallback_threshold: env_f64_or_default(
                "PRIORITIZER_PHASE5_FALLBACK_THRESHOLD",
                0.80,
            ),
            session_max_runtime: Duration::from_secs(env_u64_or_default(
                "PRIORITIZER_SESSION_MAX_RUNTIME_SECS",
                20 * 60,
            )),
            session_expiry: Duration::from_secs(env_u64_or_default(
                "PRIORITIZER_SESSION_EXPIRY_SECS",
                30 * 24 * 60 * 60,
            )),
        }
    }

    /// A config suitable for unit/integration tests: explicit test mode,
    /// zero backoff delays, short timeouts.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            embedding_model_id: "text-embedding-3-small".to_string(),
            node_env: NodeEnv::Test,
            default_user_id: Some("test-user".to_string()),
            use_unified_prioritization: true,
            test_mode: true,
            coverage_threshold: 0.70,
            phase5_fallback_threshold: 0.80,
            session_max_runtime: Duration::from_secs(20 * 60),
            session_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_env_parses_known_values() {
        assert_eq!(NodeEnv::parse("production"), NodeEnv::Production);
        assert_eq!(NodeEnv::parse("test"), NodeEnv::Test);
        assert_eq!(NodeEnv::parse("development"), NodeEnv::Development);
        assert_eq!(NodeEnv::parse("garbage"), NodeEnv::Development);
    }

    #[test]
    fn test_config_has_explicit_test_mode() {
        let cfg = EngineConfig::for_tests();
        assert!(cfg.test_mode);
        assert_eq!(cfg.node_env, NodeEnv::Test);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        // env_bool_or_default reads real env vars; exercise the parsing
        // logic indirectly is awkward without setting process env in
        // parallel tests, so validate the default path instead.
        assert!(env_bool_or_default("PRIORITIZER_UNSET_FLAG_XYZ", true));
        assert!(!env_bool_or_default("PRIORITIZER_UNSET_FLAG_XYZ", false));
    }
}
