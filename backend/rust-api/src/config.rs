use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Some(StorageBackend::Mongo),
            "memory" | "in-memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

/// Rules of the assessment: round shape, adaptive thresholds, collaborators.
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentSettings {
    pub expected_rounds: u32,
    pub round_time_limit_secs: u32,
    pub default_question_count: u32,
    pub max_question_count: u32,
    pub high_score_threshold: u32,
    pub low_score_threshold: u32,
    pub max_difficulty_step: f64,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
    pub base_difficulty: f64,
    pub default_domain: String,
    pub generator_timeout_secs: u64,
    pub distributed_locks: bool,
}

impl Default for AssessmentSettings {
    fn default() -> Self {
        Self {
            expected_rounds: 2,
            round_time_limit_secs: 1200,
            default_question_count: 5,
            max_question_count: 50,
            high_score_threshold: 80,
            low_score_threshold: 50,
            max_difficulty_step: 1.0,
            min_difficulty: 1.0,
            max_difficulty: 5.0,
            base_difficulty: 3.0,
            default_domain: "general".to_string(),
            generator_timeout_secs: 30,
            distributed_locks: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    pub sweep_interval_secs: u64,
    pub ranking_interval_secs: u64,
    pub sse_tick_interval_ms: u64,
    pub sse_max_stream_secs: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            ranking_interval_secs: 300,
            sse_tick_interval_ms: 1000,
            sse_max_stream_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub generator_api_url: String,
    pub storage: StorageBackend,
    pub assessment: AssessmentSettings,
    pub workers: WorkerSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "assessment".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!("Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let generator_api_url = settings
            .get_string("generator.url")
            .or_else(|_| env::var("GENERATOR_API_URL"))
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let storage_raw = settings
            .get_string("storage.backend")
            .or_else(|_| env::var("STORAGE_BACKEND"))
            .unwrap_or_else(|_| "mongo".to_string());
        let storage = StorageBackend::parse(&storage_raw).ok_or_else(|| {
            config::ConfigError::Message(format!("Unknown storage backend: {}", storage_raw))
        })?;

        let defaults = AssessmentSettings::default();
        let assessment = AssessmentSettings {
            expected_rounds: read_positive_u32(&settings, "assessment.expected_rounds", "EXPECTED_ROUNDS")
                .unwrap_or(defaults.expected_rounds),
            round_time_limit_secs: read_positive_u32(
                &settings,
                "assessment.round_time_limit_secs",
                "ROUND_TIME_LIMIT_SECONDS",
            )
            .unwrap_or(defaults.round_time_limit_secs),
            default_question_count: read_positive_u32(
                &settings,
                "assessment.default_question_count",
                "DEFAULT_QUESTION_COUNT",
            )
            .unwrap_or(defaults.default_question_count),
            max_question_count: read_positive_u32(
                &settings,
                "assessment.max_question_count",
                "MAX_QUESTION_COUNT",
            )
            .unwrap_or(defaults.max_question_count),
            high_score_threshold: read_u32(
                &settings,
                "assessment.high_score_threshold",
                "HIGH_SCORE_THRESHOLD",
            )
            .unwrap_or(defaults.high_score_threshold),
            low_score_threshold: read_u32(
                &settings,
                "assessment.low_score_threshold",
                "LOW_SCORE_THRESHOLD",
            )
            .unwrap_or(defaults.low_score_threshold),
            max_difficulty_step: read_f64(&settings, "assessment.max_difficulty_step")
                .unwrap_or(defaults.max_difficulty_step),
            min_difficulty: read_f64(&settings, "assessment.min_difficulty")
                .unwrap_or(defaults.min_difficulty),
            max_difficulty: read_f64(&settings, "assessment.max_difficulty")
                .unwrap_or(defaults.max_difficulty),
            base_difficulty: read_f64(&settings, "assessment.base_difficulty")
                .unwrap_or(defaults.base_difficulty),
            default_domain: settings
                .get_string("assessment.default_domain")
                .or_else(|_| env::var("DEFAULT_DOMAIN"))
                .unwrap_or(defaults.default_domain),
            generator_timeout_secs: read_positive_u64(
                &settings,
                "generator.timeout_secs",
                "GENERATOR_TIMEOUT_SECONDS",
            )
            .unwrap_or(defaults.generator_timeout_secs),
            distributed_locks: settings
                .get_bool("assessment.distributed_locks")
                .ok()
                .or_else(|| env::var("DISTRIBUTED_LOCKS").ok().map(|v| v != "0"))
                .unwrap_or(defaults.distributed_locks),
        };

        let worker_defaults = WorkerSettings::default();
        let workers = WorkerSettings {
            sweep_interval_secs: read_positive_u64(
                &settings,
                "workers.sweep_interval_secs",
                "SWEEP_INTERVAL_SECONDS",
            )
            .unwrap_or(worker_defaults.sweep_interval_secs),
            ranking_interval_secs: read_positive_u64(
                &settings,
                "workers.ranking_interval_secs",
                "RANKING_INTERVAL_SECONDS",
            )
            .unwrap_or(worker_defaults.ranking_interval_secs),
            sse_tick_interval_ms: read_positive_u64(
                &settings,
                "workers.sse_tick_interval_ms",
                "SSE_TICK_INTERVAL_MS",
            )
            .unwrap_or(worker_defaults.sse_tick_interval_ms),
            sse_max_stream_secs: read_positive_u32(
                &settings,
                "workers.sse_max_stream_secs",
                "SSE_MAX_STREAM_SECONDS",
            )
            .unwrap_or(worker_defaults.sse_max_stream_secs),
        };

        let config = Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            generator_api_url,
            storage,
            assessment,
            workers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration for the in-memory backend, used by tests and local runs.
    pub fn in_memory(jwt_secret: &str) -> Self {
        Config {
            mongo_uri: String::new(),
            redis_uri: String::new(),
            mongo_database: "assessment".to_string(),
            jwt_secret: jwt_secret.to_string(),
            generator_api_url: "http://localhost:8000".to_string(),
            storage: StorageBackend::Memory,
            assessment: AssessmentSettings::default(),
            workers: WorkerSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let a = &self.assessment;
        let fail = |msg: &str| Err(config::ConfigError::Message(msg.to_string()));

        if a.expected_rounds == 0 {
            return fail("assessment.expected_rounds must be at least 1");
        }
        if a.round_time_limit_secs == 0 {
            return fail("assessment.round_time_limit_secs must be positive");
        }
        if a.default_question_count == 0 || a.default_question_count > a.max_question_count {
            return fail("assessment.default_question_count must be within 1..=max_question_count");
        }
        if a.low_score_threshold >= a.high_score_threshold || a.high_score_threshold > 100 {
            return fail("score thresholds must satisfy low < high <= 100");
        }
        if !(a.min_difficulty <= a.base_difficulty && a.base_difficulty <= a.max_difficulty) {
            return fail("difficulty range must satisfy min <= base <= max");
        }
        if self.workers.sweep_interval_secs == 0 || self.workers.ranking_interval_secs == 0 {
            return fail("worker intervals must be positive");
        }
        Ok(())
    }
}

fn read_u64(settings: &config::Config, key: &str, env_key: &str) -> Option<u64> {
    settings
        .get_int(key)
        .ok()
        .and_then(|v| u64::try_from(v).ok())
        .or_else(|| env::var(env_key).ok().and_then(|v| v.parse::<u64>().ok()))
}

fn read_u32(settings: &config::Config, key: &str, env_key: &str) -> Option<u32> {
    read_u64(settings, key, env_key).and_then(|v| u32::try_from(v).ok())
}

/// Counts, limits and intervals: zero falls back to the default.
fn read_positive_u64(settings: &config::Config, key: &str, env_key: &str) -> Option<u64> {
    read_u64(settings, key, env_key).filter(|v| *v > 0)
}

fn read_positive_u32(settings: &config::Config, key: &str, env_key: &str) -> Option<u32> {
    read_u32(settings, key, env_key).filter(|v| *v > 0)
}

fn read_f64(settings: &config::Config, key: &str) -> Option<f64> {
    settings.get_float(key).ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn in_memory_config_is_valid() {
        let config = Config::in_memory("secret");
        assert!(config.validate().is_ok());
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.assessment.expected_rounds, 2);
        assert_eq!(config.assessment.round_time_limit_secs, 1200);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = Config::in_memory("secret");
        config.assessment.low_score_threshold = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn storage_backend_parsing() {
        assert_eq!(StorageBackend::parse("MongoDB"), Some(StorageBackend::Mongo));
        assert_eq!(StorageBackend::parse(" memory "), Some(StorageBackend::Memory));
        assert_eq!(StorageBackend::parse("sqlite"), None);
    }

    #[test]
    #[serial]
    fn env_overrides_round_settings() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("STORAGE_BACKEND", "memory");
        std::env::set_var("EXPECTED_ROUNDS", "3");
        std::env::set_var("ROUND_TIME_LIMIT_SECONDS", "600");

        let config = Config::load().unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.assessment.expected_rounds, 3);
        assert_eq!(config.assessment.round_time_limit_secs, 600);

        std::env::remove_var("STORAGE_BACKEND");
        std::env::remove_var("EXPECTED_ROUNDS");
        std::env::remove_var("ROUND_TIME_LIMIT_SECONDS");
        std::env::remove_var("SKIP_ROOT_ENV");
    }

    #[test]
    #[serial]
    fn zero_threshold_is_kept_but_zero_rounds_fall_back() {
        std::env::set_var("SKIP_ROOT_ENV", "1");
        std::env::set_var("STORAGE_BACKEND", "memory");
        std::env::set_var("LOW_SCORE_THRESHOLD", "0");
        std::env::set_var("EXPECTED_ROUNDS", "0");

        let config = Config::load().unwrap();
        assert_eq!(config.assessment.low_score_threshold, 0);
        assert_eq!(config.assessment.expected_rounds, 2);

        std::env::remove_var("STORAGE_BACKEND");
        std::env::remove_var("LOW_SCORE_THRESHOLD");
        std::env::remove_var("EXPECTED_ROUNDS");
        std::env::remove_var("SKIP_ROOT_ENV");
    }
}
