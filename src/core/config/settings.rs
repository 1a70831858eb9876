use std::path::PathBuf;

use super::parsing::{
    env_optional, env_or_default, parse_access_policy, parse_bool, parse_cors_origins,
    parse_environment, parse_u32, parse_u64, parse_usize,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    AccessSettings, AdminSettings, ApiSettings, ConfigError, CorsSettings, DatabaseSettings,
    MailSettings, RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings,
    Settings, StorageSettings, TelemetrySettings,
};

/// Lower bound on token entropy, in bytes.
pub(crate) const MIN_TOKEN_BYTES: usize = 16;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAM_HOST", "0.0.0.0");
        let port = env_optional("EXAM_PORT")
            .or_else(|| env_optional("PORT"))
            .unwrap_or_else(|| "3000".to_string());

        let environment =
            parse_environment(env_optional("EXAM_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EXAM_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Exam Links");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let public_base_url = env_or_default("PUBLIC_BASE_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();

        let secret_key = match env_optional("SECRET_KEY") {
            Some(value) => value,
            None => load_or_create_secret_key(),
        };
        let access_token_expire_minutes = parse_u64(
            "ACCESS_TOKEN_EXPIRE_MINUTES",
            env_or_default("ACCESS_TOKEN_EXPIRE_MINUTES", "720"),
        )?;
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let database_url = env_or_default("DATABASE_URL", "sqlite://exam.db");
        let max_connections =
            parse_u32("DATABASE_MAX_CONNECTIONS", env_or_default("DATABASE_MAX_CONNECTIONS", "8"))?;

        let policy = parse_access_policy(env_optional("ACCESS_POLICY"))?;
        let token_bytes = parse_usize("TOKEN_BYTES", env_or_default("TOKEN_BYTES", "16"))?;
        let trust_forwarded_for = env_optional("TRUST_FORWARDED_FOR")
            .map(|value| parse_bool(&value))
            .unwrap_or(true);

        let upload_dir = PathBuf::from(env_or_default("UPLOAD_DIR", "uploads"));
        let max_upload_size_mb =
            parse_u64("MAX_UPLOAD_SIZE_MB", env_or_default("MAX_UPLOAD_SIZE_MB", "10"))?;
        let max_files_per_submission = parse_u64(
            "MAX_FILES_PER_SUBMISSION",
            env_or_default("MAX_FILES_PER_SUBMISSION", "10"),
        )?;
        let exam_page_path = PathBuf::from(env_or_default("EXAM_PAGE_PATH", "static/exam.html"));

        let mail_relay_url = env_or_default("MAIL_RELAY_URL", "");
        let mail_api_key = env_or_default("MAIL_RELAY_API_KEY", "");
        let mail_from = env_or_default("MAIL_FROM", "exam@localhost");
        let mail_to = env_or_default("MAIL_TO", "");
        let mail_timeout_seconds =
            parse_u64("MAIL_TIMEOUT_SECONDS", env_or_default("MAIL_TIMEOUT_SECONDS", "15"))?;
        let mail_max_retries =
            parse_u32("MAIL_MAX_RETRIES", env_or_default("MAIL_MAX_RETRIES", "2"))?;
        let mail_queue_capacity =
            parse_usize("MAIL_QUEUE_CAPACITY", env_or_default("MAIL_QUEUE_CAPACITY", "64"))?;

        let admin_username = env_or_default("ADMIN_USERNAME", "teacher");
        let admin_password = env_or_default("ADMIN_PASSWORD", "");

        let log_level = env_or_default("EXAM_LOG_LEVEL", "info");
        let json = env_optional("EXAM_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings { host: ServerHost::parse(host)?, port: ServerPort::parse(port)? },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, public_base_url },
            security: SecuritySettings { secret_key, access_token_expire_minutes, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings { database_url, max_connections },
            access: AccessSettings { policy, token_bytes, trust_forwarded_for },
            storage: StorageSettings {
                upload_dir,
                max_upload_size_mb,
                max_files_per_submission,
                exam_page_path,
            },
            mail: MailSettings {
                relay_url: mail_relay_url,
                api_key: mail_api_key,
                from: mail_from,
                to: mail_to,
                timeout_seconds: mail_timeout_seconds,
                max_retries: mail_max_retries,
                queue_capacity: mail_queue_capacity,
            },
            admin: AdminSettings { username: admin_username, password: admin_password },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn access(&self) -> &AccessSettings {
        &self.access
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn mail(&self) -> &MailSettings {
        &self.mail
    }

    pub(crate) fn admin(&self) -> &AdminSettings {
        &self.admin
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.access.token_bytes < MIN_TOKEN_BYTES {
            return Err(ConfigError::InvalidValue {
                field: "TOKEN_BYTES",
                value: self.access.token_bytes.to_string(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value: "0".to_string(),
            });
        }

        if self.storage.max_upload_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_UPLOAD_SIZE_MB",
                value: "0".to_string(),
            });
        }

        if self.storage.max_files_per_submission == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAX_FILES_PER_SUBMISSION",
                value: "0".to_string(),
            });
        }

        if self.mail.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "MAIL_QUEUE_CAPACITY",
                value: "0".to_string(),
            });
        }

        if self.mail.enabled() && self.mail.to.is_empty() {
            return Err(ConfigError::InvalidValue { field: "MAIL_TO", value: "<empty>".to_string() });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.admin.password.is_empty() {
            return Err(ConfigError::MissingSecret("ADMIN_PASSWORD"));
        }
        if env_optional("SECRET_KEY").is_none() {
            return Err(ConfigError::MissingSecret("SECRET_KEY"));
        }

        Ok(())
    }
}
