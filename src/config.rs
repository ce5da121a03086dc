use std::path::PathBuf;
use std::time::Duration;

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn flag(name: &str, default: bool) -> bool {
    var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    /// `log` or `smtp`.
    pub transport: String,
    pub from: String,
    pub smtp: Option<SmtpSettings>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Key prefix that holds uploaded claim photos.
    pub private_prefix: String,
    pub upload_url_ttl: Duration,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub frontend_url: Option<String>,
    /// Absolute origin used to turn `/objects/...` paths into links inside emails.
    pub public_base_url: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub storage: StorageConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let smtp = var("SMTP_HOST").map(|host| SmtpSettings {
            host,
            port: parse_var("SMTP_PORT", 587),
            username: var("SMTP_USERNAME"),
            password: var("SMTP_PASSWORD"),
            tls: flag("SMTP_TLS", true),
        });
        Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            frontend_url: var("FRONTEND_URL"),
            public_base_url: var("PUBLIC_BASE_URL"),
            snapshot_path: var("REPORTS_SNAPSHOT_PATH").map(PathBuf::from),
            database_url: var("DATABASE_URL"),
            storage: StorageConfig {
                bucket: var("S3_BUCKET").unwrap_or_else(|| "claim-photos".into()),
                endpoint: var("S3_ENDPOINT"),
                region: var("S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: var("S3_ACCESS_KEY"),
                secret_key: var("S3_SECRET_KEY"),
                private_prefix: var("S3_PRIVATE_PREFIX")
                    .map(|p| p.trim_matches('/').to_string())
                    .unwrap_or_else(|| "uploads".into()),
                upload_url_ttl: Duration::from_secs(parse_var("UPLOAD_URL_TTL_SECS", 900)),
            },
            mail: MailConfig {
                transport: var("MAIL_TRANSPORT").unwrap_or_else(|| "log".into()).to_lowercase(),
                from: var("MAIL_FROM").unwrap_or_else(|| "claims@localhost".into()),
                smtp,
                max_attempts: parse_var("MAIL_MAX_ATTEMPTS", 3),
                retry_delay: Duration::from_millis(parse_var("MAIL_RETRY_DELAY_MS", 500)),
            },
        }
    }
}
