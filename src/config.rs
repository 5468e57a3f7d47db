use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Positive integer; zero and garbage fall back to `default`.
fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_duration_hours(key: &str, default_hours: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(|hours| Duration::from_secs(hours * 3600))
        .unwrap_or_else(|| Duration::from_secs(default_hours * 3600))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Synchronization settings, shared by the HTTP service and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Bucket holding ledgers and attachment blobs.
    pub bucket: String,
    /// Ledger key suffix; the full key is `{owner}/{ledger_object}`.
    pub ledger_object: String,
    pub bootstrap_window: u32,
    pub batch_size: u32,
    pub upload_concurrency: usize,
    pub link_ttl: Duration,
    /// Fail the run instead of rescanning when the ledger's newest date is unreadable.
    pub strict_watermark: bool,
    pub imap_default_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            bucket: env_string("LEDGER_BUCKET", "mail-ledger"),
            ledger_object: env_string("LEDGER_OBJECT_NAME", "data.xlsx"),
            bootstrap_window: env_u32("SYNC_BOOTSTRAP_WINDOW", 25),
            batch_size: env_u32("SYNC_BATCH_SIZE", 10),
            upload_concurrency: env_u32("SYNC_UPLOAD_CONCURRENCY", 8) as usize,
            link_ttl: env_duration_hours("SYNC_LINK_TTL_HOURS", 168),
            strict_watermark: env_bool("SYNC_STRICT_WATERMARK", false),
            imap_default_port: u16::try_from(env_u32("IMAP_DEFAULT_PORT", 993)).unwrap_or(993),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bucket: "mail-ledger".to_string(),
            ledger_object: "data.xlsx".to_string(),
            bootstrap_window: 25,
            batch_size: 10,
            upload_concurrency: 8,
            link_ttl: Duration::from_secs(168 * 3600),
            strict_watermark: false,
            imap_default_port: 993,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.bootstrap_window, 25);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.link_ttl, Duration::from_secs(604_800));
        assert!(!config.strict_watermark);
        assert_eq!(config.imap_default_port, 993);
    }

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(env_u32("MAIL_LEDGER_TEST_UNSET_U32", 7), 7);
        assert!(env_bool("MAIL_LEDGER_TEST_UNSET_BOOL", true));
        assert_eq!(
            env_duration_hours("MAIL_LEDGER_TEST_UNSET_TTL", 2),
            Duration::from_secs(7200)
        );
        assert_eq!(env_string("MAIL_LEDGER_TEST_UNSET_STR", "x"), "x");
    }
}
