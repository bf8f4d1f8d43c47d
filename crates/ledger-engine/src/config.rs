//! # Engine Configuration
//!
//! Configuration for numbering, retries, the edit collision window and
//! the default tax rate.
//!
//! ## Resolution
//! ```text
//! defaults ─► ledger.toml ─► LEDGER_* env ─► validate()
//!
//! ledger.toml lives in the platform config dir
//! (ProjectDirs "com" / "ledger" / "sales"), or wherever --config points.
//! LEDGER_INVOICE_FLOOR=5000  LEDGER_DB_PATH=/var/lib/ledger/ledger.db
//! ```
//!
//! The VAT percentage stored in the `settings` table wins over
//! `[tax] default_vat_percent`; the config value is only the fallback when
//! the setting is missing.
//!
//! ## Example
//! ```toml
//! # ledger.toml
//! [invoice]
//! floor = 2000
//! width = 4
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 50
//!
//! [concurrency]
//! edit_collision_window_secs = 30
//!
//! [tax]
//! default_vat_percent = "5"
//!
//! [database]
//! path = "ledger.db"
//! max_connections = 5
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use ledger_core::{TaxRate, DEFAULT_INVOICE_FLOOR, MIN_INVOICE_DIGITS};
use ledger_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Invoice Numbering
// =============================================================================

/// Invoice numbering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSettings {
    /// Lowest number ever handed out.
    #[serde(default = "default_floor")]
    pub floor: u64,

    /// Zero-padded width of a formatted number.
    #[serde(default = "default_width")]
    pub width: usize,

    /// How many recent invoices the fallback path scans.
    #[serde(default = "default_fallback_scan_limit")]
    pub fallback_scan_limit: u32,

    /// Upper bound of the random delay before a fallback scan (milliseconds).
    #[serde(default = "default_fallback_jitter")]
    pub fallback_jitter_ms: u64,
}

fn default_floor() -> u64 {
    DEFAULT_INVOICE_FLOOR
}

fn default_width() -> usize {
    MIN_INVOICE_DIGITS
}

fn default_fallback_scan_limit() -> u32 {
    50
}

fn default_fallback_jitter() -> u64 {
    25
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        InvoiceSettings {
            floor: default_floor(),
            width: default_width(),
            fallback_scan_limit: default_fallback_scan_limit(),
            fallback_jitter_ms: default_fallback_jitter(),
        }
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Retry policy for Create on a duplicate invoice number.
///
/// ```text
/// attempt 1 ──✗──► sleep 50ms ──► attempt 2 ──✗──► sleep 100ms ──► ...
///                                                   (up to max_attempts)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles each time.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    50
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

// =============================================================================
// Concurrency
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// An edit by a different user within this many seconds of the last
    /// modification is rejected as "in progress".
    #[serde(default = "default_edit_window")]
    pub edit_collision_window_secs: u64,
}

fn default_edit_window() -> u64 {
    30
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        ConcurrencySettings {
            edit_collision_window_secs: default_edit_window(),
        }
    }
}

// =============================================================================
// Tax
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxSettings {
    /// Used when the `vat_percent` setting is absent.
    #[serde(default = "default_vat_percent")]
    pub default_vat_percent: Decimal,
}

fn default_vat_percent() -> Decimal {
    Decimal::from(5)
}

impl Default for TaxSettings {
    fn default() -> Self {
        TaxSettings {
            default_vat_percent: default_vat_percent(),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "ledger", "sales")
        .map(|dirs| dirs.data_dir().join("ledger.db"))
        .unwrap_or_else(|| PathBuf::from("ledger.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub invoice: InvoiceSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub tax: TaxSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Defaults with an in-memory database, for tests and tooling.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.database.path = PathBuf::from(":memory:");
        config.database.max_connections = 1;
        config
    }

    /// Reads `ledger.toml` (if any), then env overrides, then validates.
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    EngineError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                config = toml::from_str(&contents)
                    .map_err(|e| EngineError::Config(format!("invalid TOML: {}", e)))?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Like [`load`](Self::load) but falls back to defaults with a warning.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.invoice.width < MIN_INVOICE_DIGITS {
            return Err(EngineError::Config(format!(
                "invoice.width must be at least {}",
                MIN_INVOICE_DIGITS
            )));
        }

        if self.invoice.fallback_scan_limit == 0 {
            return Err(EngineError::Config(
                "invoice.fallback_scan_limit must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be greater than 0".into(),
            ));
        }

        if self.default_tax_rate().is_none() {
            return Err(EngineError::Config(format!(
                "tax.default_vat_percent must be between 0 and 100, got {}",
                self.tax.default_vat_percent
            )));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// `LEDGER_*` variables.
    fn apply_env_overrides(&mut self) {
        if let Ok(floor) = std::env::var("LEDGER_INVOICE_FLOOR") {
            match floor.parse::<u64>() {
                Ok(f) => {
                    debug!(floor = f, "Overriding invoice floor from environment");
                    self.invoice.floor = f;
                }
                Err(_) => warn!(value = %floor, "Ignoring invalid LEDGER_INVOICE_FLOOR"),
            }
        }

        if let Ok(width) = std::env::var("LEDGER_INVOICE_WIDTH") {
            if let Ok(w) = width.parse::<usize>() {
                self.invoice.width = w;
            }
        }

        if let Ok(retries) = std::env::var("LEDGER_CREATE_MAX_RETRIES") {
            if let Ok(r) = retries.parse::<u32>() {
                self.retry.max_attempts = r;
            }
        }

        if let Ok(base) = std::env::var("LEDGER_RETRY_BASE_MS") {
            if let Ok(ms) = base.parse::<u64>() {
                self.retry.base_delay_ms = ms;
            }
        }

        if let Ok(window) = std::env::var("LEDGER_EDIT_WINDOW_SECS") {
            if let Ok(secs) = window.parse::<u64>() {
                self.concurrency.edit_collision_window_secs = secs;
            }
        }

        if let Ok(vat) = std::env::var("LEDGER_DEFAULT_VAT_PERCENT") {
            match vat.trim().parse::<Decimal>() {
                Ok(v) => self.tax.default_vat_percent = v,
                Err(_) => warn!(value = %vat, "Ignoring invalid LEDGER_DEFAULT_VAT_PERCENT"),
            }
        }

        if let Ok(path) = std::env::var("LEDGER_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
    }

    /// `<config dir>/ledger.toml` for this platform.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ledger", "sales")
            .map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn default_tax_rate(&self) -> Option<TaxRate> {
        TaxRate::from_percent(self.tax.default_vat_percent)
    }

    pub fn edit_collision_window(&self) -> chrono::Duration {
        let secs = i64::try_from(self.concurrency.edit_collision_window_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs)
    }

    /// Database settings as a pool configuration.
    pub fn db_config(&self) -> DbConfig {
        if self.database.path.as_os_str() == DbConfig::IN_MEMORY {
            return DbConfig::in_memory();
        }
        DbConfig::new(self.database.path.clone()).max_connections(self.database.max_connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.invoice.floor, 2000);
        assert_eq!(config.invoice.width, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(50));
        assert_eq!(config.concurrency.edit_collision_window_secs, 30);
        assert_eq!(config.default_tax_rate(), Some(TaxRate::from_bps(500)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.invoice.width = 3;
        assert!(config.validate().is_err());
        config.invoice.width = 6;

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 1;

        config.tax.default_vat_percent = Decimal::from(101);
        assert!(config.validate().is_err());
        config.tax.default_vat_percent = Decimal::new(175, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [invoice]
            floor = 9000

            [tax]
            default_vat_percent = "7.5"
            "#,
        )
        .unwrap();

        assert_eq!(config.invoice.floor, 9000);
        assert_eq!(config.invoice.width, 4);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.default_tax_rate(), Some(TaxRate::from_bps(750)));
    }

    #[test]
    fn test_in_memory_db_config() {
        let config = EngineConfig::in_memory();
        assert!(config.db_config().is_in_memory());
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[invoice]"));
        assert!(toml_str.contains("[retry]"));
    }
}
