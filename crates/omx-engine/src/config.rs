//! Engine configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// Quoting strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyMode {
    /// Symmetric quotes at fixed offsets from top-of-book.
    #[default]
    Maker,
    /// Maker plus depth-imbalance side suppression and stop refresh.
    OffsetMaker,
}

/// Engine configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Instrument symbol (e.g. "BTCUSDT").
    pub symbol: String,

    #[serde(default)]
    pub mode: StrategyMode,

    /// Control-loop tick period in milliseconds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Minimum price increment of the instrument.
    pub price_tick: Decimal,

    /// Minimum quantity increment of the instrument.
    pub qty_step: Decimal,

    /// Base entry quantity.
    pub trade_amount: Decimal,

    /// Entry-size multiplier, >= 1.
    #[serde(default = "default_volume_boost")]
    pub volume_boost: Decimal,

    /// Quote offset below the best bid for entries.
    #[serde(default)]
    pub bid_offset: Decimal,

    /// Quote offset above the best ask for entries.
    #[serde(default)]
    pub ask_offset: Decimal,

    /// Absolute USDT loss budget for the open position; the protective stop
    /// and the risk check both derive from it.
    #[serde(default = "default_loss_limit")]
    pub loss_limit: Decimal,

    /// Maximum `|price - mark| / mark` tolerated on reduce-only closes.
    #[serde(default = "default_max_close_slippage_pct")]
    pub max_close_slippage_pct: Decimal,

    /// Force IOC limit orders for closes instead of market orders.
    #[serde(default)]
    pub strict_limit_only: bool,

    /// Minimum time between reprices of an entry on the same side.
    /// Defaults to `max(1500ms, 3 x refresh_interval_ms)` when unset.
    #[serde(default)]
    pub reprice_dwell_ms: Option<u64>,

    /// Minimum price move, in ticks, that justifies repricing an entry.
    #[serde(default = "default_min_reprice_ticks")]
    pub min_reprice_ticks: u32,

    /// Trade-log ring capacity.
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.symbol.is_empty() {
            return Err(EngineError::Config("symbol must not be empty".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(EngineError::Config("refresh_interval_ms must be > 0".into()));
        }
        for (name, value) in [
            ("price_tick", self.price_tick),
            ("qty_step", self.qty_step),
            ("trade_amount", self.trade_amount),
        ] {
            if value <= Decimal::ZERO {
                return Err(EngineError::Config(format!("{name} must be positive")));
            }
        }
        if self.volume_boost < Decimal::ONE {
            return Err(EngineError::Config("volume_boost must be >= 1".into()));
        }
        if self.bid_offset.is_sign_negative() || self.ask_offset.is_sign_negative() {
            return Err(EngineError::Config("quote offsets must be >= 0".into()));
        }
        if self.max_close_slippage_pct <= Decimal::ZERO {
            return Err(EngineError::Config(
                "max_close_slippage_pct must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Dwell window between entry reprices on one side.
    pub fn effective_reprice_dwell_ms(&self) -> u64 {
        self.reprice_dwell_ms
            .unwrap_or_else(|| (3 * self.refresh_interval_ms).max(1500))
    }

    /// Coordinator slot-lock deadline.
    pub fn lock_timeout_ms(&self) -> u64 {
        4 * self.refresh_interval_ms
    }

    /// Entry quantity after the boost multiplier.
    pub fn entry_amount(&self) -> Decimal {
        self.trade_amount * self.volume_boost
    }

    /// Top-of-book quoting: both offsets zero.
    pub fn quotes_at_top(&self) -> bool {
        self.bid_offset.is_zero() && self.ask_offset.is_zero()
    }
}

fn default_refresh_interval_ms() -> u64 {
    1000
}
fn default_volume_boost() -> Decimal {
    Decimal::ONE
}
fn default_loss_limit() -> Decimal {
    Decimal::new(5, 0) // 5 USDT
}
fn default_max_close_slippage_pct() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_min_reprice_ticks() -> u32 {
    1
}
fn default_max_log_entries() -> usize {
    200
}
