// ===============================
// src/config.rs
// ===============================
use clap::Parser;
use dotenvy::dotenv;
use thiserror::Error;

use crate::policy::{PartialFillMode, PolicyConfig, QuoteAnchor, ThresholdPolicy};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown policy preset `{0}` (market_maker, inventory, passive, sniper, profitable)")]
    UnknownPreset(String),
    #[error("unknown partial fill mode `{0}` (cancel, top_up)")]
    UnknownPartialFillMode(String),
    #[error("{name} must be a finite, non-negative fraction, got {value}")]
    InvalidFraction { name: &'static str, value: f64 },
    #[error("{name} must be positive, got {value}")]
    InvalidLimit { name: &'static str, value: i64 },
}

/// Named threshold sets. Every preset is the same policy with different data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyPreset {
    MarketMaker,
    Inventory,
    Passive,
    Sniper,
    Profitable,
}

impl PolicyPreset {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market_maker" | "marketmaker" | "mm" => Some(PolicyPreset::MarketMaker),
            "inventory" | "top_up" | "inv" => Some(PolicyPreset::Inventory),
            "passive" => Some(PolicyPreset::Passive),
            "sniper" => Some(PolicyPreset::Sniper),
            "profitable" | "profit" => Some(PolicyPreset::Profitable),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PolicyPreset::MarketMaker => "market_maker",
            PolicyPreset::Inventory => "inventory",
            PolicyPreset::Passive => "passive",
            PolicyPreset::Sniper => "sniper",
            PolicyPreset::Profitable => "profitable",
        }
    }

    pub fn config(&self) -> PolicyConfig {
        let base = PolicyConfig::default();
        match self {
            PolicyPreset::MarketMaker => base,
            PolicyPreset::Inventory => PolicyConfig { partial_fill: PartialFillMode::TopUp, ..base },
            PolicyPreset::Passive => PolicyConfig {
                max_total_orders: 3,
                quantity_cap: 75,
                quote_anchor: QuoteAnchor::NearTouch(-1),
                ..base
            },
            // takes whatever the touch offers
            PolicyPreset::Sniper => PolicyConfig {
                max_total_orders: 5,
                quantity_cap: i64::MAX,
                quote_anchor: QuoteAnchor::FarTouch,
                ..base
            },
            // exits chase the bid two ticks up
            PolicyPreset::Profitable => PolicyConfig { max_active_orders: 2, reprice_exit_ticks: Some(2), ..base },
        }
    }
}

fn parse_partial_fill(s: &str) -> Result<PartialFillMode, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "cancel" => Ok(PartialFillMode::Cancel),
        "top_up" | "topup" => Ok(PartialFillMode::TopUp),
        other => Err(ConfigError::UnknownPartialFillMode(other.to_string())),
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("MAX_PRICE_DISTANCE_PERCENT", self.max_price_distance_percent),
            ("PROFIT_THRESHOLD", self.profit_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidFraction { name, value });
            }
        }
        if self.quantity_cap <= 0 {
            return Err(ConfigError::InvalidLimit { name: "QUANTITY_CAP", value: self.quantity_cap });
        }
        if self.max_active_orders == 0 {
            return Err(ConfigError::InvalidLimit { name: "MAX_ACTIVE_ORDERS", value: 0 });
        }
        if let Some(ticks) = self.reprice_exit_ticks.filter(|t| *t <= 0) {
            return Err(ConfigError::InvalidLimit { name: "REPRICE_EXIT_TICKS", value: ticks });
        }
        Ok(())
    }
}

/// Per-threshold overrides on top of the chosen preset.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct Overrides {
    #[arg(long, env = "MAX_TOTAL_ORDERS")]
    pub max_total_orders: Option<usize>,
    #[arg(long, env = "MAX_ACTIVE_ORDERS")]
    pub max_active_orders: Option<usize>,
    #[arg(long, env = "MAX_PRICE_DISTANCE_PERCENT")]
    pub max_price_distance_percent: Option<f64>,
    #[arg(long, env = "PROFIT_THRESHOLD")]
    pub profit_threshold: Option<f64>,
    #[arg(long, env = "QUANTITY_CAP")]
    pub quantity_cap: Option<i64>,
    #[arg(long, env = "PARTIAL_FILL_MODE")]
    pub partial_fill_mode: Option<String>,
    /// Ticks relative to the best bid; replaces the preset's anchor.
    #[arg(long, env = "QUOTE_OFFSET", allow_negative_numbers = true)]
    pub quote_offset: Option<i64>,
    /// Turns on exit repricing for any preset.
    #[arg(long, env = "REPRICE_EXIT_TICKS", allow_negative_numbers = true)]
    pub reprice_exit_ticks: Option<i64>,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "algo_engine", version, about = "Single-instrument evaluation engine against a simulated venue")]
pub struct Args {
    #[arg(long, env = "SYMBOL", default_value = "XLON")]
    pub symbol: String,
    #[arg(long, env = "INSTRUMENT_ID", default_value_t = 1)]
    pub instrument_id: u64,

    #[arg(long, env = "POLICY", default_value = "market_maker")]
    pub policy: String,

    // files/metrics
    #[arg(long, env = "RECORD_FILE")]
    pub record_file: Option<String>,
    #[arg(long, env = "METRICS_PORT", default_value_t = 9898)]
    pub metrics_port: u16,

    #[arg(long, env = "FEED_INTERVAL_MS", default_value_t = 50)]
    pub feed_interval_ms: u64,

    #[command(flatten)]
    pub overrides: Overrides,
}

impl Args {
    /// Preset, then overrides, then validation.
    pub fn policy(&self) -> Result<ThresholdPolicy, ConfigError> {
        let preset = PolicyPreset::parse_one(&self.policy).ok_or_else(|| ConfigError::UnknownPreset(self.policy.clone()))?;
        let mut cfg = preset.config();
        let o = &self.overrides;
        if let Some(v) = o.max_total_orders { cfg.max_total_orders = v; }
        if let Some(v) = o.max_active_orders { cfg.max_active_orders = v; }
        if let Some(v) = o.max_price_distance_percent { cfg.max_price_distance_percent = v; }
        if let Some(v) = o.profit_threshold { cfg.profit_threshold = v; }
        if let Some(v) = o.quantity_cap { cfg.quantity_cap = v; }
        if let Some(v) = o.partial_fill_mode.as_deref() { cfg.partial_fill = parse_partial_fill(v)?; }
        if let Some(v) = o.quote_offset { cfg.quote_anchor = QuoteAnchor::NearTouch(v); }
        if let Some(v) = o.reprice_exit_ticks { cfg.reprice_exit_ticks = Some(v); }
        cfg.validate()?;
        Ok(ThresholdPolicy::new(preset.name(), cfg))
    }
}

pub fn load() -> Result<(Args, ThresholdPolicy), ConfigError> {
    // .env first so clap sees its values as env
    let _ = dotenv();
    let args = Args::parse();
    let policy = args.policy()?;
    Ok((args, policy))
}
