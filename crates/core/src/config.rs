use crate::types::Asset;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete runtime configuration. Every section has defaults so a missing
/// file or a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub assets: Vec<Asset>,
    pub tracker: TrackerConfig,
    pub odds: OddsConfig,
    pub edge: EdgeConfig,
    pub exit: ExitConfig,
    pub lifecycle: LifecycleConfig,
    pub risk: RiskConfig,
    pub schedule: ScheduleConfig,
    pub clob: ClobConfig,
    pub store: StoreConfig,
    pub paper: PaperConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            assets: Asset::all().to_vec(),
            tracker: TrackerConfig::default(),
            odds: OddsConfig::default(),
            edge: EdgeConfig::default(),
            exit: ExitConfig::default(),
            lifecycle: LifecycleConfig::default(),
            risk: RiskConfig::default(),
            schedule: ScheduleConfig::default(),
            clob: ClobConfig::default(),
            store: StoreConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

// ============================================
// Reference tracker and spot feeds
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub window_secs: u64,
    /// Windows starting within this lead get a capture scheduled at their start.
    pub capture_lead_secs: u64,
    /// Latest window age at which a single fresh snapshot is trusted.
    pub fresh_snapshot_secs: u64,
    /// Latest window age at which a multi-source average is trusted.
    pub multi_source_secs: u64,
    pub min_sources: usize,
    pub eviction_grace_secs: u64,
    pub spot_max_age_secs: u64,
    pub binance_ws_url: String,
    pub coinbase_api_url: String,
    pub coinbase_poll_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_secs: 900,
            capture_lead_secs: 30,
            fresh_snapshot_secs: 5,
            multi_source_secs: 30,
            min_sources: 2,
            eviction_grace_secs: 120,
            spot_max_age_secs: 5,
            binance_ws_url: "wss://fstream.binance.com/ws".to_string(),
            coinbase_api_url: "https://api.coinbase.com".to_string(),
            coinbase_poll_ms: 1000,
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    #[must_use]
    pub fn spot_max_age(&self) -> Duration {
        Duration::from_secs(self.spot_max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OddsConfig {
    pub push_stale_secs: u64,
    pub cache_stale_secs: u64,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            push_stale_secs: 10,
            cache_stale_secs: 60,
        }
    }
}

// ============================================
// Edge model
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Minimum absolute fractional displacement from the reference.
    pub min_move: Decimal,
    pub min_edge: Decimal,
    /// Inclusive lower bound of the entry band.
    pub min_entry_price: Decimal,
    /// Exclusive upper bound of the entry band.
    pub max_entry_price: Decimal,
    pub min_seconds_remaining: i64,
    pub move_weight: f64,
    pub time_weight: f64,
    pub min_fair: f64,
    pub max_fair: f64,
    pub kelly_fraction: f64,
    pub max_move_multiplier: f64,
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    pub hard_cap: Decimal,
    pub min_shares: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_move: Decimal::new(2, 3),
            min_edge: Decimal::new(10, 2),
            min_entry_price: Decimal::new(5, 2),
            max_entry_price: Decimal::new(65, 2),
            min_seconds_remaining: 60,
            move_weight: 80.0,
            time_weight: 0.5,
            min_fair: 0.05,
            max_fair: 0.95,
            kelly_fraction: 0.25,
            max_move_multiplier: 2.0,
            min_stake: Decimal::ONE,
            max_stake: Decimal::new(10, 0),
            hard_cap: Decimal::new(25, 0),
            min_shares: Decimal::new(5, 0),
        }
    }
}

// ============================================
// Exit rules
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub danger_zone_secs: i64,
    /// Fractional drop from entry that triggers the stop.
    pub stop_loss_fraction: Decimal,
    pub target_markup: Decimal,
    pub min_markup: Decimal,
    pub target_ceiling: Decimal,
    pub trailing_activation: Decimal,
    pub trailing_distance: Decimal,
    /// Current/entry displacement ratio below which the move counts as weak.
    pub weak_move_ratio: Decimal,
    pub min_profit_markup: Decimal,
    pub retry_cooldown_secs: i64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            danger_zone_secs: 45,
            stop_loss_fraction: Decimal::new(20, 2),
            target_markup: Decimal::new(30, 2),
            min_markup: Decimal::new(5, 2),
            target_ceiling: Decimal::new(95, 2),
            trailing_activation: Decimal::new(5, 2),
            trailing_distance: Decimal::new(8, 2),
            weak_move_ratio: Decimal::new(5, 1),
            min_profit_markup: Decimal::new(2, 2),
            retry_cooldown_secs: 3,
        }
    }
}

// ============================================
// Lifecycle, risk, scheduling
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub max_trades_per_window: u32,
    pub max_trades_per_day: u32,
    pub entry_cooldown_secs: i64,
    pub entry_slippage: Decimal,
    pub exit_slippage: Decimal,
    pub fill_poll_interval_ms: u64,
    pub fill_poll_attempts: u32,
    /// Keep the position through resolution instead of forcing a danger-zone exit.
    pub hold_to_resolution: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_trades_per_window: 3,
            max_trades_per_day: 200,
            entry_cooldown_secs: 10,
            entry_slippage: Decimal::new(2, 2),
            exit_slippage: Decimal::new(3, 2),
            fill_poll_interval_ms: 500,
            fill_poll_attempts: 5,
            hold_to_resolution: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_daily_loss: Decimal,
    pub max_exposure: Decimal,
    pub max_consecutive_losses: u32,
    pub pause_secs: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss: Decimal::new(50, 0),
            max_exposure: Decimal::new(100, 0),
            max_consecutive_losses: 3,
            pause_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub capture_scan_ms: u64,
    pub odds_refresh_ms: u64,
    pub opportunity_scan_ms: u64,
    pub exit_scan_ms: u64,
    pub settlement_scan_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            capture_scan_ms: 5_000,
            odds_refresh_ms: 2_000,
            opportunity_scan_ms: 500,
            exit_scan_ms: 500,
            settlement_scan_ms: 30_000,
        }
    }
}

// ============================================
// Exchange, storage, paper trading
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClobConfig {
    pub host: String,
    pub gamma_url: String,
    pub ws_url: String,
    pub chain_id: u64,
    pub neg_risk: bool,
    pub fee_rate_bps: u32,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for ClobConfig {
    fn default() -> Self {
        Self {
            host: "https://clob.polymarket.com".to_string(),
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            chain_id: 137,
            neg_risk: false,
            fee_rate_bps: 0,
            timeout_secs: 5,
            requests_per_minute: 300,
        }
    }
}

impl ClobConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub positions_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            positions_path: "data/positions.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub starting_balance: Decimal,
    pub fill_rate: f64,
    pub partial_fill_rate: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::new(1000, 0),
            fill_rate: 0.95,
            partial_fill_rate: 0.10,
        }
    }
}
