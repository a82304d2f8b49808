//! The shipped configuration files load cleanly and stay in step with the
//! built-in defaults.

use rust_decimal_macros::dec;
use std::path::PathBuf;
use updown_core::{AppConfig, Asset, ConfigLoader};

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/updown.toml")
}

#[test]
fn test_shipped_config_matches_defaults() {
    let loaded = ConfigLoader::new(shipped_config()).load().unwrap();
    let defaults = AppConfig::default();

    assert_eq!(loaded.assets, Asset::all().to_vec());
    assert_eq!(loaded.edge.min_edge, defaults.edge.min_edge);
    assert_eq!(loaded.edge.min_move, defaults.edge.min_move);
    assert_eq!(loaded.edge.hard_cap, defaults.edge.hard_cap);
    assert_eq!(loaded.exit.stop_loss_fraction, defaults.exit.stop_loss_fraction);
    assert_eq!(loaded.exit.danger_zone_secs, defaults.exit.danger_zone_secs);
    assert_eq!(
        loaded.lifecycle.max_trades_per_window,
        defaults.lifecycle.max_trades_per_window
    );
    assert_eq!(loaded.risk.max_exposure, defaults.risk.max_exposure);
    assert_eq!(loaded.clob.chain_id, 137);
    assert_eq!(loaded.store.positions_path, defaults.store.positions_path);
}

#[test]
fn test_paper_profile_overrides_store_and_balance() {
    let loaded = ConfigLoader::new(shipped_config())
        .with_profile("paper")
        .load()
        .unwrap();

    assert_eq!(loaded.store.positions_path, "data/paper-positions.json");
    assert_eq!(loaded.paper.starting_balance, dec!(500));
    assert!((loaded.paper.fill_rate - 1.0).abs() < f64::EPSILON);
    // untouched sections come from the base file
    assert_eq!(loaded.edge.max_entry_price, dec!(0.65));
}

#[test]
fn test_live_profile_tightens_risk() {
    let loaded = ConfigLoader::new(shipped_config())
        .with_profile("live")
        .load()
        .unwrap();

    assert_eq!(loaded.risk.max_daily_loss, dec!(25));
    assert_eq!(loaded.risk.max_exposure, dec!(40));
    assert_eq!(loaded.lifecycle.max_trades_per_window, 2);
    assert_eq!(loaded.lifecycle.entry_cooldown_secs, 10);
}
