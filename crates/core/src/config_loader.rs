use crate::config::AppConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/updown.toml";
pub const ENV_PREFIX: &str = "UPDOWN_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    #[error("{0}")]
    Validation(String),
}

pub struct ConfigLoader {
    path: PathBuf,
    profile: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_PATH)
    }
}

impl ConfigLoader {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            profile: None,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Defaults, then the TOML file, then the profile file beside it, then
    /// `UPDOWN_` environment variables (`__` separates nested keys).
    #[must_use]
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&self.path));

        if let Some(profile) = &self.profile {
            figment = figment.merge(Toml::file(profile_path(&self.path, profile)));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or a value is out of range.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = self.figment().extract().map_err(Box::new)?;
        validate(&config)?;
        Ok(config)
    }
}

/// `config/updown.toml` + `paper` -> `config/updown.paper.toml`
fn profile_path(base: &Path, profile: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("updown");
    base.with_file_name(format!("{stem}.{profile}.toml"))
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let edge = &config.edge;
    if config.assets.is_empty() {
        return Err(ConfigError::Validation("no assets configured".to_string()));
    }
    if edge.min_entry_price >= edge.max_entry_price {
        return Err(ConfigError::Validation(format!(
            "entry band is empty: [{}, {})",
            edge.min_entry_price, edge.max_entry_price
        )));
    }
    if !(0.0 < edge.min_fair && edge.min_fair < edge.max_fair && edge.max_fair < 1.0) {
        return Err(ConfigError::Validation(format!(
            "fair bounds must satisfy 0 < min < max < 1, got [{}, {}]",
            edge.min_fair, edge.max_fair
        )));
    }
    if edge.min_stake > edge.max_stake || edge.max_stake > edge.hard_cap {
        return Err(ConfigError::Validation(
            "stake bounds must satisfy min_stake <= max_stake <= hard_cap".to_string(),
        ));
    }
    if config.tracker.fresh_snapshot_secs > config.tracker.multi_source_secs {
        return Err(ConfigError::Validation(
            "fresh_snapshot_secs must not exceed multi_source_secs".to_string(),
        ));
    }
    if config.lifecycle.fill_poll_attempts == 0 {
        return Err(ConfigError::Validation(
            "fill_poll_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Asset;
    use figment::Jail;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::new("config/absent.toml").load().unwrap();
            assert_eq!(config.edge.min_edge, dec!(0.10));
            assert_eq!(config.lifecycle.max_trades_per_window, 3);
            assert_eq!(config.assets.len(), 4);
            Ok(())
        });
    }

    #[test]
    fn file_profile_and_env_layer_in_order() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/updown.toml",
                r#"
                assets = ["btc", "eth"]

                [edge]
                min_edge = 0.12
                move_weight = 70.0

                [exit]
                danger_zone_secs = 60
                "#,
            )?;
            jail.create_file(
                "config/updown.paper.toml",
                r#"
                [edge]
                min_edge = 0.15
                "#,
            )?;
            jail.set_env("UPDOWN_EXIT__DANGER_ZONE_SECS", "30");

            let config = ConfigLoader::default().with_profile("paper").load().unwrap();
            assert_eq!(config.assets, vec![Asset::Btc, Asset::Eth]);
            assert_eq!(config.edge.min_edge, dec!(0.15));
            assert!((config.edge.move_weight - 70.0).abs() < f64::EPSILON);
            assert_eq!(config.exit.danger_zone_secs, 30);
            // untouched keys keep their defaults
            assert_eq!(config.exit.retry_cooldown_secs, 3);
            Ok(())
        });
    }

    #[test]
    fn rejects_empty_entry_band() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bad.toml",
                r#"
                [edge]
                min_entry_price = 0.70
                max_entry_price = 0.65
                "#,
            )?;
            let err = ConfigLoader::new("bad.toml").load().unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn profile_path_sits_beside_base_file() {
        assert_eq!(
            profile_path(Path::new("config/updown.toml"), "live"),
            PathBuf::from("config/updown.live.toml")
        );
    }
}
