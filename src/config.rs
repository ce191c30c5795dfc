use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bradley_terry::MmConfig;
use crate::committee::CommitteeOptions;
use crate::markov::MarkovConfig;
use crate::meta::MetaParams;
use crate::risk::{Locale, RiskThresholds};

/// L2 strength regularization used by the forecast pipeline.
pub const PIPELINE_L2: f64 = 1e-3;

/// Every tunable of the engine. Missing JSON keys fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mm: MmConfig,
    pub markov: MarkovConfig,
    pub committee: CommitteeOptions,
    pub risk: RiskThresholds,
    pub meta: MetaParams,
    pub locale: Locale,
    /// Reference probability the committee value is measured against.
    pub target_q: f64,
    pub rematch_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mm: MmConfig::with_l2(PIPELINE_L2),
            markov: MarkovConfig::default(),
            committee: CommitteeOptions::default(),
            risk: RiskThresholds::default(),
            meta: MetaParams::default(),
            locale: Locale::default(),
            target_q: 0.5,
            rematch_hours: 48,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Defaults, overlaid by the file when given, then by the environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Applies `TT_BOOT_DRAWS`, `TT_TEMPERATURE`, `TT_MM_L2` and `TT_LOCALE`.
    /// Values that do not parse are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Some(n) = parsed_env::<usize>("TT_BOOT_DRAWS") {
            self.committee.n_boot = n;
        }
        if let Some(t) = parsed_env::<f64>("TT_TEMPERATURE") {
            if t.is_finite() && t > 0.0 {
                self.committee.temperature = t;
            } else {
                warn!(value = t, "TT_TEMPERATURE must be positive; keeping {}", self.committee.temperature);
            }
        }
        if let Some(l2) = parsed_env::<f64>("TT_MM_L2") {
            if l2.is_finite() && l2 >= 0.0 {
                self.mm.l2 = l2;
            } else {
                warn!(value = l2, "TT_MM_L2 must be non-negative; ignoring");
            }
        }
        if let Some(raw) = opt_env("TT_LOCALE") {
            match Locale::parse(&raw) {
                Some(locale) => self.locale = locale,
                None => warn!(value = %raw, "unknown TT_LOCALE; expected ru or en"),
            }
        }
    }
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .and_then(|val| if val.trim().is_empty() { None } else { Some(val) })
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = opt_env(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{ "committee": { "temperature": 1.4, "n_boot": 50 }, "locale": "en" }"#,
        )
        .unwrap();
        assert_eq!(cfg.committee.temperature, 1.4);
        assert_eq!(cfg.committee.n_boot, 50);
        assert_eq!(cfg.committee.weights.score, 0.9);
        assert_eq!(cfg.committee.thresholds.no_bet_sigma, 0.07);
        assert_eq!(cfg.locale, Locale::En);
        assert_eq!(cfg.mm.l2, PIPELINE_L2);
        assert_eq!(cfg.meta.kappa, 0.22);
        assert_eq!(cfg.target_q, 0.5);
    }

    #[test]
    fn empty_object_is_default() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.markov.squash_k, 7.0);
        assert_eq!(cfg.risk.avoid_at, 2);
        assert_eq!(cfg.rematch_hours, 48);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here.json"));
    }
}
