use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use crate::bradley_terry::StrengthRatings;

const CACHE_DIR: &str = "tt_forecast";
const RATINGS_FILE: &str = "ratings.json";

/// `$XDG_CACHE_HOME/tt_forecast/ratings.json`, else under `~/.cache`.
pub fn default_ratings_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR).join(RATINGS_FILE));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".cache")
            .join(CACHE_DIR)
            .join(RATINGS_FILE),
    )
}

/// Writes through a sibling tmp file and renames it into place.
pub fn save_ratings(path: &Path, ratings: &StrengthRatings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create ratings dir {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(ratings).context("serialize ratings")?;
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("swap ratings into {}", path.display()))?;
    Ok(())
}

/// Reads ratings; entries that are not finite and positive are dropped.
pub fn load_ratings(path: &Path) -> Result<StrengthRatings> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut ratings: StrengthRatings =
        serde_json::from_str(&raw).with_context(|| format!("parse ratings {}", path.display()))?;
    let before = ratings.ratings.len();
    ratings.ratings.retain(|_, v| v.is_finite() && *v > 0.0);
    let dropped = before - ratings.ratings.len();
    if dropped > 0 {
        warn!(dropped, path = %path.display(), "ignoring non-positive ratings");
    }
    Ok(ratings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bradley_terry::{MmConfig, fit};

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tt_forecast_test_{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn save_then_load() {
        let path = scratch("saved.json");
        let fitted = fit(&[("A", "B"), ("A", "B"), ("B", "A")], &MmConfig::default());
        save_ratings(&path, &fitted).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        let back = load_ratings(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert!((back.prob_match_win("A", "B") - fitted.prob_match_win("A", "B")).abs() < 1e-12);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bare_ratings_object_loads() {
        let path = scratch("bare.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "ratings": { "A": 0.7, "B": 0.3, "C": -1.0 } }"#).unwrap();
        let r = load_ratings(&path).unwrap();
        assert_eq!(r.len(), 2);
        assert!(!r.converged);
        assert!(!r.contains("C"));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_ratings(&scratch("nope.json")).unwrap_err();
        assert!(err.to_string().contains("read"));
    }
}
