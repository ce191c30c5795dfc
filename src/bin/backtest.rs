use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tt_forecast::calibration::{self, Metrics};
use tt_forecast::committee::{Source, Verdict};
use tt_forecast::config::EngineConfig;
use tt_forecast::forecast::{self, Forecast, ForecastRequest};

const DEFAULT_CASES: &str = "tests/fixtures/backtest_cases.json";
const ECE_BINS: usize = 10;

#[derive(Debug, serde::Deserialize)]
struct BacktestCase {
    #[serde(flatten)]
    request: ForecastRequest,
    a_won: bool,
}

#[derive(Debug, Clone)]
struct EstimatorReport {
    name: &'static str,
    all: Metrics,
    ece: f64,
}

type Extractor = fn(&Forecast) -> Option<f64>;

const ESTIMATORS: [(&str, Extractor); 6] = [
    ("score", score_p),
    ("bradley_terry", bt_p),
    ("h2h", h2h_p),
    ("external", external_p),
    ("consensus", consensus_p),
    ("meta_winner", meta_p),
];

fn score_p(f: &Forecast) -> Option<f64> {
    f.estimate(Source::Score)
}

fn bt_p(f: &Forecast) -> Option<f64> {
    f.estimate(Source::BradleyTerry)
}

fn h2h_p(f: &Forecast) -> Option<f64> {
    f.estimate(Source::HeadToHead)
}

fn external_p(f: &Forecast) -> Option<f64> {
    f.estimate(Source::External)
}

fn consensus_p(f: &Forecast) -> Option<f64> {
    Some(f.consensus.p)
}

fn meta_p(f: &Forecast) -> Option<f64> {
    Some(f.meta.winner)
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config_path = parse_path_arg("--config");
    let mut cfg = EngineConfig::resolve(config_path.as_deref())?;
    if let Some(n) = parse_f64_arg("--boot") {
        cfg.committee.n_boot = n.max(0.0) as usize;
    }

    let cases_path = std::env::args()
        .skip(1)
        .find(|arg| !arg.starts_with("--") && !is_flag_value(arg))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CASES));
    let raw = fs::read_to_string(&cases_path)
        .with_context(|| format!("read cases {}", cases_path.display()))?;
    let cases: Vec<BacktestCase> = serde_json::from_str(&raw)
        .with_context(|| format!("parse cases {}", cases_path.display()))?;
    if cases.len() < 2 {
        return Err(anyhow!("need at least two cases, got {}", cases.len()));
    }
    info!(cases = cases.len(), path = %cases_path.display(), "running backtest");

    let outcomes: Vec<bool> = cases.iter().map(|c| c.a_won).collect();
    let requests: Vec<ForecastRequest> = cases.into_iter().map(|c| c.request).collect();
    let forecasts = forecast::run_batch(&requests, &cfg);

    println!("Backtest");
    println!("Cases: {} ({})", outcomes.len(), cases_path.display());
    println!();

    let mut reports = Vec::new();
    for (name, extract) in ESTIMATORS {
        let mut preds = Vec::new();
        let mut outs = Vec::new();
        for (f, won) in forecasts.iter().zip(&outcomes) {
            if let Some(p) = extract(f) {
                preds.push(p);
                outs.push(*won);
            }
        }
        reports.push(EstimatorReport {
            name,
            all: calibration::evaluate_probs(&preds, &outs),
            ece: calibration::expected_calibration_error(&preds, &outs, ECE_BINS),
        });
    }
    for r in &reports {
        println!(
            "{:<14} n={} brier={:.4} ll={:.4} acc={:.3} ece={:.4}",
            r.name, r.all.samples, r.all.brier, r.all.log_loss, r.all.accuracy, r.ece
        );
    }

    // Temperature for the raw committee blend, fitted on the leading split.
    let committee: Vec<f64> = forecasts.iter().map(|f| f.consensus.committee).collect();
    let split_idx = train_split_index(committee.len());
    let (temperature, train) =
        calibration::fit_temperature(&committee[..split_idx], &outcomes[..split_idx]);
    let scaled: Vec<f64> = committee
        .iter()
        .map(|p| calibration::temperature_scale(*p, temperature))
        .collect();
    let val_raw = calibration::evaluate_probs(&committee[split_idx..], &outcomes[split_idx..]);
    let val_cal = calibration::evaluate_probs(&scaled[split_idx..], &outcomes[split_idx..]);

    println!();
    println!(
        "temperature fit T={:.2} train_ll={:.4} val_ll_raw={:.4} val_ll_cal={:.4} val_gain={:+.5}",
        temperature,
        train.log_loss,
        val_raw.log_loss,
        val_cal.log_loss,
        val_raw.log_loss - val_cal.log_loss
    );

    let verdicts = forecasts.iter().fold([0usize; 3], |mut acc, f| {
        match f.consensus.verdict {
            Verdict::NoBet => acc[0] += 1,
            Verdict::Lean => acc[1] += 1,
            Verdict::Bet(_) => acc[2] += 1,
        }
        acc
    });
    println!(
        "verdicts no_bet={} lean={} bet={}",
        verdicts[0], verdicts[1], verdicts[2]
    );

    if let Some(out) = parse_path_arg("--write-config") {
        cfg.committee.temperature = temperature;
        let json = serde_json::to_string_pretty(&cfg).context("serialize config")?;
        let tmp = out.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &out).with_context(|| format!("swap config into {}", out.display()))?;
        println!("Wrote {}", out.display());
    }

    Ok(())
}

fn train_split_index(n: usize) -> usize {
    if n <= 2 {
        return 1;
    }
    let idx = ((n as f64) * 0.85).round() as usize;
    idx.clamp(1, n - 1)
}

const VALUE_FLAGS: [&str; 3] = ["--config", "--boot", "--write-config"];

fn is_flag_value(arg: &str) -> bool {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    args.windows(2)
        .any(|w| VALUE_FLAGS.contains(&w[0].as_str()) && w[1] == arg)
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix(&format!("{name}=")) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<f64>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<f64>()
        {
            return Some(v);
        }
    }
    None
}
