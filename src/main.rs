use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use tt_forecast::committee::Source;
use tt_forecast::config::EngineConfig;
use tt_forecast::forecast::{self, Forecast, ForecastRequest};
use tt_forecast::ratings_store;

const DEFAULT_CASE: &str = "tests/fixtures/forecast_case.json";

/// A case file holds one request or a list of them.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum CaseFile {
    Many(Vec<ForecastRequest>),
    One(ForecastRequest),
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config_path = parse_value_arg("--config").map(PathBuf::from);
    let cfg = EngineConfig::resolve(config_path.as_deref())?;

    let case_path = positional_arg()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CASE));
    let raw = fs::read_to_string(&case_path)
        .with_context(|| format!("read case file {}", case_path.display()))?;
    let mut requests = match serde_json::from_str::<CaseFile>(&raw)
        .with_context(|| format!("parse case file {}", case_path.display()))?
    {
        CaseFile::Many(reqs) => reqs,
        CaseFile::One(req) => vec![req],
    };
    if requests.is_empty() {
        return Err(anyhow!("case file {} has no requests", case_path.display()));
    }

    if let Some(raw_seed) = parse_value_arg("--seed") {
        let seed = raw_seed
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid --seed {raw_seed}"))?;
        for req in &mut requests {
            req.seed = seed;
        }
    }

    let forecasts = forecast::run_batch(&requests, &cfg);

    if has_flag("--json") {
        let out = if forecasts.len() == 1 {
            serde_json::to_string_pretty(&forecasts[0])
        } else {
            serde_json::to_string_pretty(&forecasts)
        }
        .context("serialize forecast")?;
        println!("{out}");
    } else {
        for f in &forecasts {
            print_forecast(f);
        }
    }

    if let Some(target) = save_ratings_target() {
        let path = match target {
            Some(p) => p,
            None => ratings_store::default_ratings_path()
                .context("unable to resolve ratings path; pass --save-ratings=PATH")?,
        };
        // Ratings of the last pairing; batch callers should save per pairing themselves.
        if let Some(last) = forecasts.last() {
            ratings_store::save_ratings(&path, &last.ratings)?;
            eprintln!("Saved {} ratings to {}", last.ratings.len(), path.display());
        }
    }

    Ok(())
}

fn print_forecast(f: &Forecast) {
    let pct = |p: f64| 100.0 * p;
    println!("{} vs {}", f.a.id, f.b.id);
    for source in [
        Source::Score,
        Source::BradleyTerry,
        Source::HeadToHead,
        Source::External,
    ] {
        if let Some(p) = f.estimate(source) {
            println!("  {:<14} {:>5.1}%", format!("{source:?}"), pct(p));
        }
    }
    let top: Vec<String> = f
        .bt
        .top3
        .iter()
        .map(|(line, p)| format!("{} {:.1}%", line.label(), pct(*p)))
        .collect();
    println!("  BT top scores  {}", top.join(", "));
    println!(
        "  Markov         {} (decider {:.1}%)",
        f.markov.top_score.label(),
        pct(f.markov.decider)
    );

    let c = &f.consensus;
    println!(
        "  Consensus      {:.1}%  {}  value {:+.3}  U {:.2}  R {:.2}  K {:.2}  sigma {:.3}  conf {}%",
        pct(c.p),
        c.verdict.label(),
        c.value,
        c.utility,
        c.range,
        c.concordance,
        c.sigma_hat,
        c.confidence_pct
    );
    if c.sign_conflict {
        println!("  Score and BT disagree on the winner");
    }

    println!(
        "  Meta           winner {:.1}%  over 3.5 sets {:.1}%  coupling {:.3}",
        pct(f.meta.winner),
        pct(f.meta.long_match),
        f.meta.coupling
    );
    println!(
        "  Risk           {:.0}% ({} of 7), favorite {:?}{}",
        pct(f.risk.risk_score),
        f.risk.active.len(),
        f.risk.favorite,
        if f.risk.avoid_favorite {
            ", avoid favorite"
        } else {
            ""
        }
    );
    for msg in &f.risk.messages {
        println!("    - {msg}");
    }
}

const VALUE_FLAGS: [&str; 2] = ["--config", "--seed"];

fn parse_value_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

/// First argument that is neither a flag nor a flag's value.
fn positional_arg() -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        return Some(arg);
    }
    None
}

/// `Some(None)` for a bare `--save-ratings`, `Some(Some(path))` for `--save-ratings=PATH`.
fn save_ratings_target() -> Option<Option<PathBuf>> {
    std::env::args().skip(1).find_map(|arg| {
        if arg == "--save-ratings" {
            return Some(None);
        }
        arg.strip_prefix("--save-ratings=")
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(|raw| Some(PathBuf::from(raw)))
    })
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
