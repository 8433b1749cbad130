pub mod analyze;
pub mod grid;
pub mod plan;
pub mod replay;

use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use serde::Serialize;
use valuerank_core::{EngineConfig, RunInput};
use valuerank_stats::Estimate;

/// Print an error and exit non-zero.
pub fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

/// Defaults, or a validated config file.
pub fn load_config(path: Option<&str>) -> EngineConfig {
    match path {
        Some(p) => EngineConfig::load_from_path(Path::new(p)).unwrap_or_else(|e| fail(e)),
        None => EngineConfig::default(),
    }
}

pub fn load_input(path: &str) -> RunInput {
    let input = RunInput::load_from_path(Path::new(path)).unwrap_or_else(|e| fail(e));
    if input.outcomes.is_empty() {
        eprintln!("Warning: {path} contains no outcomes");
    }
    debug!(
        "loaded run {} from {path}: {} outcomes, {} dimension payloads",
        input.run_id,
        input.outcomes.len(),
        input.scenario_dimensions.len()
    );
    input
}

/// Models named on the command line, or every model in the run.
pub fn select_models(filter: Option<&str>, input: &RunInput) -> Vec<String> {
    match filter {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => input.model_ids(),
    }
}

/// Parse repeated `MODEL=USD` pairs.
pub fn parse_costs(pairs: &[String]) -> Result<BTreeMap<String, f64>, String> {
    let mut costs = BTreeMap::new();
    for pair in pairs {
        let (model, price) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected MODEL=USD, got '{pair}'"))?;
        let price: f64 = price
            .trim()
            .parse()
            .map_err(|_| format!("invalid price in '{pair}'"))?;
        costs.insert(model.trim().to_string(), price);
    }
    Ok(costs)
}

pub fn write_json<T: Serialize>(path: &str, value: &T) {
    let json = match serde_json::to_string_pretty(value) {
        Ok(json) => json,
        Err(e) => fail(format!("failed to serialize output: {e}")),
    };
    match std::fs::write(path, json) {
        Ok(()) => println!("\nResults written to {path}"),
        Err(e) => eprintln!("\nFailed to write {path}: {e}"),
    }
}

pub fn fmt_estimate(e: Estimate) -> String {
    match e {
        Estimate::Value(v) => format!("{v:.4}"),
        Estimate::Insufficient { n } => format!("n/a (n={n})"),
    }
}

pub fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_costs() {
        let costs = parse_costs(&["gpt-4o=0.012".to_string(), " claude = 0.5 ".to_string()])
            .unwrap();
        assert_eq!(costs["gpt-4o"], 0.012);
        assert_eq!(costs["claude"], 0.5);
        assert!(parse_costs(&["nope".to_string()]).is_err());
        assert!(parse_costs(&["m=abc".to_string()]).is_err());
    }

    #[test]
    fn test_select_models() {
        let input = RunInput::default();
        assert_eq!(select_models(Some("a, b,,c"), &input), vec!["a", "b", "c"]);
        assert!(select_models(None, &input).is_empty());
    }

    #[test]
    fn test_fmt_estimate() {
        assert_eq!(fmt_estimate(Estimate::Value(0.12346)), "0.1235");
        assert_eq!(fmt_estimate(Estimate::Insufficient { n: 1 }), "n/a (n=1)");
    }
}
