use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use halin_advisor::{
    redact, Advice, AdviceSummary, Advisor, ConfigurationDiff, DiagnosticSnapshot, NOT_SET,
};
use serde_json::Value;

use crate::config::HalinConfig;

#[derive(Parser)]
#[command(name = "halin")]
#[command(about = "Neo4j cluster diagnostics and advice", long_about = None)]
pub struct Cli {
    /// TOML or JSON configuration file.
    #[arg(short, long, global = true, env = "HALIN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the advisor over an exported diagnostic snapshot.
    Advise {
        snapshot: PathBuf,
        /// Print findings as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show configuration keys that differ between members.
    Diff {
        snapshot: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print a snapshot with every password masked.
    Redact { snapshot: PathBuf },
    /// Print the effective configuration.
    Config,
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let cut: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{}~", cut)
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        match self.command {
            Command::Advise { ref snapshot, json } => advise(&config, snapshot, json),
            Command::Diff { ref snapshot, json } => diff(snapshot, json),
            Command::Redact { ref snapshot } => redact_file(snapshot),
            Command::Config => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }

    fn load_config(&self) -> Result<HalinConfig> {
        match self.config {
            Some(ref path) => HalinConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(HalinConfig::default()),
        }
    }
}

fn advise(config: &HalinConfig, path: &Path, json: bool) -> Result<()> {
    let value = read_json(path)?;
    let advisor = Advisor::new(config.advisor.clone());
    let findings = advisor.recommendations_from_json(&value)?;
    let summary = AdviceSummary::from(findings.as_slice());

    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        print_findings(&findings);
        println!();
        println!(
            "{} findings: {} pass, {} info, {} warn, {} error",
            summary.total(),
            summary.pass,
            summary.info,
            summary.warn,
            summary.error
        );
    }

    if summary.has_errors() {
        anyhow::bail!("{} error-level finding(s)", summary.error);
    }
    Ok(())
}

fn print_findings(findings: &[Advice]) {
    println!("{:<6} {:<14} {:<24} FINDING", "LEVEL", "CATEGORY", "MEMBER");
    println!("{}", "-".repeat(100));
    for advice in findings {
        let category = advice.category.map(|c| c.to_string()).unwrap_or_default();
        println!(
            "{:<6} {:<14} {:<24} {}",
            advice.level.to_string(),
            category,
            truncate(&advice.addr, 24),
            advice.finding
        );
        if advice.is_problem() {
            if let Some(ref text) = advice.advice {
                println!("{:<46} -> {}", "", text);
            }
        }
    }
}

fn diff(path: &Path, json: bool) -> Result<()> {
    let value = read_json(path)?;
    let snapshot: DiagnosticSnapshot =
        serde_json::from_value(value).context("not a diagnostic snapshot")?;
    let diff = ConfigurationDiff::from_snapshot(&snapshot);

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    let labels: Vec<&String> = diff.values.keys().collect();
    let disagreements: Vec<_> = diff.disagreements().collect();
    if disagreements.is_empty() {
        println!(
            "All {} shared keys agree across {} members",
            diff.intersect_all.len(),
            labels.len()
        );
    } else {
        print!("{:<48}", "KEY");
        for label in &labels {
            print!(" {:<24}", truncate(label, 24));
        }
        println!();
        for row in disagreements {
            print!("{:<48}", truncate(&row.key, 48));
            for label in &labels {
                let value = row.values.get(*label).map(String::as_str).unwrap_or(NOT_SET);
                print!(" {:<24}", truncate(value, 24));
            }
            println!();
        }
    }

    for (label, keys) in &diff.unique {
        if !keys.is_empty() {
            println!();
            println!("Only on {}:", label);
            for key in keys {
                println!("  {}", key);
            }
        }
    }
    Ok(())
}

fn redact_file(path: &Path) -> Result<()> {
    let mut value = read_json(path)?;
    redact(&mut value);
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn snapshot_file(value: Value) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, "{}", value).unwrap();
        file
    }

    fn healthy_snapshot() -> Value {
        serde_json::json!({
            "id": "s1",
            "generated": "2019-06-01T12:00:00Z",
            "halin": { "version": "0.1.0" },
            "nodes": [{
                "basics": {
                    "address": "bolt://localhost:7687",
                    "database": "neo4j",
                    "dbms": { "edition": "community", "versions": ["3.5.3"] }
                },
                "configuration": { "dbms.security.auth_enabled": "true" }
            }]
        })
    }

    #[test]
    fn test_cli_parses_advise() {
        let cli = Cli::parse_from(["halin", "advise", "snap.json", "--json"]);
        match cli.command {
            Command::Advise { snapshot, json } => {
                assert_eq!(snapshot, PathBuf::from("snap.json"));
                assert!(json);
            }
            _ => panic!("expected advise"),
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd~");
    }

    #[test]
    fn test_advise_rejects_missing_halin_block() {
        let file = snapshot_file(serde_json::json!({ "nodes": [] }));
        let err = advise(&HalinConfig::default(), file.path(), true).unwrap_err();
        assert!(err.to_string().contains("halin"));
    }

    #[test]
    fn test_diff_and_redact_run_on_snapshot() {
        let file = snapshot_file(healthy_snapshot());
        assert!(diff(file.path(), false).is_ok());
        assert!(redact_file(file.path()).is_ok());
    }

    #[test]
    fn test_advise_fails_on_error_findings() {
        let mut snapshot = healthy_snapshot();
        snapshot["nodes"][0]["configuration"]["bolt.tls_level"] =
            serde_json::json!("DISABLED");
        let file = snapshot_file(snapshot);
        assert!(advise(&HalinConfig::default(), file.path(), false).is_err());
    }
}
