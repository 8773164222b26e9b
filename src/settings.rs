// settings.rs - Runtime settings: environment first, command-line flags on top.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::config;

pub const USAGE: &str = "\
Usage: mailvec [OPTIONS]

Fetch Gmail messages, embed them, report near-duplicates, and store them in Notion.

Options:
  --query <Q>          Gmail search query (default: subject:(SQL))
  --threshold <F>      Cosine similarity threshold in [-1, 1] (default: 0.7)
  --skip-duplicates    Do not store messages that match an existing item
  --dry-run            Compare against Notion but write nothing
  --max-items <N>      Process at most N messages
  --version            Print version
  --help               Print this help

Environment:
  NOTION_API_KEY, NOTION_DATABASE_ID   Notion integration token and database
  GMAIL_ACCESS_TOKEN                   OAuth access token for Gmail
  GMAIL_TOKEN_FILE                     JSON file with a \"token\" field (default: token.json)
  MAILVEC_THRESHOLD, MAILVEC_SKIP_DUPLICATES, MAILVEC_MODEL_BASE_URL
";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(Settings),
    Version,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotionCredentials {
    pub api_key: String,
    pub database_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub query: String,
    pub threshold: f64,
    pub skip_on_duplicate: bool,
    pub dry_run: bool,
    pub max_items: Option<usize>,
    pub model_base_url: String,
    /// None only in dry-run mode without credentials (compares against an empty corpus).
    pub notion: Option<NotionCredentials>,
    pub gmail_token: String,
}

/// Parse `args` (without the program name) against an environment lookup.
pub fn parse<E>(args: &[String], env_var: E) -> anyhow::Result<Command>
where
    E: Fn(&str) -> Option<String>,
{
    // blank values count as unset
    let env = |key: &str| env_var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let mut query = config::gmail::DEFAULT_QUERY.to_string();
    let mut threshold = match env("MAILVEC_THRESHOLD") {
        Some(v) => parse_threshold(&v).context("invalid MAILVEC_THRESHOLD")?,
        None => config::similarity::DEFAULT_THRESHOLD,
    };
    let mut skip_on_duplicate = env("MAILVEC_SKIP_DUPLICATES")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);
    let mut dry_run = false;
    let mut max_items = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-V" => return Ok(Command::Version),
            "--help" | "-h" => return Ok(Command::Help),
            "--query" => query = flag_value(args, i)?.to_string(),
            "--threshold" => threshold = parse_threshold(flag_value(args, i)?)?,
            "--max-items" => {
                let v = flag_value(args, i)?;
                max_items = Some(v.parse::<usize>().with_context(|| format!("invalid --max-items {v:?}"))?);
            }
            "--skip-duplicates" => {
                skip_on_duplicate = true;
                i += 1;
                continue;
            }
            "--dry-run" => {
                dry_run = true;
                i += 1;
                continue;
            }
            other => bail!("unknown argument {other:?}\n\n{USAGE}"),
        }
        i += 2;
    }

    let notion = match (env("NOTION_API_KEY"), env("NOTION_DATABASE_ID")) {
        (Some(api_key), Some(database_id)) => Some(NotionCredentials { api_key, database_id }),
        _ if dry_run => None,
        (None, _) => bail!("NOTION_API_KEY is not set"),
        (_, None) => bail!("NOTION_DATABASE_ID is not set"),
    };

    let gmail_token = match env("GMAIL_ACCESS_TOKEN") {
        Some(t) => t,
        None => {
            let path = env("GMAIL_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(config::gmail::DEFAULT_TOKEN_FILE));
            read_token_file(&path)?
        }
    };

    let model_base_url = env("MAILVEC_MODEL_BASE_URL").unwrap_or_else(|| config::embedding::MODEL_BASE_URL.to_string());

    Ok(Command::Run(Settings {
        query,
        threshold,
        skip_on_duplicate,
        dry_run,
        max_items,
        model_base_url,
        notion,
        gmail_token,
    }))
}

fn flag_value<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("missing value for {}", args[i]))
}

fn parse_threshold(v: &str) -> anyhow::Result<f64> {
    let t: f64 = v.parse().with_context(|| format!("threshold {v:?} is not a number"))?;
    if !(-1.0..=1.0).contains(&t) {
        bail!("threshold {t} is outside [-1, 1]");
    }
    Ok(t)
}

/// Reads the access token from an authorized-user JSON file (`token` or `access_token`).
fn read_token_file(path: &Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path).with_context(|| {
        format!(
            "GMAIL_ACCESS_TOKEN is not set and token file {} could not be read",
            path.display()
        )
    })?;
    let v: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parse token file {}", path.display()))?;
    v.get("token")
        .or_else(|| v.get("access_token"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .with_context(|| format!("token file {} has no \"token\" field", path.display()))
}
