// download.rs - Model file download with integrity checks.
//
// Downloads model files on first use and caches them under ~/.mailvec/models/.
// The weights are pinned by SHA256 and must parse as safetensors; the JSON files
// must at least parse as JSON (the engine validates their contents on load).

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};

use crate::config;
use crate::error::ModelUnavailable;
use crate::logging::home_dir;

const MODEL_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";
const CONFIG_FILE: &str = "config.json";

enum Check {
    Safetensors { sha256: &'static str },
    Json,
}

/// Returns the local model directory path (~/.mailvec/models/all-MiniLM-L6-v2/).
pub fn model_dir() -> anyhow::Result<PathBuf> {
    let home = home_dir().context("cannot determine home directory (neither HOME nor USERPROFILE is set)")?;
    Ok(home.join(config::embedding::MODEL_DIR_REL))
}

/// Check if all required model files exist in `dir`.
pub fn model_files_exist(dir: &Path) -> bool {
    [MODEL_FILE, TOKENIZER_FILE, CONFIG_FILE]
        .iter()
        .all(|f| dir.join(f).exists())
}

/// Download all model files into the default directory if not already cached.
pub fn ensure_model_files(base_url: &str) -> Result<PathBuf, ModelUnavailable> {
    let dir = model_dir().map_err(ModelUnavailable)?;
    ensure_model_files_in(&dir, base_url).map_err(ModelUnavailable)?;
    Ok(dir)
}

pub fn ensure_model_files_in(dir: &Path, base_url: &str) -> anyhow::Result<()> {
    if model_files_exist(dir) {
        log::info!("Model files already cached at {}", dir.display());
        return Ok(());
    }

    log::info!("Downloading embedding model to {}", dir.display());
    fs::create_dir_all(dir).with_context(|| format!("failed to create model dir {}", dir.display()))?;

    let base = base_url.trim_end_matches('/');
    let files = [
        (
            MODEL_FILE,
            Check::Safetensors {
                sha256: config::embedding::MODEL_SAFETENSORS_SHA256,
            },
        ),
        (TOKENIZER_FILE, Check::Json),
        (CONFIG_FILE, Check::Json),
    ];

    for (name, check) in files {
        let dest = dir.join(name);
        if dest.exists() {
            continue;
        }
        let body = download(&format!("{base}/{name}"))?;
        verify(name, &body, &check)?;
        write_atomic(&dest, &body)?;
    }

    log::info!("Model download complete");
    Ok(())
}

fn download(url: &str) -> anyhow::Result<Vec<u8>> {
    log::info!("Downloading {}", url);

    let resp = ureq::get(url)
        .timeout(std::time::Duration::from_secs(config::http::DOWNLOAD_TIMEOUT_SECS))
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    let status = resp.status();
    if status != 200 {
        bail!("HTTP {status} downloading {url}");
    }

    // Model is ~87 MB, fits in RAM
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .with_context(|| format!("failed to read response body for {url}"))?;
    Ok(body)
}

fn verify(name: &str, body: &[u8], check: &Check) -> anyhow::Result<()> {
    match check {
        Check::Safetensors { sha256 } => {
            verify_sha256(name, body, sha256)?;
            safetensors::SafeTensors::deserialize(body)
                .map_err(|e| anyhow::anyhow!("{name} is not a valid safetensors file: {e}"))?;
        }
        Check::Json => {
            serde_json::from_slice::<serde_json::Value>(body)
                .with_context(|| format!("{name} is not valid JSON"))?;
        }
    }
    Ok(())
}

fn verify_sha256(name: &str, body: &[u8], expected_sha256: &str) -> anyhow::Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let actual_hash = hex::encode(hasher.finalize());

    if actual_hash != expected_sha256 {
        bail!(
            "SHA256 mismatch for {}: expected {}, got {}",
            name,
            expected_sha256,
            actual_hash
        );
    }

    log::info!("SHA256 verified for {} ({})", name, &actual_hash[..12]);
    Ok(())
}

/// Write to `<dest>.tmp`, then rename over `dest`.
fn write_atomic(dest: &Path, body: &[u8]) -> anyhow::Result<()> {
    let tmp_path = dest.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    file.write_all(body)?;
    file.flush()?;
    drop(file);

    fs::rename(&tmp_path, dest)
        .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), dest.display()))?;
    Ok(())
}
