//! Background update check, throttled to once per day.
//!
//! The throttle state lives in `<codemap-home>/.last_update_check` as
//! `{"timestamp": "<RFC3339>"}`; `CODEMAP_HOME` overrides the home
//! directory. The check itself queries the GitHub releases API and only ever
//! logs — it must never block or fail startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

/// How often to check for updates, in hours.
const UPDATE_CHECK_INTERVAL_HOURS: i64 = 24;

/// Hard ceiling on the whole background check.
const UPDATE_CHECK_CEILING: Duration = Duration::from_secs(5 * 60);

const GITHUB_API_URL: &str = "https://api.github.com/repos/ctxhub/codemap/releases?per_page=1";

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tracks when we last checked for updates.
#[derive(Debug, Serialize, Deserialize)]
struct LastUpdateCheck {
    timestamp: DateTime<Utc>,
}

/// GitHub release response (minimal fields we need)
#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
}

/// Per-user state directory: `$CODEMAP_HOME`, else `~/.codemap`.
fn codemap_home() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("CODEMAP_HOME") {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|home| home.join(".codemap"))
}

fn last_check_path() -> Option<PathBuf> {
    codemap_home().map(|home| home.join(".last_update_check"))
}

fn should_check_for_updates() -> bool {
    let Some(path) = last_check_path() else {
        return true;
    };
    let Ok(data) = std::fs::read_to_string(&path) else {
        return true; // Never checked
    };
    let Ok(last) = serde_json::from_str::<LastUpdateCheck>(&data) else {
        return true; // Corrupt file, check anyway
    };
    Utc::now() - last.timestamp > chrono::Duration::hours(UPDATE_CHECK_INTERVAL_HOURS)
}

fn record_update_check() -> Result<()> {
    let Some(path) = last_check_path() else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let state = LastUpdateCheck {
        timestamp: Utc::now(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&state)?)?;
    Ok(())
}

fn fetch_latest_version() -> Result<String> {
    let releases: Vec<GitHubRelease> = ureq::get(GITHUB_API_URL)
        .set("User-Agent", "codemap")
        .set("Accept", "application/vnd.github.v3+json")
        .timeout(Duration::from_secs(30))
        .call()?
        .into_json()?;

    let release = releases
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no releases found"))?;

    let version = release
        .tag_name
        .strip_prefix('v')
        .unwrap_or(&release.tag_name);
    Ok(version.to_string())
}

fn newer_release_available(latest: &str) -> bool {
    match (Version::parse(CURRENT_VERSION), Version::parse(latest)) {
        (Ok(current), Ok(latest)) => latest > current,
        _ => false,
    }
}

/// Kick off the throttled background check. Non-blocking, safe to call on
/// every startup.
pub fn check_for_updates_in_background() {
    if !should_check_for_updates() {
        return;
    }

    tokio::spawn(async {
        let fetch = tokio::task::spawn_blocking(fetch_latest_version);
        let latest = match tokio::time::timeout(UPDATE_CHECK_CEILING, fetch).await {
            Ok(Ok(Ok(latest))) => latest,
            Ok(Ok(Err(e))) => {
                tracing::debug!("[Auto-Update] Version check failed: {}", e);
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!("[Auto-Update] Version check task failed: {}", e);
                return;
            }
            Err(_) => {
                tracing::debug!("[Auto-Update] Version check timed out");
                return;
            }
        };

        if newer_release_available(&latest) {
            tracing::info!(
                "[Auto-Update] codemap v{} available (current: v{})",
                latest,
                CURRENT_VERSION
            );
        } else {
            tracing::debug!("[Auto-Update] Up to date");
        }

        if let Err(e) = record_update_check() {
            tracing::debug!("[Auto-Update] Failed to record update check: {}", e);
        }
    });
}
