use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{Config, SharedConfig};
use crate::config_check;

/// Spawn a background task that polls `config_path` for changes and
/// hot-swaps the `SharedConfig` when the file is modified.
///
/// Bots (templates, triggers, follow-ups, tool lists) and run-loop tuning
/// reload live. Connection settings (`server`, `store`, `gateway`,
/// `assistant.base_url`, `assistant.api_key_env`) are guarded: the reload
/// is rejected if any of those change.
pub(crate) fn spawn_config_watcher(
    config_path: PathBuf,
    config: SharedConfig,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let span = info_span!("config_watcher", path = %config_path.display());
    tokio::spawn(
        async move {
            config_poll_loop(&config_path, &config, shutdown).await;
        }
        .instrument(span),
    )
}

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEBOUNCE: Duration = Duration::from_millis(200);

async fn config_poll_loop(config_path: &Path, config: &SharedConfig, shutdown: CancellationToken) {
    let mut last_modified = file_modified(config_path);
    info!("config watcher started");

    loop {
        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            () = shutdown.cancelled() => {
                debug!("config watcher stopped");
                return;
            }
        }

        let current_modified = file_modified(config_path);
        if current_modified == last_modified {
            continue;
        }
        last_modified = current_modified;

        // Editors often write-rename-delete in quick succession.
        tokio::time::sleep(DEBOUNCE).await;
        try_reload(config_path, config);
    }
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn try_reload(config_path: &Path, config: &SharedConfig) {
    let new_config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "config reload failed: parse error");
            return;
        }
    };

    let report = config_check::validate_parsed(&new_config);
    if report.has_errors() {
        warn!(errors = ?report.error_messages(), "config reload rejected: validation errors");
        return;
    }

    let current = config.load();
    if let Some(reasons) = check_restart_only_fields(&current, &new_config) {
        warn!(
            fields = ?reasons,
            "config reload rejected: these fields require a restart"
        );
        return;
    }

    if *current.as_ref() == new_config {
        debug!("config file changed but content is identical, skipping reload");
        return;
    }

    let changed = diff_sections(&current, &new_config);
    config.store(Arc::new(new_config));
    info!(changed = ?changed, "config reloaded");
}

/// Returns `Some(reasons)` if any restart-only fields differ.
fn check_restart_only_fields(current: &Config, new: &Config) -> Option<Vec<&'static str>> {
    let mut reasons = Vec::new();

    if new.server != current.server {
        reasons.push("server");
    }
    if new.store != current.store {
        reasons.push("store");
    }
    if new.gateway != current.gateway {
        reasons.push("gateway");
    }
    if new.assistant.base_url != current.assistant.base_url {
        reasons.push("assistant.base_url");
    }
    if new.assistant.api_key_env != current.assistant.api_key_env {
        reasons.push("assistant.api_key_env");
    }

    if reasons.is_empty() {
        None
    } else {
        Some(reasons)
    }
}

/// Summarize which sections changed.
fn diff_sections(current: &Config, new: &Config) -> Vec<String> {
    let mut changed = Vec::new();
    if new.assistant != current.assistant {
        changed.push("assistant".to_owned());
    }
    for bot in &new.bots {
        match current.bot(&bot.id) {
            Some(old) if old == bot => {}
            Some(_) => changed.push(format!("bots.{}", bot.id)),
            None => changed.push(format!("bots.{} (added)", bot.id)),
        }
    }
    for bot in &current.bots {
        if new.bot(&bot.id).is_none() {
            changed.push(format!("bots.{} (removed)", bot.id));
        }
    }
    changed
}
