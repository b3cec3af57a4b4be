use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

use crate::{
    dashboard::{DashboardTimings, ToolbarPosition, WidgetConfig},
    history::DEFAULT_POLL_INTERVAL,
    reset::DEFAULT_SETTLE_DELAY,
    submission::SUCCESS_NOTICE_DURATION,
};

pub const DEFAULT_CONFIG_FILE: &str = "restock.toml";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_DASHBOARD_URL: &str = "https://us-east-1.online.tableau.com/t/wenxinzhang2025-e6af3a9f9e/views/GoogleBigQueryLiveInventoryDashboard/InventoryRestockingDashboard";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub dashboard: WidgetConfig,
    pub dashboard_timings: DashboardTimings,
    pub history_poll_interval: Duration,
    pub request_timeout: Duration,
    pub success_notice_duration: Duration,
    pub reset_settle_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            dashboard: WidgetConfig::new(DEFAULT_DASHBOARD_URL),
            dashboard_timings: DashboardTimings::default(),
            history_poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            success_notice_duration: SUCCESS_NOTICE_DURATION,
            reset_settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    server_url: Option<String>,
    request_timeout_secs: Option<u64>,
    history_poll_secs: Option<u64>,
    success_notice_secs: Option<u64>,
    reset_settle_secs: Option<u64>,
    dashboard: FileDashboard,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDashboard {
    url: Option<String>,
    width: Option<String>,
    height: Option<u32>,
    toolbar: Option<ToolbarPosition>,
    reassign_delay_ms: Option<u64>,
    min_busy_ms: Option<u64>,
}

/// Defaults, then the TOML file, then the environment.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub fn load_settings_with<F>(path: Option<&Path>, env: F) -> anyhow::Result<ClientSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = ClientSettings::default();

    let file = match path {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
    };
    if let Some(file) = file {
        let raw = fs::read_to_string(&file)
            .with_context(|| format!("failed to read config file '{}'", file.display()))?;
        let parsed: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file '{}'", file.display()))?;
        apply_file(&mut settings, parsed);
    }

    apply_env(&mut settings, &env)?;
    validate(&settings)?;
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, file: FileSettings) {
    if let Some(v) = file.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file.request_timeout_secs {
        settings.request_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file.history_poll_secs {
        settings.history_poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.success_notice_secs {
        settings.success_notice_duration = Duration::from_secs(v);
    }
    if let Some(v) = file.reset_settle_secs {
        settings.reset_settle_delay = Duration::from_secs(v);
    }

    let dashboard = file.dashboard;
    if let Some(v) = dashboard.url {
        settings.dashboard.src = v;
    }
    if let Some(v) = dashboard.width {
        settings.dashboard.width = v;
    }
    if let Some(v) = dashboard.height {
        settings.dashboard.height = v;
    }
    if let Some(v) = dashboard.toolbar {
        settings.dashboard.toolbar = v;
    }
    if let Some(v) = dashboard.reassign_delay_ms {
        settings.dashboard_timings.reassign_delay = Duration::from_millis(v);
    }
    if let Some(v) = dashboard.min_busy_ms {
        settings.dashboard_timings.min_busy = Duration::from_millis(v);
    }
}

/// `APP__*` wins over `RESTOCK_*` when both are set.
fn lookup<F>(env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    env(&format!("APP__{name}")).or_else(|| env(&format!("RESTOCK_{name}")))
}

fn lookup_secs<F>(env: &F, name: &str) -> anyhow::Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(env, name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("{name} must be a whole number of seconds, got '{raw}'"))
        })
        .transpose()
}

fn apply_env<F>(settings: &mut ClientSettings, env: &F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup(env, "SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup(env, "DASHBOARD_URL") {
        settings.dashboard.src = v;
    }
    if let Some(v) = lookup_secs(env, "HISTORY_POLL_SECS")? {
        settings.history_poll_interval = v;
    }
    if let Some(v) = lookup_secs(env, "REQUEST_TIMEOUT_SECS")? {
        settings.request_timeout = v;
    }
    Ok(())
}

fn validate(settings: &ClientSettings) -> anyhow::Result<()> {
    for (name, raw) in [
        ("server_url", settings.server_url.as_str()),
        ("dashboard url", settings.dashboard.src.as_str()),
    ] {
        let url = Url::parse(raw).with_context(|| format!("{name} '{raw}' is not a valid url"))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("{name} '{raw}' must use http or https");
        }
    }

    for (name, value) in [
        ("history poll interval", settings.history_poll_interval),
        ("request timeout", settings.request_timeout),
    ] {
        if value.is_zero() {
            bail!("{name} must be greater than zero");
        }
    }

    if settings.dashboard.height == 0 {
        bail!("dashboard height must be greater than zero");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
