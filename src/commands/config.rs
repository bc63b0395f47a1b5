use crate::config::Config;

use anyhow::Result;
use colored::Colorize;

/// Runs the `config` command.
///
/// Prints the settings `cp` would use after the config file and the
/// environment have been merged. The token itself is never shown.
pub fn run(config: &Config) -> Result<()> {
    for (key, value) in describe(config) {
        println!("{} {}", format!("{key}:").bold(), value);
    }
    Ok(())
}

fn describe(config: &Config) -> Vec<(&'static str, String)> {
    let unset = || "<not set>".to_string();

    let file = config
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string());

    let endpoint = |url: Result<url::Url>| match url {
        Ok(url) => url.to_string(),
        Err(_) => unset(),
    };

    let ignore_files = if config.transfer.ignore_files.is_empty() {
        "<none>".to_string()
    } else {
        config.transfer.ignore_files.join(" ")
    };

    vec![
        ("Config file", file),
        ("API URL", config.api.url.clone().unwrap_or_else(unset)),
        ("Token", mask_token(config.api.token.as_deref())),
        ("Cluster", config.api.cluster.clone()),
        ("User", config.user().unwrap_or_else(unset)),
        ("Storage URL", endpoint(config.storage_url())),
        ("Blob URL", endpoint(config.blob_url())),
        ("Concurrency", config.transfer.concurrency.to_string()),
        ("Ignore files", ignore_files),
        (
            "Timeout",
            config
                .transfer
                .timeout_secs
                .map(|secs| format!("{secs}s"))
                .unwrap_or_else(|| "none".to_string()),
        ),
    ]
}

fn mask_token(token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => "********".to_string(),
        _ => "<not set>".to_string(),
    }
}
