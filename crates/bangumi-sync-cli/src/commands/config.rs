use super::prompts;
use crate::output::Output;
use bangumi_sync_config::{Config, CredentialStore, PathManager};
use color_eyre::Result;
use comfy_table::{Cell, Table};
use owo_colors::OwoColorize;
use serde_json::json;

pub async fn run_config(cmd: crate::ConfigCommands, output: &Output) -> Result<()> {
    match cmd {
        crate::ConfigCommands::Init { username, force } => init_config(username, force, output).await,
        crate::ConfigCommands::Show { full } => show_config(full, output).await,
        crate::ConfigCommands::Token { token } => store_token(token, output).await,
    }
}

/// Load and validate the config file, pointing at `config init` when it is missing
pub fn load_config(path_manager: &PathManager) -> Result<Config> {
    let config_file = path_manager.config_file();
    if !config_file.exists() {
        return Err(color_eyre::eyre::eyre!(
            "Configuration file not found at {}. Run 'bangumi-sync config init' first.",
            config_file.display()
        ));
    }
    let config = Config::load_from_file(&config_file)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to load config from {}: {}", config_file.display(), e))?;
    Ok(config)
}

/// Access token from `BANGUMI_ACCESS_TOKEN` or the credentials file
pub fn load_access_token(path_manager: &PathManager) -> Result<Option<String>> {
    let credentials_file = path_manager.credentials_file();
    let mut cred_store = CredentialStore::new(credentials_file.clone());
    cred_store
        .load()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to load credentials from {}: {}", credentials_file.display(), e))?;
    Ok(cred_store.resolve_access_token())
}

async fn init_config(username: Option<String>, force: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    let config_file = path_manager.config_file();

    if config_file.exists() && !force {
        if !prompts::prompt_yes_no(
            &format!("Configuration already exists at {}. Overwrite?", config_file.display()),
            false,
        )? {
            output.info("Keeping the existing configuration");
            return Ok(());
        }
    }

    let username = match username {
        Some(username) => username,
        None => prompts::prompt_string("Bangumi username or user id", None)?,
    };

    let config = Config::new(username);
    config
        .validate()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;
    path_manager
        .ensure_directories()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to create directories: {}", e))?;
    config
        .save_to_file(&config_file)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to save config to {}: {}", config_file.display(), e))?;
    output.success(format!("Configuration saved to {}", config_file.display()));

    if output.is_human() && load_access_token(&path_manager)?.is_none() {
        if prompts::prompt_yes_no("Store an access token now? Without one only public entries are synced", false)? {
            store_token(None, output).await?;
        }
    }
    Ok(())
}

async fn store_token(token: Option<String>, output: &Output) -> Result<()> {
    let token = match token {
        Some(token) => token.trim().to_string(),
        None => prompts::prompt_secret("Bangumi access token")?,
    };
    if token.is_empty() {
        return Err(color_eyre::eyre::eyre!("Access token cannot be empty"));
    }

    let path_manager = PathManager::default();
    let credentials_file = path_manager.credentials_file();
    let mut cred_store = CredentialStore::new(credentials_file.clone());
    cred_store
        .load()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to load credentials from {}: {}", credentials_file.display(), e))?;
    cred_store.set_bangumi_access_token(token);
    cred_store
        .save()
        .map_err(|e| color_eyre::eyre::eyre!("Failed to save credentials to {}: {}", credentials_file.display(), e))?;

    output.success(format!("Access token stored in {}", credentials_file.display()));
    Ok(())
}

async fn show_config(full: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    let config_file = path_manager.config_file();

    if !config_file.exists() {
        output.warn(format!("Configuration file not found at: {}", config_file.display()));
        output.info("Run 'bangumi-sync config init' to create one.");
        return Ok(());
    }

    let config = load_config(&path_manager)?;
    let token = load_access_token(&path_manager)?;
    let token_display = match &token {
        Some(token) if full => token.clone(),
        Some(token) => mask_token(token),
        None => "<not set>".to_string(),
    };
    let scopes = config.scopes().map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
    let scheduler = config
        .scheduler
        .clone()
        .unwrap_or_else(bangumi_sync_config::config::default_scheduler_config);

    if !output.is_human() {
        output.json(&json!({
            "config_file": config_file,
            "bangumi": {
                "username": config.bangumi.username,
                "base_url": config.bangumi.base_url,
                "page_size": config.bangumi.page_size,
                "request_timeout_seconds": config.bangumi.request_timeout_seconds,
                "access_token": token_display,
            },
            "sync": config.sync,
            "retry": config.retry,
            "scheduler": scheduler,
            "pairs": scopes.iter().map(|s| s.key()).collect::<Vec<_>>(),
        }));
        return Ok(());
    }
    if output.is_quiet() {
        return Ok(());
    }

    println!("\n{}", "Configuration".bright_cyan().bold());
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec![
        Cell::new("Setting").add_attribute(comfy_table::Attribute::Bold),
        Cell::new("Value").add_attribute(comfy_table::Attribute::Bold),
    ]);
    let pair_labels: Vec<String> = scopes
        .iter()
        .map(|s| format!("{}/{}", s.subject_type.native_label(), s.collection_type.native_label()))
        .collect();
    let rows: Vec<(&str, String)> = vec![
        ("Config file", config_file.display().to_string()),
        ("User", config.bangumi.username.clone()),
        ("API", config.bangumi.base_url.clone()),
        ("Access token", token_display),
        ("Page size", config.bangumi.page_size.to_string()),
        ("Workers", config.sync.workers.to_string()),
        ("Pairs", pair_labels.join(", ")),
        ("Analytics outbox", if config.sync.analytics_outbox { "on" } else { "off" }.to_string()),
        (
            "Retries (rate limit / transient / storage)",
            format!(
                "{} / {} / {}",
                config.retry.rate_limit_retries, config.retry.transient_retries, config.retry.storage_retries
            ),
        ),
        (
            "Backoff",
            format!("{}ms doubling, capped at {}ms", config.retry.base_delay_ms, config.retry.max_delay_ms),
        ),
        ("Schedule", scheduler.schedule.clone()),
        ("Sync on startup", scheduler.run_on_startup.to_string()),
    ];
    for (setting, value) in rows {
        table.add_row(vec![Cell::new(setting), Cell::new(value)]);
    }
    println!("{}", table);
    Ok(())
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.is_empty() {
        return "<not set>".to_string();
    }
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}***{}", head, tail)
}
