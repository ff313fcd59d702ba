use crate::output::Output;
use bangumi_sync_config::PathManager;
use bangumi_sync_core::{export_csv, JsonFileStore};
use color_eyre::Result;
use serde_json::json;
use std::path::PathBuf;

pub async fn run_export(dir: Option<PathBuf>, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    let target = dir.unwrap_or_else(|| path_manager.export_dir());

    let store = JsonFileStore::new(path_manager.store_dir()).map_err(|e| {
        color_eyre::eyre::eyre!("Failed to open store at {}: {}", path_manager.store_dir().display(), e)
    })?;
    let report = export_csv(&store, &target)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Export to {} failed: {}", target.display(), e))?;

    if output.is_human() {
        output.success(format!(
            "Exported {} rows from {} categories to {}",
            report.rows,
            report.scopes,
            report.dir.display()
        ));
    } else {
        output.json(&json!({
            "dir": report.dir,
            "rows": report.rows,
            "scopes": report.scopes,
        }));
    }
    Ok(())
}
