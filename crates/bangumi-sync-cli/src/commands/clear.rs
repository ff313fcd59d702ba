use crate::output::Output;
use bangumi_sync_config::PathManager;
use bangumi_sync_core::JsonFileStore;
use color_eyre::Result;
use std::fs;

pub async fn run_clear(all: bool, store: bool, cursors: bool, credentials: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();

    if all {
        clear_store(&path_manager, output).await?;
        clear_credentials(&path_manager, output).await?;
        output.success("Stored collections, cursors and credentials cleared");
        return Ok(());
    }

    let mut cleared_anything = false;

    if store {
        clear_store(&path_manager, output).await?;
        cleared_anything = true;
    } else if cursors {
        // clearing the store already drops the cursors with it
        clear_cursors(&path_manager, output).await?;
        cleared_anything = true;
    }

    if credentials {
        clear_credentials(&path_manager, output).await?;
        cleared_anything = true;
    }

    if !cleared_anything {
        output.warn("No clear option specified. Use --store, --cursors, --credentials, or --all");
        output.println("\nExample: bangumi-sync clear --cursors");
    }

    Ok(())
}

fn open_store(path_manager: &PathManager) -> Result<Option<JsonFileStore>> {
    let store_dir = path_manager.store_dir();
    if !store_dir.exists() {
        return Ok(None);
    }
    JsonFileStore::new(&store_dir)
        .map(Some)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to open store at {}: {}", store_dir.display(), e))
}

async fn clear_store(path_manager: &PathManager, output: &Output) -> Result<()> {
    let Some(store) = open_store(path_manager)? else {
        output.info("No stored collections found to clear");
        return Ok(());
    };
    let removed = store
        .clear()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to clear store at {}: {}", store.dir().display(), e))?;
    output.success(format!("Removed {} stored document(s) from {}", removed, store.dir().display()));
    Ok(())
}

async fn clear_cursors(path_manager: &PathManager, output: &Output) -> Result<()> {
    let Some(store) = open_store(path_manager)? else {
        output.info("No sync cursors found to clear");
        return Ok(());
    };
    let reset = store
        .reset_cursors()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to reset cursors: {}", e))?;
    if reset == 0 {
        output.info("No sync cursors found to clear");
    } else {
        output.success(format!("Reset {} sync cursor(s); the next run starts from the first page", reset));
    }
    Ok(())
}

async fn clear_credentials(path_manager: &PathManager, output: &Output) -> Result<()> {
    let credentials_file = path_manager.credentials_file();

    if credentials_file.exists() {
        fs::remove_file(&credentials_file).map_err(|e| {
            color_eyre::eyre::eyre!("Failed to remove credentials file at {}: {}", credentials_file.display(), e)
        })?;
        output.success(format!("Cleared credentials: {}", credentials_file.display()));
    } else {
        output.info("No credentials file found to clear");
    }

    Ok(())
}
