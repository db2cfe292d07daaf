//! `apps` command: list the agent applications the backend serves

use std::sync::Arc;

use prettytable::{cell, row, Table};

use super::print_json;
use crate::api::client::AgentClient;
use crate::api::types::AppInfo;
use crate::cache::AppsCache;
use crate::config::Config;
use crate::error::{unshare, Result};

/// List agent applications
///
/// # Examples
///
/// ```no_run
/// use lgtm_client::commands::apps::list_apps;
/// use lgtm_client::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// list_apps(&Config::default(), false).await?;
/// # Ok(())
/// # }
/// ```
pub async fn list_apps(config: &Config, json: bool) -> Result<()> {
    let client = AgentClient::new(&config.api)?;
    let cache = AppsCache::new(Arc::new(client), config.cache.apps_stale_after());
    let apps = cache.list().await.map_err(unshare)?;
    tracing::info!("Backend serves {} apps", apps.len());

    if json {
        return print_json(apps.as_slice());
    }
    if apps.is_empty() {
        println!("No apps available");
        return Ok(());
    }

    println!("\nAvailable apps:\n");
    apps_table(&apps, &config.session.app_name).printstd();
    println!();
    Ok(())
}

fn apps_table(apps: &[AppInfo], configured: &str) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Name", "Description", "Configured"]);
    for app in apps {
        let marker = if app.name == configured { "*" } else { "" };
        table.add_row(row![
            app.name,
            app.description.as_deref().unwrap_or("-"),
            marker
        ]);
    }
    table
}
