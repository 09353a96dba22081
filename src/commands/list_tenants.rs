// ABOUTME: List-tenants command: read-only report of every tenant
// ABOUTME: Prints a table for humans or JSON for scripts

use crate::config::PorterConfig;
use crate::postgres::{self, PgStore};
use crate::store::{TenantRecord, TenantStore};
use anyhow::{Context, Result};

fn render_table(tenants: &[TenantRecord]) -> String {
    let mut out = format!("{:>10}  {}\n", "ID", "NAME");
    for tenant in tenants {
        out.push_str(&format!("{:>10}  {}\n", tenant.id, tenant.name));
    }
    out.push_str(&format!("\n{} tenant(s)\n", tenants.len()));
    out
}

pub async fn list_tenants(config: &PorterConfig, json: bool) -> Result<()> {
    let client = postgres::connect(&config.database).await?;
    let store = PgStore::new(client);
    let tenants = store.list_tenants().await?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&tenants).context("Failed to serialize tenant list")?;
        println!("{}", rendered);
    } else {
        print!("{}", render_table(&tenants));
    }
    Ok(())
}
