// ABOUTME: CLI entry point for tenant-porter
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Parser, Subcommand};
use postgres_tenant_porter::commands::{self, ExportArgs, ImportArgs, ValidateArgs};
use postgres_tenant_porter::config::PorterConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tenant-porter")]
#[command(about = "Export and import a single tenant's data between PostgreSQL databases", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./tenant-porter.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export one tenant's rows to a replayable SQL artifact
    Export {
        /// Tenant id or exact tenant name
        #[arg(long)]
        tenant: String,
        /// Artifact path (defaults to <output_dir>/tenant_<id>_<timestamp>.sql)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Compress the finished artifact with gzip
        #[arg(long)]
        compress: bool,
        /// Export only these tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        include_tables: Option<Vec<String>>,
        /// Skip these tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude_tables: Option<Vec<String>>,
        /// Also export optional enterprise tables
        #[arg(long)]
        include_enterprise: bool,
        /// Rewrite the tenant column to this id in every exported row
        #[arg(long)]
        remap_tenant_id: Option<i64>,
        /// Print the tables that would be exported and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Replay an artifact into the configured database
    Import {
        /// Artifact to replay (.sql or .sql.gz)
        #[arg(short, long)]
        input: PathBuf,
        /// Take a pg_dump safety backup first
        #[arg(long, overrides_with = "no_backup")]
        backup: bool,
        /// Skip the safety backup
        #[arg(long, overrides_with = "backup")]
        no_backup: bool,
        /// Validate the artifact without connecting
        #[arg(long)]
        dry_run: bool,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List every tenant with its id and name
    ListTenants {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Count a tenant's rows and check for cross-tenant references
    Validate {
        /// Tenant id or exact tenant name
        #[arg(long)]
        tenant: String,
        /// Include optional enterprise tables
        #[arg(long)]
        include_enterprise: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = PorterConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Export {
            tenant,
            output,
            compress,
            include_tables,
            exclude_tables,
            include_enterprise,
            remap_tenant_id,
            dry_run,
        } => {
            let args = ExportArgs {
                tenant: tenant.parse()?,
                output,
                compress,
                include_tables,
                exclude_tables,
                include_enterprise,
                remap_tenant_id,
                dry_run,
                verbose: cli.verbose,
            };
            commands::export(&config, args).await.map(|_| ())
        }
        Commands::Import {
            input,
            backup,
            no_backup,
            dry_run,
            yes,
        } => {
            let backup = match (backup, no_backup) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let args = ImportArgs {
                input,
                backup,
                dry_run,
                yes,
            };
            commands::import(&config, args).await
        }
        Commands::ListTenants { json } => commands::list_tenants(&config, json).await,
        Commands::Validate {
            tenant,
            include_enterprise,
            json,
        } => {
            let args = ValidateArgs {
                tenant: tenant.parse()?,
                include_enterprise,
                json,
            };
            commands::validate(&config, args).await
        }
    }
}
