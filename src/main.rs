//! Command-line interface for dbfxsql
//!
//! # Usage Examples
//!
//! ```bash
//! # Create a DBF file and a matching SQLite table
//! dbfxsql create --source users.dbf -f id "N(10,0)" -f name "C(30)"
//! dbfxsql create --source company.db --table users \
//!   -f id "INTEGER PRIMARY KEY" -f name "TEXT"
//!
//! # Row operations (engine auto-detected from the extension)
//! dbfxsql insert --source users.dbf -f id 1 -f name Ada
//! dbfxsql read --source company.db --table users --condition "id == 1"
//! dbfxsql update --source users.dbf --condition "row_number = 1" -f name Grace
//! dbfxsql delete --source company.db --table users --condition "id > 10"
//!
//! # One reconciliation pass over all prioritized relations
//! dbfxsql migrate --notify
//!
//! # Continuous synchronization (migrate once, then watch)
//! dbfxsql sync
//! ```

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use dbfxsql::backend::{open_source, reject_reserved};
use dbfxsql::{sync, watch, Backend as _, Config};
use dbfxsql_core::{normalize_row, Condition, EngineKind, Row, SyncError};
use std::collections::HashMap;

#[derive(Parser)]
#[command(name = "dbfxsql")]
#[command(about = "A tool for synchronizing dBase (DBF) files with SQLite databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a DBF file or a SQLite table
    Create {
        /// Source file (engine auto-detected from its extension)
        #[arg(short, long)]
        source: String,

        /// Table name (required for SQLite sources)
        #[arg(short, long, default_value = "")]
        table: String,

        /// Field name and native type declaration, repeatable
        #[arg(short = 'f', long = "field", value_names = ["NAME", "TYPE"], num_args = 2, action = ArgAction::Append, required = true)]
        fields: Vec<String>,
    },

    /// Insert a row
    Insert {
        #[arg(short, long)]
        source: String,

        #[arg(short, long, default_value = "")]
        table: String,

        /// Field name and value, repeatable
        #[arg(short = 'f', long = "field", value_names = ["NAME", "VALUE"], num_args = 2, action = ArgAction::Append, required = true)]
        fields: Vec<String>,
    },

    /// Read rows, optionally filtered
    Read {
        #[arg(short, long)]
        source: String,

        #[arg(short, long, default_value = "")]
        table: String,

        /// Filter such as "id == 3" or "row_number >= 2"
        #[arg(short, long)]
        condition: Option<String>,
    },

    /// Update the rows a condition selects
    Update {
        #[arg(short, long)]
        source: String,

        #[arg(short, long, default_value = "")]
        table: String,

        #[arg(short, long)]
        condition: String,

        #[arg(short = 'f', long = "field", value_names = ["NAME", "VALUE"], num_args = 2, action = ArgAction::Append, required = true)]
        fields: Vec<String>,
    },

    /// Delete the rows a condition selects
    Delete {
        #[arg(short, long)]
        source: String,

        #[arg(short, long, default_value = "")]
        table: String,

        #[arg(short, long)]
        condition: String,
    },

    /// Drop a table, or a whole source when no table is given
    Drop {
        #[arg(short, long)]
        source: String,

        #[arg(short, long, default_value = "")]
        table: String,
    },

    /// Run one reconciliation pass over all prioritized relations
    Migrate {
        /// Log one line per applied operation
        #[arg(long)]
        notify: bool,
    },

    /// Migrate once, then watch the configured folders and re-migrate on
    /// every change
    Sync {
        /// Log one line per applied operation
        #[arg(long)]
        notify: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Create {
            source,
            table,
            fields,
        } => run_create(&config, &source, &table, &fields).await,
        Commands::Insert {
            source,
            table,
            fields,
        } => run_insert(&config, &source, &table, &fields).await,
        Commands::Read {
            source,
            table,
            condition,
        } => run_read(&config, &source, &table, condition.as_deref()).await,
        Commands::Update {
            source,
            table,
            condition,
            fields,
        } => run_update(&config, &source, &table, &condition, &fields).await,
        Commands::Delete {
            source,
            table,
            condition,
        } => run_delete(&config, &source, &table, &condition).await,
        Commands::Drop { source, table } => {
            let backend = open_source(&config, &source, &table)?;
            backend.drop_table().await?;
            tracing::info!("dropped {source}");
            Ok(())
        }
        Commands::Migrate { notify } => {
            let filenames = sync::initial_filenames(&config);
            if filenames.is_empty() {
                tracing::info!("no prioritized sources present, nothing to migrate");
                return Ok(());
            }
            sync::migrate(&config, &filenames, notify, false).await
        }
        Commands::Sync { notify } => {
            let filenames = sync::initial_filenames(&config);
            if !filenames.is_empty() {
                sync::migrate(&config, &filenames, notify, true).await?;
            }
            watch::run(&config, notify).await
        }
    }
}

async fn run_create(
    config: &Config,
    source: &str,
    table: &str,
    fields: &[String],
) -> anyhow::Result<()> {
    let fields = pair_up(fields);
    reject_reserved(&fields)?;
    require_table_argument(config, source, table)?;

    let backend = open_source(config, source, table)?;
    backend.create_table(&fields).await?;

    tracing::info!("created {source}");
    Ok(())
}

async fn run_insert(
    config: &Config,
    source: &str,
    table: &str,
    fields: &[String],
) -> anyhow::Result<()> {
    let fields = pair_up(fields);
    reject_reserved(&fields)?;
    require_table_argument(config, source, table)?;

    let backend = open_source(config, source, table)?;
    let row = normalized(backend.kind(), &backend.read_types().await?, &fields)?;

    backend.insert(row).await?;
    Ok(())
}

async fn run_read(
    config: &Config,
    source: &str,
    table: &str,
    condition: Option<&str>,
) -> anyhow::Result<()> {
    let condition = condition.map(Condition::parse).transpose()?;
    require_table_argument(config, source, table)?;
    let backend = open_source(config, source, table)?;

    let rows = backend.read_where(condition.as_ref()).await?;

    if rows.is_empty() {
        if let Some(condition) = condition {
            return Err(SyncError::RowNotFound(condition.to_string()).into());
        }
    }

    print_rows(&backend.field_names().await?, &rows);
    Ok(())
}

async fn run_update(
    config: &Config,
    source: &str,
    table: &str,
    condition: &str,
    fields: &[String],
) -> anyhow::Result<()> {
    let fields = pair_up(fields);
    reject_reserved(&fields)?;
    require_table_argument(config, source, table)?;
    let condition = Condition::parse(condition)?;

    let backend = open_source(config, source, table)?;
    let row = normalized(backend.kind(), &backend.read_types().await?, &fields)?;

    backend.update(row, &condition).await?;
    Ok(())
}

async fn run_delete(
    config: &Config,
    source: &str,
    table: &str,
    condition: &str,
) -> anyhow::Result<()> {
    require_table_argument(config, source, table)?;
    let condition = Condition::parse(condition)?;
    let backend = open_source(config, source, table)?;

    backend.delete(&condition).await?;
    Ok(())
}

/// SQLite sources need a table name for everything except dropping the
/// whole database file.
fn require_table_argument(config: &Config, source: &str, table: &str) -> anyhow::Result<()> {
    if table.is_empty() {
        let (kind, _) = config
            .engine_for(source)
            .with_context(|| format!("no engine configured for '{source}'"))?;

        if kind == EngineKind::Sqlite {
            bail!("missing option '-t' / '--table' (required for SQLite sources)");
        }
    }

    Ok(())
}

fn pair_up(flat: &[String]) -> Vec<(String, String)> {
    flat.chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

fn normalized(
    kind: EngineKind,
    types: &HashMap<String, String>,
    fields: &[(String, String)],
) -> Result<Row, SyncError> {
    let raw: HashMap<String, String> = fields.iter().cloned().collect();
    normalize_row(kind, types, &raw)
}

fn print_rows(field_names: &[String], rows: &[Row]) {
    let mut table = comfy_table::Table::new();
    table.set_header(field_names);

    for row in rows {
        table.add_row(
            field_names
                .iter()
                .map(|name| row.get(name).map(|value| value.to_literal()).unwrap_or_default()),
        );
    }

    println!("{table}");
}
