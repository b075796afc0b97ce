use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use leadsync_core::LeadUpdate;
use leadsync_sheets::GoogleSheetsClient;
use leadsync_storage::{ApiClient, PgStore};
use leadsync_sync::{EngineConfig, LeadSync};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "leadsync")]
#[command(about = "Replicates CRM leads between spreadsheets and PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct Batch {
    #[arg(long)]
    batch: String,
}

#[derive(Debug, Args)]
struct Pass {
    #[arg(long)]
    batch: String,
    /// Restrict the pass to these tabs; every tab of the batch when omitted.
    #[arg(long = "sheet")]
    sheets: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Run the HTTP API.
    Serve,
    /// Bind a batch to its admin spreadsheet.
    RegisterBatch {
        #[arg(long)]
        batch: String,
        #[arg(long)]
        admin: String,
    },
    /// Bind an officer of a batch to their spreadsheet.
    RegisterOfficer {
        #[arg(long)]
        batch: String,
        #[arg(long)]
        officer: String,
        #[arg(long)]
        spreadsheet: String,
    },
    /// List the lead tabs of a batch.
    Tabs {
        #[command(flatten)]
        batch: Batch,
        #[arg(long)]
        force: bool,
    },
    AddTab {
        #[command(flatten)]
        batch: Batch,
        #[arg(long)]
        sheet: String,
    },
    RemoveTab {
        #[command(flatten)]
        batch: Batch,
        #[arg(long)]
        sheet: String,
    },
    /// Spreadsheet → store.
    Pull(Pass),
    /// Store assignees → spreadsheets.
    Push(Pass),
    /// Who already owns a phone in this batch.
    Assignee {
        #[command(flatten)]
        batch: Batch,
        #[arg(long)]
        phone: String,
    },
    /// Update one lead, e.g. `--set assigned_to=Alice --set status=Called`.
    Update {
        #[command(flatten)]
        batch: Batch,
        #[arg(long)]
        sheet: String,
        #[arg(long)]
        lead: String,
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
        /// Full update as a JSON object; `--set` entries are applied on top.
        #[arg(long)]
        json: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_update(json: Option<&str>, set: &[String]) -> Result<LeadUpdate> {
    let mut fields = match json {
        Some(raw) => match serde_json::from_str::<serde_json::Value>(raw).context("parsing --json")? {
            serde_json::Value::Object(map) => map,
            _ => bail!("--json must be an object"),
        },
        None => serde_json::Map::new(),
    };
    for entry in set {
        let Some((field, value)) = entry.split_once('=') else {
            bail!("expected FIELD=VALUE, got {entry:?}");
        };
        fields.insert(field.trim().to_string(), value.into());
    }
    serde_json::from_value(serde_json::Value::Object(fields)).context("building lead update")
}

fn engine(config: &EngineConfig, store: Arc<PgStore>) -> Result<LeadSync> {
    let api = ApiClient::new(config.http_client_config())?;
    let sheets = Arc::new(GoogleSheetsClient::with_base(api, config.sheets_api_base.clone()));
    Ok(LeadSync::new(
        config.clone(),
        sheets,
        store.clone(),
        store.clone(),
        store,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("connecting to the database")?,
    );

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            info!("migrations applied");
        }
        Commands::Serve => {
            let engine = Arc::new(engine(&config, store)?);
            leadsync_web::serve(engine, config.web_port).await?;
        }
        Commands::RegisterBatch { batch, admin } => {
            store.upsert_batch(&batch, &admin).await?;
            info!(%batch, %admin, "batch registered");
        }
        Commands::RegisterOfficer {
            batch,
            officer,
            spreadsheet,
        } => {
            store.upsert_officer(&batch, &officer, &spreadsheet).await?;
            info!(%batch, %officer, %spreadsheet, "officer registered");
        }
        command => {
            let engine = engine(&config, store)?;
            run(&engine, command).await?;
        }
    }
    Ok(())
}

async fn run(engine: &LeadSync, command: Commands) -> Result<()> {
    match command {
        Commands::Tabs { batch, force } => {
            print_json(&engine.list_sheets_for_batch(&batch.batch, force).await?)
        }
        Commands::AddTab { batch, sheet } => {
            print_json(&engine.add_batch_tab(&batch.batch, &sheet).await?)
        }
        Commands::RemoveTab { batch, sheet } => {
            print_json(&engine.remove_batch_tab(&batch.batch, &sheet).await?)
        }
        Commands::Pull(pass) => {
            let names = (!pass.sheets.is_empty()).then_some(pass.sheets.as_slice());
            print_json(&engine.sync_batch_to_store(&pass.batch, names).await?)
        }
        Commands::Push(pass) => {
            let names = (!pass.sheets.is_empty()).then_some(pass.sheets.as_slice());
            print_json(&engine.sync_assignments_to_sheets(&pass.batch, names).await?)
        }
        Commands::Assignee { batch, phone } => {
            let assigned_to = engine
                .get_assignee_for_duplicate_phone(&batch.batch, &phone)
                .await?;
            print_json(&serde_json::json!({
                "phone": engine.phone_format().canonicalize(&phone),
                "assigned_to": assigned_to,
            }))
        }
        Commands::Update {
            batch,
            sheet,
            lead,
            set,
            json,
        } => {
            let update = parse_update(json.as_deref(), &set)?;
            print_json(&engine.update_batch_lead(&batch.batch, &sheet, &lead, update).await?)
        }
        Commands::Migrate
        | Commands::Serve
        | Commands::RegisterBatch { .. }
        | Commands::RegisterOfficer { .. } => Ok(()),
    }
}
