use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use sheetfeed::testing::{DEFAULT_MOCK_KEY, DEFAULT_MOCK_SITE};
use sheetfeed::{
    AuthScheme, Comparison, Condition, ConnectionAdapter, Direction, HttpTransport, Model, Query,
    Record, Row, SelectQuery, SheetAdapter, SheetConfig, TableSchema, Value,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "sheetfeed-cli")]
#[command(about = "Table CRUD against an Atom spreadsheet feed")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct ConnectionArgs {
    /// JSON table schema: `{"name": ..., "columns": [{"name", "type", "key"}]}`.
    #[arg(long, global = true)]
    schema: Option<PathBuf>,
    #[arg(long, global = true)]
    spreadsheet_url: Option<String>,
    #[arg(long, global = true)]
    secret_key: Option<String>,
    #[arg(long, global = true, value_enum)]
    adapter: Option<AdapterArg>,
    #[arg(long, global = true, value_enum)]
    auth_scheme: Option<AuthSchemeArg>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Exists,
    CreateTable,
    DropTable,
    Insert(InsertArgs),
    Select(SelectArgs),
    Update(UpdateArgs),
    Delete(DeleteArgs),
}

#[derive(clap::Args, Debug)]
struct InsertArgs {
    /// One JSON object of column values per row.
    #[arg(long = "values", required = true)]
    values: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct SelectArgs {
    /// `column<op>value`; repeat for a conjunction.
    #[arg(long = "where")]
    conditions: Vec<String>,
    #[arg(long)]
    columns: Option<String>,
    #[arg(long)]
    order_by: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    desc: bool,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct UpdateArgs {
    #[arg(long)]
    key: String,
    #[arg(long = "set")]
    set: String,
}

#[derive(clap::Args, Debug)]
struct DeleteArgs {
    #[arg(long)]
    key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum AdapterArg {
    Reqwest,
    Memory,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AuthSchemeArg {
    Bearer,
    Authsub,
}

impl From<AdapterArg> for ConnectionAdapter {
    fn from(value: AdapterArg) -> Self {
        match value {
            AdapterArg::Reqwest => Self::Reqwest,
            AdapterArg::Memory => Self::Memory,
        }
    }
}

impl From<AuthSchemeArg> for AuthScheme {
    fn from(value: AuthSchemeArg) -> Self {
        match value {
            AuthSchemeArg::Bearer => Self::Bearer,
            AuthSchemeArg::Authsub => Self::AuthSub,
        }
    }
}

type Adapter = SheetAdapter<Arc<dyn HttpTransport>>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.connection.log_level.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    let config = load_config(&cli.connection)?;
    let schema = Arc::new(load_schema(cli.connection.schema.as_deref())?);
    let adapter = Adapter::from_config(&config).map_err(|error| error.to_string())?;
    tracing::debug!(
        site = %config.site(),
        worksheet = %schema.storage_name,
        adapter = ?config.connection_adapter,
        "connected"
    );

    match cli.command {
        Commands::Exists => exists_command(&adapter, &schema).await,
        Commands::CreateTable => create_table_command(&adapter, &schema).await,
        Commands::DropTable => drop_table_command(&adapter, &schema).await,
        Commands::Insert(args) => insert_command(&adapter, &schema, args).await,
        Commands::Select(args) => select_command(&adapter, &schema, args).await,
        Commands::Update(args) => update_command(&adapter, &schema, args).await,
        Commands::Delete(args) => delete_command(&adapter, &schema, args).await,
    }
}

fn load_config(args: &ConnectionArgs) -> Result<SheetConfig, String> {
    let memory_url = format!("{DEFAULT_MOCK_SITE}/feeds/spreadsheets/{DEFAULT_MOCK_KEY}");
    let fallback_url = match (&args.spreadsheet_url, args.adapter) {
        (Some(url), _) => Some(url.as_str()),
        (None, Some(AdapterArg::Memory)) => Some(memory_url.as_str()),
        (None, _) => None,
    };
    let mut config = SheetConfig::from_env_or(fallback_url).map_err(|error| error.to_string())?;

    if let Some(url) = &args.spreadsheet_url {
        config = config
            .with_spreadsheet_url(url)
            .map_err(|error| error.to_string())?;
    }
    if let Some(secret_key) = &args.secret_key {
        config.secret_key = secret_key.clone();
    }
    if let Some(adapter) = args.adapter {
        config.connection_adapter = adapter.into();
    }
    if let Some(scheme) = args.auth_scheme {
        config.auth_scheme = scheme.into();
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = Some(Duration::from_secs(secs));
    }
    Ok(config)
}

fn load_schema(path: Option<&Path>) -> Result<TableSchema, String> {
    let path = path.ok_or_else(|| "--schema <file.json> is required".to_string())?;
    let source = std::fs::read_to_string(path)
        .map_err(|error| format!("failed to read schema {}: {error}", path.display()))?;
    let schema: TableSchema = serde_json::from_str(&source)
        .map_err(|error| format!("invalid schema {}: {error}", path.display()))?;
    schema
        .validate()
        .map_err(|error| format!("invalid schema {}: {error}", path.display()))?;
    Ok(schema)
}

async fn exists_command(adapter: &Adapter, schema: &TableSchema) -> Result<ExitCode, String> {
    let exists = adapter
        .storage_exists(&schema.storage_name)
        .await
        .map_err(|error| error.to_string())?;
    println!("{exists}");
    Ok(ExitCode::SUCCESS)
}

async fn create_table_command(
    adapter: &Adapter,
    schema: &TableSchema,
) -> Result<ExitCode, String> {
    let created = adapter
        .create_model_storage(schema)
        .await
        .map_err(|error| error.to_string())?;
    if created {
        println!("created worksheet '{}'", schema.storage_name);
    } else {
        println!("worksheet '{}' already exists", schema.storage_name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn drop_table_command(adapter: &Adapter, schema: &TableSchema) -> Result<ExitCode, String> {
    let dropped = adapter
        .destroy_model_storage(schema)
        .await
        .map_err(|error| error.to_string())?;
    if dropped {
        println!("dropped worksheet '{}'", schema.storage_name);
    } else {
        println!("no worksheet '{}'", schema.storage_name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn insert_command(
    adapter: &Adapter,
    schema: &Arc<TableSchema>,
    args: InsertArgs,
) -> Result<ExitCode, String> {
    let mut rows = args
        .values
        .iter()
        .map(|json| row_from_json(schema, json))
        .collect::<Result<Vec<_>, _>>()?;
    adapter
        .create(&mut rows)
        .await
        .map_err(|error| error.to_string())?;

    for row in &rows {
        let columns: BTreeMap<&str, Value> = schema
            .columns
            .iter()
            .map(|column| {
                (
                    column.name.as_str(),
                    row.get(&column.name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect();
        println!("{}", to_json(&columns)?);
    }
    Ok(ExitCode::SUCCESS)
}

async fn select_command(
    adapter: &Adapter,
    schema: &Arc<TableSchema>,
    args: SelectArgs,
) -> Result<ExitCode, String> {
    let mut query = SelectQuery::all(schema.clone());
    if let Some(columns) = &args.columns {
        let columns: Vec<&str> = columns.split(',').map(str::trim).collect();
        query = query.select(&columns).map_err(|error| error.to_string())?;
    }
    for raw in &args.conditions {
        let condition = raw
            .parse::<Condition>()
            .map_err(|error| error.to_string())?;
        query = query
            .with_condition(condition)
            .map_err(|error| error.to_string())?;
    }
    if let Some(column) = &args.order_by {
        let direction = if args.desc {
            Direction::Desc
        } else {
            Direction::Asc
        };
        query = query
            .order_by(column, direction)
            .map_err(|error| error.to_string())?;
    }
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }

    let records = adapter
        .read(&query)
        .await
        .map_err(|error| error.to_string())?;
    if args.json {
        println!("{}", to_json(&records)?);
    } else {
        print_table(&query, &records);
    }
    Ok(ExitCode::SUCCESS)
}

async fn update_command(
    adapter: &Adapter,
    schema: &Arc<TableSchema>,
    args: UpdateArgs,
) -> Result<ExitCode, String> {
    let changes = parse_values(schema, &args.set)?;
    let mut rows = locate_rows(adapter, schema, &args.key).await?;

    let mut attributes = Record::new();
    for (name, value) in &changes {
        for row in &mut rows {
            row.set(name, value.clone()).map_err(|error| error.to_string())?;
        }
        if let Some(column) = schema.column(name) {
            attributes.insert(schema.field(column), column.coerce(value.clone()));
        }
    }

    adapter
        .update(&attributes, &rows)
        .await
        .map_err(|error| error.to_string())?;
    println!("updated {} row(s)", rows.len());
    Ok(ExitCode::SUCCESS)
}

async fn delete_command(
    adapter: &Adapter,
    schema: &Arc<TableSchema>,
    args: DeleteArgs,
) -> Result<ExitCode, String> {
    let rows = locate_rows(adapter, schema, &args.key).await?;
    let deleted = adapter
        .delete(&rows)
        .await
        .map_err(|error| error.to_string())?;
    println!("deleted {deleted} row(s)");
    Ok(ExitCode::SUCCESS)
}

/// Reads the rows whose columns equal every value of the `--key` object.
async fn locate_rows(
    adapter: &Adapter,
    schema: &Arc<TableSchema>,
    key_json: &str,
) -> Result<Vec<Row>, String> {
    let key = parse_values(schema, key_json)?;
    if key.is_empty() {
        return Err("--key must name at least one column".to_string());
    }
    let mut query = SelectQuery::all(schema.clone());
    for (name, value) in key {
        query = query
            .with_condition(Condition::new(name, Comparison::Eq, value))
            .map_err(|error| error.to_string())?;
    }
    let records = adapter
        .read(&query)
        .await
        .map_err(|error| error.to_string())?;
    if records.is_empty() {
        return Err(format!(
            "no row in worksheet '{}' matches {key_json}",
            schema.storage_name
        ));
    }
    Ok(records
        .iter()
        .map(|record| Row::from_record(schema.clone(), record))
        .collect())
}

fn parse_values(schema: &TableSchema, json: &str) -> Result<BTreeMap<String, Value>, String> {
    let values: BTreeMap<String, Value> =
        serde_json::from_str(json).map_err(|error| format!("invalid JSON object {json}: {error}"))?;
    if let Some(unknown) = values.keys().find(|name| schema.column(name).is_none()) {
        return Err(format!(
            "table '{}' has no column '{unknown}'",
            schema.storage_name
        ));
    }
    Ok(values)
}

fn row_from_json(schema: &Arc<TableSchema>, json: &str) -> Result<Row, String> {
    let mut row = Row::new(schema.clone());
    for (name, value) in parse_values(schema, json)? {
        row.set(&name, value).map_err(|error| error.to_string())?;
    }
    Ok(row)
}

fn print_table(query: &SelectQuery, records: &[Record]) {
    let model = query.model();
    let fields: Vec<String> = query
        .fields()
        .into_iter()
        .map(|property| model.field(property))
        .collect();
    println!("{}", fields.join("\t"));
    for record in records {
        let cells: Vec<String> = fields
            .iter()
            .map(|field| record.get(field).map(Value::to_wire_string).unwrap_or_default())
            .collect();
        println!("{}", cells.join("\t"));
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|error| error.to_string())
}
