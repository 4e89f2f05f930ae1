//! snowlink - cached, self-healing Snowflake connections.

mod cli;
mod output;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use cli::{Cli, Command, OutputFormat, SessionCommand};
use snowlink::client::Client;
use snowlink::config::{ConnectionConfig, ExecutorSettings, SecretsFile};
use snowlink::connection::Overrides;
use snowlink::db::{MockDriver, SqlApiDriver, WarehouseDriver};
use snowlink::error::Error;
use snowlink::helpers::schema;
use snowlink::logging;
use snowlink::secrets::SecretStorage;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    logging::init_stderr_logging(if cli.verbose { "debug" } else { "info" });

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<Error>() {
            Some(err) => error!("{}: {:#}", err.category(), e),
            None => error!("{:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = match &cli.command {
        Command::Login => return login(&cli),
        Command::Session(command) => command,
    };

    let client = build_client(&cli)?;
    info!("Connection: {}", client.config().display_string());

    let result = dispatch(command, &client).await;
    if let Err(e) = client.close().await {
        warn!("Failed to close session: {e}");
    }
    result
}

async fn dispatch(command: &SessionCommand, client: &Client) -> anyhow::Result<()> {
    match command {
        SessionCommand::Ping => {
            let conn = logging::timed("Connect", client.connect(&Overrides::default())).await?;
            println!(
                "Connected to {} via {} (session {}, role={}, warehouse={})",
                conn.config().display_string(),
                client.manager().driver_name(),
                conn.id(),
                conn.role().unwrap_or("-"),
                conn.warehouse().unwrap_or("-"),
            );
        }
        SessionCommand::Query {
            sql,
            params,
            named,
            format,
        } => {
            let params = cli::to_params(params, named)?;
            let result =
                logging::timed("Query", client.execute(sql, &params)).await?;
            match format {
                OutputFormat::Table => print!("{}", output::format_table(&result)),
                OutputFormat::Json => println!(
                    "{}",
                    output::format_json(&result).context("Failed to encode result as JSON")?
                ),
            }
        }
        SessionCommand::Schema {
            database,
            schema: schema_name,
            table,
        } => match (database, schema_name, table) {
            (Some(db), Some(sch), Some(tbl)) => {
                let description = schema::describe_table(client, db, sch, tbl).await?;
                print!("{}", description.format_for_display());
                println!();
                println!("{}", schema::select_snippet(db, sch, tbl, &[])?);
            }
            (Some(db), Some(sch), None) => {
                let tables = schema::list_tables(client, db, sch).await?;
                print!("{}", output::format_names("Tables", &tables));
            }
            (Some(db), None, None) => {
                let schemas = schema::list_schemas(client, db).await?;
                print!("{}", output::format_names("Schemas", &schemas));
            }
            (None, None, None) => {
                let databases = schema::list_databases(client).await?;
                print!("{}", output::format_names("Databases", &databases));
            }
            _ => anyhow::bail!("--table needs --schema, and --schema needs --database"),
        },
    }
    Ok(())
}

/// Resolves configuration and picks the driver.
fn build_client(cli: &Cli) -> anyhow::Result<Client> {
    if cli.mock {
        let driver: Arc<dyn WarehouseDriver> = Arc::new(MockDriver::new());
        return match Client::from_sources(cli.to_explicit_layer(), cli.secrets.as_deref(), driver.clone()) {
            Ok(client) => Ok(client),
            Err(Error::Config(reason)) => {
                info!("Mock mode without complete settings ({reason}); using placeholder account");
                let mut config = ConnectionConfig::with_password("mock", "mock", "mock");
                config.role = cli.role.clone();
                config.warehouse = cli.warehouse.clone();
                let settings = match &cli.secrets {
                    Some(path) => SecretsFile::load_from_file(path)?.snowlink,
                    None => ExecutorSettings::default(),
                };
                Ok(Client::new(config, driver, &settings))
            }
            Err(e) => Err(e.into()),
        };
    }

    let driver: Arc<dyn WarehouseDriver> = Arc::new(SqlApiDriver::new()?);
    Ok(Client::from_sources(
        cli.to_explicit_layer(),
        cli.secrets.as_deref(),
        driver,
    )?)
}

/// Stores a password for `--account`/`--user` in the OS keyring.
fn login(cli: &Cli) -> anyhow::Result<()> {
    let account = cli
        .account
        .as_deref()
        .context("login needs --account")?;
    let user = cli.user.as_deref().context("login needs --user")?;

    let password = match std::env::var("SNOWLINK_PASSWORD") {
        Ok(password) => password,
        Err(_) => {
            eprintln!("Password for {user}@{account} (read from stdin):");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("Refusing to store an empty password");
    }

    let storage = SecretStorage::new();
    let key = SecretStorage::connection_password_key(account, user);
    storage.store(&key, &password)?;
    println!(
        "Stored password {} for {user}@{account} in the OS keyring",
        SecretStorage::mask_secret(&password)
    );
    Ok(())
}
