//! Command-line argument parsing for snowlink.

use clap::{Parser, Subcommand};
use snowlink::config::ConfigLayer;
use snowlink::db::{Params, Value};
use snowlink::error::{Error, Result};
use std::path::PathBuf;

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text table.
    #[default]
    Table,
    /// JSON document with columns, rows and timing.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {s}. Expected: table or json")),
        }
    }
}

/// Cached, self-healing Snowflake connections from the command line.
#[derive(Parser, Debug)]
#[command(name = "snowlink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Secrets file path (defaults to ./.snowlink/secrets.toml or the user config dir)
    #[arg(long, value_name = "PATH", global = true)]
    pub secrets: Option<PathBuf>,

    /// Account identifier (overrides secrets file and environment)
    #[arg(long, value_name = "ACCOUNT", global = true)]
    pub account: Option<String>,

    /// User name (overrides secrets file and environment)
    #[arg(long, value_name = "USER", global = true)]
    pub user: Option<String>,

    /// Role for this invocation
    #[arg(long, value_name = "ROLE", global = true)]
    pub role: Option<String>,

    /// Warehouse for this invocation
    #[arg(long, value_name = "WAREHOUSE", global = true)]
    pub warehouse: Option<String>,

    /// Use the in-memory mock driver instead of the SQL API
    #[arg(long, global = true)]
    pub mock: bool,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(flatten)]
    Session(SessionCommand),

    /// Store a password for --account/--user in the OS keyring
    Login,
}

/// Commands that run against a warehouse session.
#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Open a session and report it
    Ping,

    /// Run one SQL statement
    Query {
        /// SQL text
        #[arg(value_name = "SQL")]
        sql: String,

        /// Positional bind value, repeatable, in placeholder order
        #[arg(long = "param", value_name = "VALUE")]
        params: Vec<String>,

        /// Named bind value as NAME=VALUE, repeatable
        #[arg(long = "named", value_name = "NAME=VALUE")]
        named: Vec<String>,

        /// Output format
        #[arg(long, value_name = "FORMAT", default_value = "table")]
        format: OutputFormat,
    },

    /// Browse databases, schemas and tables
    Schema {
        /// Database to list schemas of
        #[arg(long, value_name = "DATABASE")]
        database: Option<String>,

        /// Schema to list tables of (needs --database)
        #[arg(long, value_name = "SCHEMA")]
        schema: Option<String>,

        /// Table to describe (needs --database and --schema)
        #[arg(long, value_name = "TABLE")]
        table: Option<String>,
    },
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Settings given on the command line, highest precedence.
    pub fn to_explicit_layer(&self) -> ConfigLayer {
        ConfigLayer {
            account: self.account.clone(),
            user: self.user.clone(),
            role: self.role.clone(),
            warehouse: self.warehouse.clone(),
            ..ConfigLayer::default()
        }
    }
}

/// Builds bind params from `--param` and `--named` values.
pub fn to_params(positional: &[String], named: &[String]) -> Result<Params> {
    match (positional.is_empty(), named.is_empty()) {
        (true, true) => Ok(Params::None),
        (false, true) => Ok(Params::Positional(
            positional.iter().map(|v| Value::parse_literal(v)).collect(),
        )),
        (true, false) => {
            let pairs = named
                .iter()
                .map(|pair| {
                    let (name, value) = pair.split_once('=').ok_or_else(|| {
                        Error::config(format!("Invalid --named '{pair}', expected NAME=VALUE"))
                    })?;
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(Error::config(format!("Invalid --named '{pair}', empty name")));
                    }
                    Ok((name.to_string(), Value::parse_literal(value)))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Params::named(pairs))
        }
        (false, false) => Err(Error::config("Use either --param or --named, not both")),
    }
}
