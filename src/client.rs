//! Process-scoped facade over the connection manager, executor and reader.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CachedReader, InMemoryMemo, Memoizer, ReadOptions};
use crate::config::{ConfigLayer, ConfigLoader, ConnectionConfig, ExecutorSettings, SecretsFile};
use crate::connection::{ConnectionManager, ManagedConnection, Overrides};
use crate::db::{Params, QueryResult, WarehouseDriver};
use crate::error::Result;
use crate::query::{ExecuteOptions, QueryExecutor};

/// One warehouse client: a shared connection, an executor and a memoizing
/// reader. Clones share all state.
#[derive(Clone)]
pub struct Client {
    manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
    reader: CachedReader,
}

impl Client {
    /// Builds a client over `driver` with an in-memory memo.
    pub fn new(
        config: ConnectionConfig,
        driver: Arc<dyn WarehouseDriver>,
        settings: &ExecutorSettings,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(config, driver));
        let executor = QueryExecutor::from_settings(manager.clone(), settings);
        let reader = CachedReader::new(executor.clone(), Arc::new(InMemoryMemo::new()));
        Self {
            manager,
            executor,
            reader,
        }
    }

    /// Resolves configuration from every source and builds a client.
    ///
    /// Sources, first match wins per field: `explicit`, the secrets file
    /// (`secrets_path` or the default location), `SNOWFLAKE_*` environment
    /// variables, then the OS keyring for the password.
    pub fn from_sources(
        explicit: ConfigLayer,
        secrets_path: Option<&Path>,
        driver: Arc<dyn WarehouseDriver>,
    ) -> Result<Self> {
        let path = secrets_path
            .map(Path::to_path_buf)
            .unwrap_or_else(SecretsFile::default_path);
        debug!("Loading secrets from {}", path.display());
        let secrets = SecretsFile::load_from_file(&path)?;

        let config = ConfigLoader::new()
            .with_explicit(explicit)
            .with_secrets(&secrets)?
            .with_env()?
            .with_system_keyring()
            .resolve()?;

        Ok(Self::new(config, driver, &secrets.snowlink))
    }

    /// Swaps the memo backing [`Client::read`].
    pub fn with_memo(mut self, memo: Arc<dyn Memoizer>) -> Self {
        self.reader = CachedReader::new(self.executor.clone(), memo);
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.manager.config()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn reader(&self) -> &CachedReader {
        &self.reader
    }

    /// Returns a live connection.
    pub async fn connect(&self, overrides: &Overrides) -> Result<Arc<ManagedConnection>> {
        self.manager.connect(overrides).await
    }

    /// Executes a statement without memoization.
    pub async fn execute(&self, sql: &str, params: &Params) -> Result<QueryResult> {
        self.executor.execute(sql, params).await
    }

    /// Executes a statement with per-call options.
    pub async fn execute_with(
        &self,
        sql: &str,
        params: &Params,
        options: &ExecuteOptions,
    ) -> Result<QueryResult> {
        self.executor.execute_with(sql, params, options).await
    }

    /// Runs a read query through the memo.
    pub async fn read(
        &self,
        sql: &str,
        params: &Params,
        options: &ReadOptions,
    ) -> Result<QueryResult> {
        self.reader.read(sql, params, options).await
    }

    /// Closes the cached connection.
    pub async fn close(&self) -> Result<()> {
        self.manager.close().await
    }
}
