//! PostgreSQL testcontainer with logical decoding enabled

#![allow(dead_code)]

use anyhow::{Context, Result};
use std::sync::Once;
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::time::sleep;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info};

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("logical_cdc=debug".parse().unwrap())
                    .add_directive("testcontainers=info".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct PostgresTestContainer {
    container: ContainerAsync<Postgres>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl PostgresTestContainer {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL testcontainer with logical decoding");

        let container = Postgres::default()
            .with_cmd(vec![
                "postgres",
                "-c",
                "wal_level=logical",
                "-c",
                "max_replication_slots=10",
                "-c",
                "max_wal_senders=10",
            ])
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;

        let instance = Self {
            container,
            host,
            port,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        };
        instance.wait_for_ready().await?;

        info!(host = %instance.host, port = instance.port, "PostgreSQL container ready");
        Ok(instance)
    }

    fn conn_str(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.database
        )
    }

    async fn wait_for_ready(&self) -> Result<()> {
        for attempt in 1..=60 {
            match tokio_postgres::connect(&self.conn_str(), NoTls).await {
                Ok(_) => {
                    debug!(attempt, "PostgreSQL accepting connections");
                    return Ok(());
                }
                Err(e) => {
                    if attempt % 10 == 0 {
                        info!("Waiting for PostgreSQL (attempt {}/60): {}", attempt, e);
                    }
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
        anyhow::bail!("PostgreSQL did not become ready in time")
    }

    pub async fn new_client(&self) -> Result<Client> {
        let (client, connection) = tokio_postgres::connect(&self.conn_str(), NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Client connection error: {}", e);
            }
        });
        Ok(client)
    }

    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.new_client().await?.batch_execute(sql).await?;
        Ok(())
    }

    /// Whether a walsender is currently attached to `slot`.
    pub async fn slot_is_active(&self, slot: &str) -> Result<bool> {
        let rows = self
            .new_client()
            .await?
            .query(
                "SELECT active FROM pg_replication_slots WHERE slot_name = $1",
                &[&slot],
            )
            .await?;
        Ok(rows.first().map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    /// `confirmed_flush_lsn` of `slot` as `X/Y`.
    pub async fn confirmed_flush(&self, slot: &str) -> Result<Option<String>> {
        let rows = self
            .new_client()
            .await?
            .query(
                "SELECT confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
                &[&slot],
            )
            .await?;
        Ok(rows.first().and_then(|r| r.get::<_, Option<String>>(0)))
    }

    pub async fn drop_replication_slot(&self, slot: &str) -> Result<()> {
        self.new_client()
            .await?
            .execute("SELECT pg_drop_replication_slot($1)", &[&slot])
            .await
            .ok();
        Ok(())
    }
}

pub fn unique_slot(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..8])
}
