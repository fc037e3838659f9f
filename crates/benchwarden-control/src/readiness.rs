//! Waiting for the database and redis before touching the bench.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::Connection;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{BoxError, ControlError, ControlResult};
use crate::instance::CommonSiteConfig;

/// A dependency that can be checked for reachability.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Human-readable dependency name.
    fn target(&self) -> String;

    /// One reachability check.
    async fn probe(&self) -> Result<(), BoxError>;
}

/// Connects to MariaDB/MySQL and pings it.
pub struct MySqlProbe {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
}

impl MySqlProbe {
    /// Probe for the configured database.
    #[must_use]
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            username: config.root_username.clone(),
            password: config.root_password.clone(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for MySqlProbe {
    fn target(&self) -> String {
        format!("mariadb at {}:{}", self.host, self.port)
    }

    async fn probe(&self) -> Result<(), BoxError> {
        let options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret());
        let mut conn = MySqlConnection::connect_with(&options).await?;
        conn.ping().await?;
        conn.close().await?;
        Ok(())
    }
}

/// Sends `PING` to a redis endpoint.
pub struct RedisProbe {
    role: &'static str,
    url: String,
}

impl RedisProbe {
    /// Probe for one endpoint.
    #[must_use]
    pub fn new(role: &'static str, url: impl Into<String>) -> Self {
        Self {
            role,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for RedisProbe {
    fn target(&self) -> String {
        format!("{} at {}", self.role, self.url)
    }

    async fn probe(&self) -> Result<(), BoxError> {
        let client = redis::Client::open(self.url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Probes for the database and every redis endpoint of the bench.
#[must_use]
pub fn startup_probes(
    database: &DatabaseConfig,
    common: &CommonSiteConfig,
) -> Vec<Box<dyn ReadinessProbe>> {
    let mut probes: Vec<Box<dyn ReadinessProbe>> = vec![Box::new(MySqlProbe::from_config(database))];
    probes.extend(
        common
            .redis_endpoints()
            .into_iter()
            .map(|(role, url)| Box::new(RedisProbe::new(role, url)) as Box<dyn ReadinessProbe>),
    );
    probes
}

/// Probe until success or until `timeout` has elapsed.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    timeout: Duration,
    interval: Duration,
) -> ControlResult<()> {
    let target = probe.target();
    let deadline = Instant::now() + timeout;
    info!(target = %target, timeout_secs = timeout.as_secs(), "waiting for dependency");

    let last_error = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let error = match tokio::time::timeout(remaining, probe.probe()).await {
            Ok(Ok(())) => {
                info!(target = %target, "dependency ready");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "probe timed out".to_owned(),
        };

        if Instant::now() + interval >= deadline {
            break error;
        }
        debug!(target = %target, error = %error, "dependency not ready yet");
        tokio::time::sleep(interval).await;
    };

    Err(ControlError::Unready { target, last_error })
}

/// Wait for every probe in turn.
pub async fn wait_for_all(
    probes: &[Box<dyn ReadinessProbe>],
    timeout: Duration,
    interval: Duration,
) -> ControlResult<()> {
    for probe in probes {
        wait_until_ready(probe.as_ref(), timeout, interval).await?;
    }
    Ok(())
}
