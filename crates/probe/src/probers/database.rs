//! Database connectivity probers.
//!
//! Each target is pinged with the cheapest round trip the engine offers:
//! `SELECT NOW()` for SQL engines, `ping` for MongoDB, `PING` for Redis.

use super::Prober;
use crate::types::{DatabaseTarget, ProbeKind, ProbeResult};
use async_trait::async_trait;
use common::{Error, Result};
use mysql_async::prelude::Queryable;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, warn};

const PING_QUERY: &str = "SELECT NOW()";

fn default_port(kind: ProbeKind) -> u16 {
    match kind {
        ProbeKind::Postgres => 5432,
        ProbeKind::Mysql | ProbeKind::Mariadb => 3306,
        ProbeKind::Mongo => 27017,
        ProbeKind::Redis => 6379,
        _ => 0,
    }
}

/// Prober for Postgres, MySQL, MariaDB, MongoDB and Redis targets.
pub struct DatabaseProber {
    probe_id: String,
    kind: ProbeKind,
    targets: Vec<DatabaseTarget>,
}

impl DatabaseProber {
    /// Create a new database prober
    pub fn new(probe_id: &str, kind: ProbeKind, targets: Vec<DatabaseTarget>) -> Result<Self> {
        if default_port(kind) == 0 {
            return Err(Error::config(format!(
                "probe '{}': {} is not a database probe",
                probe_id, kind
            )));
        }
        Ok(Self {
            probe_id: probe_id.to_string(),
            kind,
            targets,
        })
    }

    async fn ping(&self, target: &DatabaseTarget) -> std::result::Result<(), String> {
        match self.kind {
            ProbeKind::Postgres => ping_postgres(target).await,
            ProbeKind::Mysql | ProbeKind::Mariadb => ping_mysql(target).await,
            ProbeKind::Mongo => ping_mongo(target).await,
            ProbeKind::Redis => ping_redis(target).await,
            other => Err(format!("unsupported database kind: {}", other)),
        }
    }

    async fn check(&self, index: usize, target: &DatabaseTarget) -> ProbeResult {
        let start = Instant::now();
        let endpoint = target.describe(default_port(self.kind));

        match timeout(target.timeout, self.ping(target)).await {
            Ok(Ok(())) => {
                let duration = start.elapsed();
                debug!(probe_id = %self.probe_id, kind = %self.kind, endpoint = %endpoint,
                       duration_ms = duration.as_millis(), "Database ping successful");
                ProbeResult::alive(index, duration)
            }
            Ok(Err(e)) => {
                warn!(probe_id = %self.probe_id, kind = %self.kind, endpoint = %endpoint, error = %e,
                      "Database ping failed");
                ProbeResult::unreachable(index, start.elapsed(), e)
            }
            Err(_) => {
                warn!(probe_id = %self.probe_id, kind = %self.kind, endpoint = %endpoint,
                      "Database ping timed out");
                ProbeResult::timeout(index, start.elapsed())
            }
        }
    }
}

async fn ping_postgres(target: &DatabaseTarget) -> std::result::Result<(), String> {
    let mut config = match &target.uri {
        Some(uri) => uri
            .parse::<tokio_postgres::Config>()
            .map_err(|e| format!("invalid postgres uri: {}", e))?,
        None => {
            let mut config = tokio_postgres::Config::new();
            config
                .host(target.host_or_default())
                .port(target.port.unwrap_or(5432));
            if let Some(user) = &target.username {
                config.user(user);
            }
            if let Some(password) = &target.password {
                config.password(password);
            }
            if let Some(database) = &target.database {
                config.dbname(database);
            }
            config
        }
    };
    config.connect_timeout(target.timeout);

    let (client, connection) = config
        .connect(tokio_postgres::NoTls)
        .await
        .map_err(|e| e.to_string())?;
    let driver = tokio::spawn(connection);

    let outcome = client
        .simple_query(PING_QUERY)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string());

    drop(client);
    driver.abort();
    outcome
}

async fn ping_mysql(target: &DatabaseTarget) -> std::result::Result<(), String> {
    let opts: mysql_async::Opts = match &target.uri {
        Some(uri) => mysql_async::Opts::from_url(uri).map_err(|e| format!("invalid mysql uri: {}", e))?,
        None => mysql_async::OptsBuilder::default()
            .ip_or_hostname(target.host_or_default())
            .tcp_port(target.port.unwrap_or(3306))
            .user(target.username.clone())
            .pass(target.password.clone())
            .db_name(target.database.clone())
            .into(),
    };

    let mut conn = mysql_async::Conn::new(opts).await.map_err(|e| e.to_string())?;
    let outcome = conn.query_drop(PING_QUERY).await.map_err(|e| e.to_string());
    if let Err(e) = conn.disconnect().await {
        debug!(error = %e, "MySQL disconnect failed");
    }
    outcome
}

/// Client options from discrete fields. Credentials are passed as-is, never
/// through a URI.
fn mongo_options(target: &DatabaseTarget) -> mongodb::options::ClientOptions {
    use mongodb::options::{ClientOptions, Credential, ServerAddress};

    let mut options = ClientOptions::builder()
        .hosts(vec![ServerAddress::Tcp {
            host: target.host_or_default().to_string(),
            port: Some(target.port.unwrap_or(27017)),
        }])
        .build();
    if target.username.is_some() || target.password.is_some() {
        options.credential = Some(
            Credential::builder()
                .username(target.username.clone())
                .password(target.password.clone())
                .source(target.database.clone())
                .build(),
        );
    }
    options.default_database = target.database.clone();
    options
}

async fn ping_mongo(target: &DatabaseTarget) -> std::result::Result<(), String> {
    use mongodb::bson::doc;
    use mongodb::options::ClientOptions;

    let mut options = match &target.uri {
        Some(uri) => ClientOptions::parse(uri)
            .await
            .map_err(|e| format!("invalid mongo uri: {}", e))?,
        None => mongo_options(target),
    };
    options.connect_timeout = Some(target.timeout);
    options.server_selection_timeout = Some(target.timeout);

    let client = mongodb::Client::with_options(options).map_err(|e| e.to_string())?;
    let outcome = client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map(|_| ())
        .map_err(|e| e.to_string());
    client.shutdown().await;
    outcome
}

/// Connection info from discrete fields. Credentials are passed as-is, never
/// through a URL.
fn redis_connection_info(target: &DatabaseTarget) -> std::result::Result<redis::ConnectionInfo, String> {
    let db = match target.database.as_deref() {
        Some(db) => db
            .parse::<i64>()
            .map_err(|_| format!("invalid redis database index: {}", db))?,
        None => 0,
    };
    Ok(redis::ConnectionInfo {
        addr: redis::ConnectionAddr::Tcp(
            target.host_or_default().to_string(),
            target.port.unwrap_or(6379),
        ),
        redis: redis::RedisConnectionInfo {
            db,
            username: target.username.clone(),
            password: target.password.clone(),
            ..Default::default()
        },
    })
}

async fn ping_redis(target: &DatabaseTarget) -> std::result::Result<(), String> {
    let client = match &target.uri {
        Some(uri) => redis::Client::open(uri.as_str()),
        None => redis::Client::open(redis_connection_info(target)?),
    }
    .map_err(|e| format!("invalid redis uri: {}", e))?;
    let mut con = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| e.to_string())?;
    let pong: String = redis::cmd("PING")
        .query_async(&mut con)
        .await
        .map_err(|e| e.to_string())?;
    if pong == "PONG" {
        Ok(())
    } else {
        Err(format!("unexpected PING reply: {}", pong))
    }
}

#[async_trait]
impl Prober for DatabaseProber {
    async fn probe(&self, attempt: u32) -> Vec<ProbeResult> {
        let mut results = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            let mut result = self.check(index, target).await;
            result.attempt = attempt;
            results.push(result);
        }
        results
    }

    fn kind(&self) -> ProbeKind {
        self.kind
    }
}
