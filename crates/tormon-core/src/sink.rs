//! Metrics sink: where measurement events end up.
//!
//! [`InfluxSink`] talks to the InfluxDB 1.x HTTP API:
//!
//! - `GET /ping` to check the store is up
//! - `POST /query` with `CREATE DATABASE` (idempotent on the server side)
//! - `POST /write?db=<db>&precision=ms` with one line-protocol line per event

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Client, Response};
use tracing::debug;

use crate::error::SinkError;
use crate::event::MeasurementEvent;

/// Sink future type.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Async metrics sink interface.
pub trait MetricsSink: Send + Sync {
    /// Sink identifier used in logs.
    fn name(&self) -> &'static str;

    /// Check that the store is reachable.
    fn ping(&self) -> SinkFuture<'_>;

    /// Create `database` if it does not exist.
    fn create_database<'a>(&'a self, database: &'a str) -> SinkFuture<'a>;

    /// Write one event into `database`.
    fn write<'a>(&'a self, event: &'a MeasurementEvent, database: &'a str) -> SinkFuture<'a>;
}

/// InfluxDB 1.x sink over HTTP.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: Client,
    base_url: String,
}

impl InfluxSink {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url(host, port),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

/// `http://host:port`, unless `host` already carries a scheme.
#[must_use]
pub fn base_url(host: &str, port: u16) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        format!("{host}:{port}")
    } else if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// `CREATE DATABASE` statement with the name as a quoted identifier.
#[must_use]
pub fn create_database_query(database: &str) -> String {
    let escaped = database.replace('\\', "\\\\").replace('"', "\\\"");
    format!("CREATE DATABASE \"{escaped}\"")
}

async fn check_status(response: Response) -> Result<(), SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Rejected {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

impl MetricsSink for InfluxSink {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    fn ping(&self) -> SinkFuture<'_> {
        Box::pin(async move {
            let response = self.client.get(self.endpoint("ping")).send().await?;
            check_status(response).await
        })
    }

    fn create_database<'a>(&'a self, database: &'a str) -> SinkFuture<'a> {
        Box::pin(async move {
            let query = create_database_query(database);
            debug!(database, "Creating database");
            let response = self
                .client
                .post(self.endpoint("query"))
                .form(&[("q", query.as_str())])
                .send()
                .await?;
            check_status(response).await
        })
    }

    fn write<'a>(&'a self, event: &'a MeasurementEvent, database: &'a str) -> SinkFuture<'a> {
        Box::pin(async move {
            let body = event.to_line_protocol()?;
            let response = self
                .client
                .post(self.endpoint("write"))
                .query(&[("db", database), ("precision", "ms")])
                .body(body)
                .send()
                .await?;
            check_status(response).await
        })
    }
}
