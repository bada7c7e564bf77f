//! Jobs: named, periodic producers of field mappings.
//!
//! A [`Job`] is plain data plus a `produce` closure; the scheduler owns the
//! timing and the publisher owns delivery. [`standard_jobs`] builds the four
//! jobs the daemon runs:
//!
//! | Job         | Every | Fields                                                   |
//! |-------------|-------|----------------------------------------------------------|
//! | `bandwidth` | 5s    | `bytes_read`, `bytes_written`                            |
//! | `stats`     | 60s   | `idormant`, `liveness`                                   |
//! | `slowstats` | 1h    | `srv_bandwidth`, `srv_flags`, `entry_guards`, `iuptime`  |
//! | `conf`      | 24h   | `version`, `exit_4`, `exit_6`, `exit_full`               |

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::normalize::{Fields, Value};
use crate::router::QueryRouter;

pub const BANDWIDTH_INTERVAL: Duration = Duration::from_secs(5);
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);
pub const SLOWSTATS_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const CONF_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Future returned by a job's `produce` function.
pub type ProduceFuture = Pin<Box<dyn Future<Output = Result<Fields>> + Send + 'static>>;

type ProduceFn = dyn Fn() -> ProduceFuture + Send + Sync;

#[derive(Clone)]
pub struct Job {
    name: String,
    interval: Duration,
    measurement: String,
    produce: Arc<ProduceFn>,
}

impl Job {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        interval: Duration,
        measurement: impl Into<String>,
        produce: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Fields>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            measurement: measurement.into(),
            produce: Arc::new(move || Box::pin(produce()) as ProduceFuture),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Start one production run.
    #[must_use]
    pub fn produce(&self) -> ProduceFuture {
        (self.produce)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("measurement", &self.measurement)
            .finish_non_exhaustive()
    }
}

/// Query each `(field, key)` pair in order into a field mapping.
async fn collect(router: &QueryRouter, pairs: &[(&str, &str)]) -> Result<Fields> {
    let mut fields = Fields::new();
    for (field, key) in pairs {
        fields.insert((*field).to_string(), router.query_value(key).await?);
    }
    Ok(fields)
}

#[must_use]
pub fn bandwidth_job(router: QueryRouter) -> Job {
    Job::new("bandwidth", BANDWIDTH_INTERVAL, "bandwidth", move || {
        let router = router.clone();
        async move {
            collect(
                &router,
                &[("bytes_read", "traffic/read"), ("bytes_written", "traffic/written")],
            )
            .await
        }
    })
}

#[must_use]
pub fn stats_job(router: QueryRouter) -> Job {
    Job::new("stats", STATS_INTERVAL, "stats", move || {
        let router = router.clone();
        async move {
            collect(
                &router,
                &[("idormant", "dormant"), ("liveness", "network-liveness")],
            )
            .await
        }
    })
}

#[must_use]
pub fn slowstats_job(router: QueryRouter, fingerprint: impl Into<String>) -> Job {
    let fingerprint: Arc<str> = Arc::from(fingerprint.into());
    Job::new("slowstats", SLOWSTATS_INTERVAL, "slowstats", move || {
        let router = router.clone();
        let fingerprint = Arc::clone(&fingerprint);
        async move {
            let status = router.router_status(&fingerprint).await?;
            let mut fields = Fields::new();
            fields.insert("srv_bandwidth".into(), Value::Integer(status.bandwidth));
            fields.insert("srv_flags".into(), Value::Json(status.flags.to_json()));
            fields.extend(
                collect(&router, &[("entry_guards", "entry-guards"), ("iuptime", "uptime")])
                    .await?,
            );
            Ok(fields)
        }
    })
}

#[must_use]
pub fn conf_job(router: QueryRouter) -> Job {
    Job::new("conf", CONF_INTERVAL, "conf", move || {
        let router = router.clone();
        async move {
            collect(
                &router,
                &[
                    ("version", "version"),
                    ("exit_4", "exit-policy/ipv4"),
                    ("exit_6", "exit-policy/ipv6"),
                    ("exit_full", "exit-policy/full"),
                ],
            )
            .await
        }
    })
}

/// The four jobs the daemon runs, fastest first.
#[must_use]
pub fn standard_jobs(router: &QueryRouter, fingerprint: &str) -> Vec<Job> {
    vec![
        bandwidth_job(router.clone()),
        stats_job(router.clone()),
        slowstats_job(router.clone(), fingerprint),
        conf_job(router.clone()),
    ]
}
