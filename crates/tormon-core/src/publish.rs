//! Publisher: wrap fields into an event and hand it to the sink.
//!
//! Publishing never fails outward. Every event is logged before the write
//! so the log doubles as an audit trail of what was sent; write failures are
//! logged and the sample is dropped.

use std::sync::Arc;

use tracing::{info, warn};

use crate::event::{MeasurementEvent, Tags};
use crate::normalize::Fields;
use crate::sink::MetricsSink;

#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn MetricsSink>,
    database: String,
    tags: Tags,
}

impl Publisher {
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>, database: impl Into<String>, tags: Tags) -> Self {
        Self {
            sink,
            database: database.into(),
            tags,
        }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Build an event stamped now and write it. Returns whether the sink
    /// accepted it.
    pub async fn publish(&self, measurement: &str, fields: Fields) -> bool {
        let event = MeasurementEvent::new(measurement, self.tags.clone(), fields);
        self.publish_event(&event).await
    }

    pub async fn publish_event(&self, event: &MeasurementEvent) -> bool {
        match event.to_json() {
            Ok(json) => info!(measurement = %event.measurement, event = %json, "Publishing event"),
            Err(err) => warn!(measurement = %event.measurement, error = %err, "Could not log event"),
        }

        match self.sink.write(event, &self.database).await {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    measurement = %event.measurement,
                    sink = self.sink.name(),
                    error = %err,
                    "Dropping event after sink failure"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("sink", &self.sink.name())
            .field("database", &self.database)
            .field("tags", &self.tags)
            .finish()
    }
}
