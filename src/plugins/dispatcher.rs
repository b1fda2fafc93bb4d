//! Measurement fan-out to registered plugins.

use std::sync::Arc;

use tracing::{debug, error};

use crate::data::Measurement;
use crate::plugins::Plugin;

/// Fans each measurement out to every registered plugin.
///
/// One dispatcher is shared by all device sessions. Fan-out for a single
/// measurement is sequential in registration order, but no ordering holds
/// across measurements from different sessions; plugins own the thread
/// safety of their underlying sinks.
pub struct PluginDispatcher {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginDispatcher {
    /// Create a dispatcher over the given plugins.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// Number of registered plugins.
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Deliver one measurement to every plugin.
    ///
    /// A plugin failure is logged and delivery continues with the
    /// remaining plugins; the caller never sees the error.
    pub async fn dispatch(&self, measurement: &Measurement) {
        debug!(
            "Dispatching measurement: person {} at {} ({:.1} kg) to {} plugins",
            measurement.person,
            measurement.timestamp,
            measurement.weight_kg,
            self.plugins.len()
        );

        for plugin in &self.plugins {
            if let Err(e) = plugin.publish(measurement).await {
                error!("Plugin {} failed to publish: {}", plugin.name(), e);
            }
        }
    }
}
