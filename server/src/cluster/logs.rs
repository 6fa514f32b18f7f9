//! Application log aggregation

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cluster::api::{ClusterApi, ClusterError};
use crate::cluster::resources::label_selector;

/// Collects the logs of every pod labelled for an application
pub struct LogAggregator<C: ClusterApi> {
    cluster: Arc<C>,
    namespace: String,
}

impl<C: ClusterApi> LogAggregator<C> {
    pub fn new(cluster: Arc<C>, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    /// Concatenated logs, each pod's text prefixed with a newline.
    ///
    /// Only listing the pods can fail; a pod whose stream cannot be read is
    /// skipped. No pods yields an empty string.
    pub async fn aggregate(&self, app_name: &str) -> Result<String, ClusterError> {
        let selector = label_selector(app_name);
        let pods = self.cluster.list_pods(&self.namespace, &selector).await?;
        debug!(selector = %selector, count = pods.len(), "Collecting pod logs");

        let mut logs = String::new();
        for pod in pods {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            match self.cluster.pod_logs(&self.namespace, name).await {
                Ok(text) => {
                    logs.push('\n');
                    logs.push_str(&text);
                }
                Err(e) => warn!(pod = %name, error = %e, "Failed to read pod logs"),
            }
        }
        Ok(logs)
    }
}
