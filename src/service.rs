//! Service descriptors: the immutable identity of each gated service

use crate::duration;
use std::time::Duration;

/// One service in a gate's group, with its pre-built wake/status URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    name: String,
    wake_url: String,
}

impl ServiceDescriptor {
    /// Build the descriptor for `name`, asking the orchestrator at `service_url`
    /// to keep it alive for `timeout` of inactivity
    pub fn new(service_url: &str, name: &str, timeout: Duration) -> Self {
        let separator = if service_url.contains('?') { '&' } else { '?' };
        let wake_url = format!(
            "{}{}name={}&timeout={}",
            service_url,
            separator,
            urlencoding::encode(name),
            urlencoding::encode(&duration::wire_format(timeout)),
        );

        Self {
            name: name.to_string(),
            wake_url,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wake_url(&self) -> &str {
        &self.wake_url
    }
}
