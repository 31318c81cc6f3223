use std::sync::Arc;

use tracing::{debug, error, warn};
use wheelctl_core::{CommandRegistry, Params, Request, WheelctlError};

use crate::node::{NodeService, Scoped};

/// Log a failed send under `name` and collapse the outcome to a flag.
/// Timeouts are warnings; every other failure is an error.
pub(crate) fn report(name: &str, outcome: wheelctl_core::Result<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e @ WheelctlError::CommandTimeout { .. }) => {
            warn!(command = %name, "{e}");
            false
        }
        Err(e) => {
            error!(command = %name, "{e}");
            false
        }
    }
}

/// Turns a named command and a parameter map into one bounded remote call.
///
/// No retries. Every call acquires its own client handle and releases it
/// before returning, whatever the outcome.
#[derive(Clone)]
pub struct CommandExecutor {
    node: Arc<dyn NodeService>,
    registry: Arc<CommandRegistry>,
}

impl CommandExecutor {
    pub fn new(node: Arc<dyn NodeService>, registry: Arc<CommandRegistry>) -> Self {
        Self { node, registry }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Send `name`; `true` iff an affirmative reply arrived in time.
    pub async fn send(&self, name: &str, params: &Params) -> bool {
        report(name, self.try_send(name, params).await)
    }

    /// Send `name`, reporting why it failed.
    ///
    /// Unknown names fail before the node is touched. Disabled commands are
    /// the orchestrator's concern and are sent if asked.
    pub async fn try_send(&self, name: &str, params: &Params) -> wheelctl_core::Result<()> {
        let spec = self
            .registry
            .get(name)
            .ok_or_else(|| WheelctlError::UnknownCommand(name.to_string()))?;

        let request = Request::build(spec.request_type, name, params)?;

        let client = self
            .node
            .create_client(spec.request_type, spec.server_node_id, spec.port)
            .ok_or_else(|| WheelctlError::ChannelUnavailable {
                command: name.to_string(),
            })?;
        let mut client = Scoped::new(client);

        debug!(command = %name, kind = %spec.request_type, port = spec.port, "sending");
        let reply = tokio::time::timeout(spec.timeout(), client.call(request))
            .await
            .map_err(|_| WheelctlError::CommandTimeout {
                command: name.to_string(),
                timeout_secs: spec.timeout_secs,
            })?
            .map_err(|e| WheelctlError::CommandTransportError {
                command: name.to_string(),
                reason: e.to_string(),
            })?;

        match reply {
            Some(response) if response.is_affirmative() => Ok(()),
            _ => Err(WheelctlError::Rejected(name.to_string())),
        }
    }
}
