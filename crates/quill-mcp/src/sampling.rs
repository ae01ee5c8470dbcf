//! Server-side sampling: asking the client for a completion over the same connection.

use crate::error::McpError;
use crate::jsonrpc::{ErrorKind, ErrorObject};
use crate::peer::Peer;
use crate::protocol::{ClientCapabilities, methods};
use quill_types::{BoxFuture, Sampler, SamplingError, SamplingRequest, SamplingResult};

/// Issues `sampling/createMessage` back to the client that opened the connection.
///
/// Consults the capabilities the client declared at handshake and fails with
/// `SamplingError::Unavailable` without sending anything if sampling was not
/// among them.
#[derive(Clone)]
pub struct SamplingBridge {
    peer: Peer,
    client_capabilities: ClientCapabilities,
}

impl SamplingBridge {
    pub fn new(peer: Peer, client_capabilities: ClientCapabilities) -> Self {
        Self {
            peer,
            client_capabilities,
        }
    }
}

impl Sampler for SamplingBridge {
    fn is_available(&self) -> bool {
        self.client_capabilities.supports_sampling()
    }

    fn create_message(
        &self,
        request: SamplingRequest,
    ) -> BoxFuture<'_, Result<SamplingResult, SamplingError>> {
        Box::pin(async move {
            if !self.is_available() {
                tracing::debug!(
                    "[{}] Client did not advertise sampling; refusing request",
                    self.peer.name()
                );
                return Err(SamplingError::Unavailable);
            }

            let params = serde_json::to_value(&request)
                .map_err(|e| SamplingError::Transport(e.to_string()))?;
            let value = self
                .peer
                .call(methods::SAMPLING_CREATE_MESSAGE, Some(params))
                .await
                .map_err(sampling_error)?;
            serde_json::from_value(value)
                .map_err(|e| SamplingError::Transport(format!("malformed sampling result: {e}")))
        })
    }
}

/// Classify a failed `sampling/createMessage` call.
pub fn sampling_error(error: McpError) -> SamplingError {
    match error {
        McpError::Remote {
            kind: ErrorKind::SamplingUnavailable,
            ..
        } => SamplingError::Unavailable,
        McpError::Remote {
            kind: ErrorKind::UpstreamError,
            message,
            ..
        } => SamplingError::Upstream(message),
        other => SamplingError::Transport(other.to_string()),
    }
}

/// The wire error a client sends back when its sampling handler fails.
pub fn sampling_error_object(error: &SamplingError) -> ErrorObject {
    let kind = match error {
        SamplingError::Unavailable => ErrorKind::SamplingUnavailable,
        SamplingError::Upstream(_) => ErrorKind::UpstreamError,
        SamplingError::Transport(_) => ErrorKind::InternalError,
    };
    let message = match error {
        SamplingError::Upstream(message) => message.clone(),
        other => other.to_string(),
    };
    ErrorObject::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_kinds_classify() {
        let unavailable: McpError =
            ErrorObject::new(ErrorKind::SamplingUnavailable, "no sampler").into();
        assert_eq!(sampling_error(unavailable), SamplingError::Unavailable);

        let upstream: McpError = ErrorObject::new(ErrorKind::UpstreamError, "503 from model").into();
        assert_eq!(
            sampling_error(upstream),
            SamplingError::Upstream("503 from model".into())
        );

        assert!(matches!(
            sampling_error(McpError::ConnectionLost),
            SamplingError::Transport(_)
        ));
    }

    #[test]
    fn upstream_message_survives_the_wire() {
        let object = sampling_error_object(&SamplingError::Upstream("rate limited".into()));
        assert_eq!(object.kind(), ErrorKind::UpstreamError);
        assert_eq!(object.message, "rate limited");
        let back = sampling_error(object.into());
        assert_eq!(back, SamplingError::Upstream("rate limited".into()));
    }
}
