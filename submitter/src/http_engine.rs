use common::{
    wire, Engine, HandoffError, Invocation, LocalEngine, RegistrationResponse, TaskDescriptor,
    TaskError,
};
use reqwest::{blocking::Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Engine que entrega los descriptores al registry por HTTP y ejecuta los
/// envíos en este mismo proceso.
pub struct RegistryEngine {
    base_url: String,
    client: Client,
    local: LocalEngine,
}

impl RegistryEngine {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HandoffError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HandoffError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            local: LocalEngine::new(),
        })
    }

    pub fn submissions(&self, signature: &str) -> u64 {
        self.local.submissions(signature)
    }
}

/// Traduce una respuesta no exitosa del registry.
fn rejection(signature: &str, status: StatusCode, body: &str) -> HandoffError {
    let reason = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    match status {
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => HandoffError::Rejected {
            signature: signature.to_string(),
            reason,
        },
        other => HandoffError::Transport(format!("registry respondió {}: {}", other, reason)),
    }
}

impl Engine for RegistryEngine {
    fn register(&self, descriptor: &TaskDescriptor) -> Result<(), HandoffError> {
        // se valida antes de ir a la red
        wire::validate(descriptor)?;

        let url = format!("{}/api/v1/core-elements", self.base_url);
        let signature = descriptor.canonical_signature();
        debug!("POST {} ({})", url, signature);

        let resp = self
            .client
            .post(&url)
            .json(descriptor)
            .send()
            .map_err(|e| HandoffError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(rejection(signature, status, &body));
        }

        let registered: RegistrationResponse = resp
            .json()
            .map_err(|e| HandoffError::Transport(e.to_string()))?;
        info!(
            "{} entregado al registry (id={}, nuevo={})",
            registered.canonical_signature, registered.registration_id, registered.created
        );
        Ok(())
    }

    fn submit(&self, invocation: Invocation<'_>) -> Result<Value, TaskError> {
        self.local.submit(invocation)
    }
}
