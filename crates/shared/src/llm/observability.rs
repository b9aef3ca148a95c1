use std::time::{Duration, Instant};

use tokio::time::timeout;

use super::{LlmGateway, LlmGatewayError, LlmGatewayRequest, LlmGatewayResponse};

#[derive(Debug, Clone)]
pub struct LlmTelemetryEvent {
    pub provider: &'static str,
    pub outcome: &'static str,
    pub latency_ms: u64,
    pub model: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub error_type: Option<&'static str>,
}

/// Runs one gateway call under `deadline`. An elapsed deadline is reported
/// as `LlmGatewayError::Timeout`; the in-flight request is dropped.
pub async fn generate_with_telemetry(
    llm_gateway: &dyn LlmGateway,
    request: LlmGatewayRequest,
    deadline: Duration,
) -> (
    Result<LlmGatewayResponse, LlmGatewayError>,
    LlmTelemetryEvent,
) {
    let started_at = Instant::now();
    let result = match timeout(deadline, llm_gateway.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmGatewayError::Timeout),
    };
    let telemetry = telemetry_for_result(llm_gateway.provider(), started_at.elapsed(), &result);
    (result, telemetry)
}

fn telemetry_for_result(
    provider: &'static str,
    latency: Duration,
    result: &Result<LlmGatewayResponse, LlmGatewayError>,
) -> LlmTelemetryEvent {
    let latency_ms = duration_to_millis(latency);
    match result {
        Ok(response) => LlmTelemetryEvent {
            provider,
            outcome: "success",
            latency_ms,
            model: Some(response.model.clone()),
            prompt_tokens: response.usage.as_ref().map(|usage| usage.prompt_tokens),
            completion_tokens: response.usage.as_ref().map(|usage| usage.completion_tokens),
            error_type: None,
        },
        Err(err) => LlmTelemetryEvent {
            provider,
            outcome: "failure",
            latency_ms,
            model: None,
            prompt_tokens: None,
            completion_tokens: None,
            error_type: Some(err.kind()),
        },
    }
}

pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
