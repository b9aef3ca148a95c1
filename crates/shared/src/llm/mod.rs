pub mod gateway;
pub mod observability;
pub mod openai_compatible;
pub mod prompts;
pub mod providers;

pub use gateway::{
    ChatMessage, ChatRole, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmGatewayResponse, LlmTokenUsage,
};
pub use observability::{LlmTelemetryEvent, generate_with_telemetry};
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleGateway};
pub use prompts::{build_request, build_system_prompt};
pub use providers::{
    DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_REMOTE_TIMEOUT, ProviderKind, ProviderRanking,
    RemoteModelBudget, RemoteProvider, mask_secret,
};
