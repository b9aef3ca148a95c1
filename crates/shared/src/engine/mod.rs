use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::conversation::{ConversationStore, SessionKey};
use crate::llm::observability::duration_to_millis;
use crate::llm::{
    LlmGateway, LlmGatewayRequest, RemoteModelBudget, build_request, build_system_prompt,
    generate_with_telemetry,
};
use crate::models::{ChatReply, ConversationTurn, MenuItem, ResponsePath, Restaurant};

mod extract;
mod fallback;
mod ordering;

pub use extract::{MAX_RECOMMENDATIONS, extract_recommendations, merge_recommendations};
pub use fallback::{FallbackCategory, FallbackReply, fallback_reply};

use ordering::SessionTurnLocks;

/// One chat exchange as seen by the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineInput<'a> {
    pub restaurant: &'a Restaurant,
    pub menu: &'a [MenuItem],
    pub session: &'a SessionKey,
    pub message: &'a str,
}

#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub reply: ChatReply,
    /// The completed turn, already appended to session history unless the
    /// session is anonymous.
    pub turn: ConversationTurn,
}

enum Stage {
    BuildContext,
    TryRemoteModel {
        gateway: Arc<dyn LlmGateway>,
        request: LlmGatewayRequest,
    },
    Fallback,
    ExtractRecommendations {
        text: String,
        path: ResponsePath,
        suggested: Vec<uuid::Uuid>,
    },
}

/// Produces a reply for every well-formed request. A remote-model failure of
/// any kind is recovered by the rule-based fallback; nothing is retried.
pub struct ResponseEngine {
    gateway: Option<Arc<dyn LlmGateway>>,
    budget: RemoteModelBudget,
    conversations: Arc<dyn ConversationStore>,
    session_turns: SessionTurnLocks,
}

impl ResponseEngine {
    pub fn new(
        gateway: Option<Arc<dyn LlmGateway>>,
        budget: RemoteModelBudget,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            gateway,
            budget,
            conversations,
            session_turns: SessionTurnLocks::default(),
        }
    }

    /// `remote:<provider>` when a remote model is configured, else `fallback`.
    pub fn mode_label(&self) -> String {
        match self.gateway.as_ref() {
            Some(gateway) => format!("remote:{}", gateway.provider()),
            None => "fallback".to_string(),
        }
    }

    pub async fn respond(&self, input: EngineInput<'_>) -> EngineOutcome {
        let started_at = Instant::now();
        let session_hash = input.session.hashed();
        let _session_turn = if input.session.keeps_history() {
            Some(self.session_turns.begin(input.session).await)
        } else {
            None
        };
        let mut stage = Stage::BuildContext;

        let (response_text, response_path, recommendations) = loop {
            stage = match stage {
                Stage::BuildContext => match self.gateway.as_ref() {
                    Some(gateway) => {
                        let history = self.load_history(input.session).await;
                        let system_prompt = build_system_prompt(input.restaurant, input.menu);
                        debug!(
                            restaurant_id = %input.restaurant.id,
                            session_hash = %session_hash,
                            history_turns = history.len(),
                            prompt_chars = system_prompt.len(),
                            "built remote model context"
                        );
                        Stage::TryRemoteModel {
                            gateway: Arc::clone(gateway),
                            request: build_request(
                                system_prompt,
                                &history,
                                input.message,
                                &self.budget,
                            ),
                        }
                    }
                    None => Stage::Fallback,
                },
                Stage::TryRemoteModel { gateway, request } => {
                    let (result, telemetry) =
                        generate_with_telemetry(gateway.as_ref(), request, self.budget.timeout)
                            .await;
                    match result {
                        Ok(response) => {
                            debug!(
                                provider = telemetry.provider,
                                outcome = telemetry.outcome,
                                model = telemetry.model.as_deref().unwrap_or_default(),
                                latency_ms = telemetry.latency_ms,
                                prompt_tokens = telemetry.prompt_tokens,
                                completion_tokens = telemetry.completion_tokens,
                                "remote model replied"
                            );
                            Stage::ExtractRecommendations {
                                text: response.content,
                                path: ResponsePath::RemoteModel,
                                suggested: Vec::new(),
                            }
                        }
                        Err(err) => {
                            warn!(
                                provider = telemetry.provider,
                                outcome = telemetry.outcome,
                                error_type = telemetry.error_type.unwrap_or("unknown"),
                                latency_ms = telemetry.latency_ms,
                                restaurant_id = %input.restaurant.id,
                                "remote model failed; answering with fallback: {err}"
                            );
                            Stage::Fallback
                        }
                    }
                }
                Stage::Fallback => {
                    let fallback = fallback_reply(input.restaurant, input.menu, input.message);
                    debug!(
                        restaurant_id = %input.restaurant.id,
                        category = fallback.category.as_str(),
                        "fallback reply selected"
                    );
                    Stage::ExtractRecommendations {
                        text: fallback.text,
                        path: ResponsePath::Fallback,
                        suggested: fallback.suggested,
                    }
                }
                Stage::ExtractRecommendations {
                    text,
                    path,
                    suggested,
                } => {
                    let recommendations = merge_recommendations(&text, &suggested, input.menu)
                        .into_iter()
                        .map(MenuItem::recommendation)
                        .collect::<Vec<_>>();
                    break (text, path, recommendations);
                }
            };
        };

        let turn = ConversationTurn {
            session_id: input.session.session_id().to_string(),
            restaurant_id: input.restaurant.id,
            user_message: input.message.to_string(),
            assistant_response: response_text.clone(),
            response_path,
            latency_ms: duration_to_millis(started_at.elapsed()),
            created_at: Utc::now(),
        };

        if !input.session.keeps_history() {
            debug!(session_hash = %session_hash, "anonymous turn kept out of history");
        } else if let Err(err) = self
            .conversations
            .append_turn(input.session, turn.clone())
            .await
        {
            warn!(
                session_hash = %session_hash,
                backend = self.conversations.name(),
                "failed to append conversation turn: {err}"
            );
        }

        info!(
            restaurant_id = %input.restaurant.id,
            session_hash = %session_hash,
            response_path = response_path.as_str(),
            recommendations = recommendations.len(),
            latency_ms = turn.latency_ms,
            "chat reply ready"
        );

        EngineOutcome {
            reply: ChatReply {
                response_text,
                recommendations,
                response_path,
                restaurant: input.restaurant.summary(),
            },
            turn,
        }
    }

    async fn load_history(&self, session: &SessionKey) -> Vec<ConversationTurn> {
        if !session.keeps_history() {
            return Vec::new();
        }
        match self.conversations.history(session).await {
            Ok(mut history) => {
                let limit = self.conversations.limit();
                if history.len() > limit {
                    history.drain(..history.len() - limit);
                }
                history
            }
            Err(err) => {
                warn!(
                    session_hash = %session.hashed(),
                    backend = self.conversations.name(),
                    "conversation history unavailable; continuing without it: {err}"
                );
                Vec::new()
            }
        }
    }
}
