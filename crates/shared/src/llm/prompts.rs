use std::fmt::Write as _;

use crate::models::{ConversationTurn, MenuItem, Restaurant};

use super::gateway::{ChatMessage, LlmGatewayRequest};
use super::providers::RemoteModelBudget;

const GUIDELINES: &[&str] = &[
    "Be warm and engaging but keep responses concise (10-20 words typically)",
    "Only mention prices when specifically asked",
    "Make personalized recommendations based on preferences",
    "Refer to dishes by their exact menu name",
    "Use emojis occasionally for warmth",
];

/// System instruction carrying the tenant persona and a condensed view of
/// the active menu.
pub fn build_system_prompt(restaurant: &Restaurant, menu: &[MenuItem]) -> String {
    let mut prompt = format!(
        "You are {}, the AI assistant for {}.\nYou are {}.\n\nRESTAURANT MENU:\n",
        restaurant.ai_name, restaurant.name, restaurant.ai_personality
    );

    if menu.is_empty() {
        prompt.push_str("- (the menu is being updated; offer to help with general questions)\n");
    }
    for item in menu {
        prompt.push_str(&menu_line(item));
        prompt.push('\n');
    }

    prompt.push_str("\nGUIDELINES:\n");
    for guideline in GUIDELINES {
        let _ = writeln!(prompt, "- {guideline}");
    }
    let _ = writeln!(prompt, "- Always stay in character for {}", restaurant.name);
    prompt
}

/// Prior turns are replayed as alternating user/assistant messages ahead of
/// the new user message.
pub fn build_request(
    system_prompt: String,
    history: &[ConversationTurn],
    message: &str,
    budget: &RemoteModelBudget,
) -> LlmGatewayRequest {
    let mut messages = Vec::with_capacity(history.len() * 2 + 1);
    for turn in history {
        messages.push(ChatMessage::user(turn.user_message.clone()));
        messages.push(ChatMessage::assistant(turn.assistant_response.clone()));
    }
    messages.push(ChatMessage::user(message));

    LlmGatewayRequest {
        system_prompt,
        messages,
        max_output_tokens: budget.max_output_tokens,
        temperature: budget.temperature,
    }
}

fn menu_line(item: &MenuItem) -> String {
    let mut line = format!(
        "- {}: {} (${:.2}) [Category: {}, Vegetarian: {}, Vegan: {}, Gluten-free: {}, Spice: {}/5",
        item.name,
        item.description,
        item.price,
        item.category.as_str(),
        yes_no(item.vegetarian),
        yes_no(item.vegan),
        yes_no(item.gluten_free),
        item.spice_level,
    );
    if let Some(calories) = item.calories {
        let _ = write!(line, ", Calories: {calories}");
    }
    line.push(']');
    line
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}
