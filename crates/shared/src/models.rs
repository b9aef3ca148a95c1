use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_AI_NAME: &str = "Sophie";
pub const DEFAULT_AI_PERSONALITY: &str = "friendly and helpful";
pub const MAX_SPICE_LEVEL: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Uuid,
    pub subdomain: String,
    pub slug: String,
    pub name: String,
    pub ai_name: String,
    pub ai_personality: String,
    pub welcome_message: String,
    pub active: bool,
}

impl Restaurant {
    pub fn summary(&self) -> RestaurantSummary {
        RestaurantSummary {
            id: self.id,
            slug: self.slug.clone(),
            name: self.name.clone(),
            ai_name: self.ai_name.clone(),
        }
    }
}

/// Greeting used when a restaurant row carries no welcome message of its own.
pub fn default_welcome_message(ai_name: &str, restaurant_name: &str) -> String {
    format!("Hi! I'm {ai_name} from {restaurant_name}. What can I help you find today?")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuCategory {
    Appetizer,
    Main,
    Dessert,
}

impl MenuCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Appetizer => "appetizer",
            Self::Main => "main",
            Self::Dessert => "dessert",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "appetizer" | "appetizers" | "starter" => Some(Self::Appetizer),
            "main" | "mains" | "entree" => Some(Self::Main),
            "dessert" | "desserts" => Some(Self::Dessert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: MenuCategory,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
    pub vegetarian: bool,
    pub vegan: bool,
    pub gluten_free: bool,
    pub spice_level: u8,
    pub prep_time: Option<String>,
    pub calories: Option<i32>,
    pub chef_notes: Option<String>,
    pub display_order: i32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuItemViolation {
    SpiceLevelOutOfRange(u8),
    NonPositivePrice,
}

impl MenuItem {
    pub fn check_invariants(&self) -> Result<(), MenuItemViolation> {
        if self.spice_level > MAX_SPICE_LEVEL {
            return Err(MenuItemViolation::SpiceLevelOutOfRange(self.spice_level));
        }
        if self.price <= Decimal::ZERO {
            return Err(MenuItemViolation::NonPositivePrice);
        }
        Ok(())
    }

    pub fn recommendation(&self) -> Recommendation {
        Recommendation {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            category: self.category,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePath {
    RemoteModel,
    Fallback,
}

impl ResponsePath {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteModel => "remote_model",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub session_id: String,
    pub restaurant_id: Uuid,
    pub user_message: String,
    pub assistant_response: String,
    pub response_path: ResponsePath,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: MenuCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestaurantSummary {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub ai_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response_text: String,
    pub recommendations: Vec<Recommendation>,
    pub response_path: ResponsePath,
    pub restaurant: RestaurantSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantStats {
    pub restaurant_id: Uuid,
    pub window_days: u32,
    pub total_conversations: i64,
    pub unique_sessions: i64,
    pub remote_model_responses: i64,
    pub fallback_responses: i64,
    pub average_latency_ms: Option<f64>,
    pub daily_conversations: BTreeMap<NaiveDate, i64>,
    pub top_messages: Vec<MessageFrequency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrequency {
    pub message: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub restaurant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub recommendations: Vec<Recommendation>,
    pub response_path: ResponsePath,
    pub restaurant: RestaurantSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuResponse {
    pub restaurant: RestaurantSummary,
    pub items: Vec<MenuItem>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantInfoResponse {
    pub restaurant: RestaurantSummary,
    pub welcome_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub stats: RestaurantStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub database: String,
    pub cache: String,
    pub ai: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
