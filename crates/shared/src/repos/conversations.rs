use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlx::Row;
use uuid::Uuid;

use crate::models::{ConversationTurn, MessageFrequency, RestaurantStats};

use super::{ConversationLog, RepositoryFuture, StatsWindow, Store, StoreError, TOP_MESSAGES_LIMIT};

impl Store {
    pub async fn insert_conversation_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        let latency_ms = i64::try_from(turn.latency_ms).unwrap_or(i64::MAX);

        sqlx::query(
            "INSERT INTO conversations
                (restaurant_id, session_id, message, response, response_path, latency_ms, timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(turn.restaurant_id)
        .bind(&turn.session_id)
        .bind(&turn.user_message)
        .bind(&turn.assistant_response)
        .bind(turn.response_path.as_str())
        .bind(latency_ms)
        .bind(turn.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_restaurant_stats(
        &self,
        restaurant_id: Uuid,
        window: StatsWindow,
    ) -> Result<RestaurantStats, StoreError> {
        let window_days = i32::try_from(window.days())
            .map_err(|_| StoreError::InvalidData("stats window out of range".to_string()))?;

        let totals = sqlx::query(
            "SELECT COUNT(*) AS total_conversations,
                    COUNT(DISTINCT session_id) AS unique_sessions,
                    COUNT(*) FILTER (WHERE response_path = 'remote_model') AS remote_model_responses,
                    COUNT(*) FILTER (WHERE response_path = 'fallback') AS fallback_responses,
                    AVG(latency_ms)::float8 AS average_latency_ms
             FROM conversations
             WHERE restaurant_id = $1
               AND timestamp > NOW() - make_interval(days => $2)",
        )
        .bind(restaurant_id)
        .bind(window_days)
        .fetch_one(&self.pool)
        .await?;

        let daily_rows = sqlx::query(
            "SELECT DATE(timestamp) AS day, COUNT(*) AS conversations
             FROM conversations
             WHERE restaurant_id = $1
               AND timestamp > NOW() - make_interval(days => $2)
             GROUP BY DATE(timestamp)
             ORDER BY day DESC",
        )
        .bind(restaurant_id)
        .bind(window_days)
        .fetch_all(&self.pool)
        .await?;

        let top_rows = sqlx::query(
            "SELECT LOWER(TRIM(message)) AS normalized_message, COUNT(*) AS occurrences
             FROM conversations
             WHERE restaurant_id = $1
               AND timestamp > NOW() - make_interval(days => $2)
             GROUP BY LOWER(TRIM(message))
             ORDER BY occurrences DESC, normalized_message ASC
             LIMIT $3",
        )
        .bind(restaurant_id)
        .bind(window_days)
        .bind(TOP_MESSAGES_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut daily_conversations = BTreeMap::new();
        for row in &daily_rows {
            let day: NaiveDate = row.try_get("day")?;
            let conversations: i64 = row.try_get("conversations")?;
            daily_conversations.insert(day, conversations);
        }

        let top_messages = top_rows
            .iter()
            .map(|row| -> Result<MessageFrequency, StoreError> {
                Ok(MessageFrequency {
                    message: row.try_get("normalized_message")?,
                    count: row.try_get("occurrences")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RestaurantStats {
            restaurant_id,
            window_days: window.days(),
            total_conversations: totals.try_get("total_conversations")?,
            unique_sessions: totals.try_get("unique_sessions")?,
            remote_model_responses: totals.try_get("remote_model_responses")?,
            fallback_responses: totals.try_get("fallback_responses")?,
            average_latency_ms: totals.try_get("average_latency_ms")?,
            daily_conversations,
            top_messages,
        })
    }
}

impl ConversationLog for Store {
    fn record_turn<'a>(&'a self, turn: &'a ConversationTurn) -> RepositoryFuture<'a, ()> {
        Box::pin(self.insert_conversation_turn(turn))
    }

    fn restaurant_stats(
        &self,
        restaurant_id: Uuid,
        window: StatsWindow,
    ) -> RepositoryFuture<'_, RestaurantStats> {
        Box::pin(self.get_restaurant_stats(restaurant_id, window))
    }
}
