use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::postgres::PgRow;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    DEFAULT_AI_NAME, DEFAULT_AI_PERSONALITY, MenuCategory, MenuItem, Restaurant,
    default_welcome_message,
};
use crate::tenant::TenantRecord;

use super::{RepositoryFuture, RestaurantRepository, Store, StoreError};

const RESTAURANT_COLUMNS: &str =
    "id, name, subdomain, slug, ai_name, ai_personality, welcome_message, active";

impl Store {
    pub async fn get_restaurant_by_slug(&self, slug: &str) -> Result<Option<Restaurant>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESTAURANT_COLUMNS}
             FROM restaurants
             WHERE slug = $1 AND active = true"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| restaurant_from_row(&row)).transpose()
    }

    pub async fn get_active_tenants(&self) -> Result<Vec<TenantRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT slug, subdomain
             FROM restaurants
             WHERE active = true
             ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TenantRecord, StoreError> {
                Ok(TenantRecord {
                    slug: row.try_get("slug")?,
                    subdomain: row
                        .try_get::<Option<String>, _>("subdomain")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    pub async fn get_active_menu(&self, restaurant_id: Uuid) -> Result<Vec<MenuItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, restaurant_id, name, description, price, category, ingredients,
                    allergens, vegetarian, vegan, gluten_free, spice_level, prep_time,
                    calories, chef_notes, display_order, active
             FROM menu_items
             WHERE restaurant_id = $1 AND active = true
             ORDER BY display_order, category, name",
        )
        .bind(restaurant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(item) = admit_menu_row(restaurant_id, menu_item_from_row(row))? {
                items.push(item);
            }
        }

        Ok(items)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

impl RestaurantRepository for Store {
    fn restaurant_by_slug<'a>(&'a self, slug: &'a str) -> RepositoryFuture<'a, Option<Restaurant>> {
        Box::pin(self.get_restaurant_by_slug(slug))
    }

    fn list_active_tenants(&self) -> RepositoryFuture<'_, Vec<TenantRecord>> {
        Box::pin(self.get_active_tenants())
    }

    fn active_menu(&self, restaurant_id: Uuid) -> RepositoryFuture<'_, Vec<MenuItem>> {
        Box::pin(self.get_active_menu(restaurant_id))
    }

    fn ping(&self) -> RepositoryFuture<'_, ()> {
        Box::pin(Store::ping(self))
    }
}

fn restaurant_from_row(row: &PgRow) -> Result<Restaurant, StoreError> {
    let name: String = row.try_get("name")?;
    let ai_name = non_empty(row.try_get("ai_name")?).unwrap_or_else(|| DEFAULT_AI_NAME.to_string());
    let welcome_message = non_empty(row.try_get("welcome_message")?)
        .unwrap_or_else(|| default_welcome_message(&ai_name, &name));

    Ok(Restaurant {
        id: row.try_get("id")?,
        subdomain: row
            .try_get::<Option<String>, _>("subdomain")?
            .unwrap_or_default(),
        slug: row.try_get("slug")?,
        ai_personality: non_empty(row.try_get("ai_personality")?)
            .unwrap_or_else(|| DEFAULT_AI_PERSONALITY.to_string()),
        ai_name,
        welcome_message,
        name,
        active: row.try_get("active")?,
    })
}

fn menu_item_from_row(row: &PgRow) -> Result<MenuItem, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let category = parse_category(row.try_get("category")?)
        .map_err(|reason| StoreError::InvalidData(format!("menu item {id}: {reason}")))?;
    let spice_level = parse_spice_level(row.try_get("spice_level")?)
        .map_err(|reason| StoreError::InvalidData(format!("menu item {id}: {reason}")))?;
    let price: Decimal = row
        .try_get::<Option<Decimal>, _>("price")?
        .ok_or_else(|| StoreError::InvalidData(format!("menu item {id}: price is null")))?;

    Ok(MenuItem {
        id,
        restaurant_id: row.try_get("restaurant_id")?,
        name: row.try_get("name")?,
        description: row
            .try_get::<Option<String>, _>("description")?
            .unwrap_or_default(),
        price,
        category,
        ingredients: row
            .try_get::<Option<Vec<String>>, _>("ingredients")?
            .unwrap_or_default(),
        allergens: row
            .try_get::<Option<Vec<String>>, _>("allergens")?
            .unwrap_or_default(),
        vegetarian: row.try_get::<Option<bool>, _>("vegetarian")?.unwrap_or(false),
        vegan: row.try_get::<Option<bool>, _>("vegan")?.unwrap_or(false),
        gluten_free: row.try_get::<Option<bool>, _>("gluten_free")?.unwrap_or(false),
        spice_level,
        prep_time: row.try_get("prep_time")?,
        calories: row.try_get("calories")?,
        chef_notes: row.try_get("chef_notes")?,
        display_order: row.try_get::<Option<i32>, _>("display_order")?.unwrap_or(0),
        active: row.try_get("active")?,
    })
}

/// Drops rows that cannot be served. Only database failures propagate.
fn admit_menu_row(
    restaurant_id: Uuid,
    mapped: Result<MenuItem, StoreError>,
) -> Result<Option<MenuItem>, StoreError> {
    let item = match mapped {
        Ok(item) => item,
        Err(StoreError::InvalidData(reason)) => {
            warn!(
                restaurant_id = %restaurant_id,
                "skipping unreadable menu item: {reason}"
            );
            return Ok(None);
        }
        Err(err) => return Err(err),
    };
    if let Err(violation) = item.check_invariants() {
        warn!(
            restaurant_id = %restaurant_id,
            menu_item_id = %item.id,
            "skipping menu item that violates invariants: {violation:?}"
        );
        return Ok(None);
    }
    Ok(Some(item))
}

fn parse_category(raw: Option<String>) -> Result<MenuCategory, String> {
    let raw = raw.unwrap_or_default();
    MenuCategory::parse(&raw).ok_or_else(|| format!("unknown category {raw:?}"))
}

fn parse_spice_level(raw: Option<i32>) -> Result<u8, String> {
    u8::try_from(raw.unwrap_or(0)).map_err(|_| format!("spice_level out of range: {raw:?}"))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{admit_menu_row, parse_category, parse_spice_level};
    use crate::models::{MenuCategory, MenuItem};
    use crate::repos::StoreError;

    fn item(spice_level: u8) -> MenuItem {
        MenuItem {
            id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            name: "Diavola Pizza".to_string(),
            description: String::new(),
            price: Decimal::new(1599, 2),
            category: MenuCategory::Main,
            ingredients: vec![],
            allergens: vec![],
            vegetarian: false,
            vegan: false,
            gluten_free: false,
            spice_level,
            prep_time: None,
            calories: None,
            chef_notes: None,
            display_order: 0,
            active: true,
        }
    }

    #[test]
    fn bad_rows_are_skipped_without_failing_the_menu() {
        let restaurant_id = Uuid::new_v4();
        assert!(matches!(
            admit_menu_row(restaurant_id, Ok(item(4))),
            Ok(Some(_))
        ));
        assert!(matches!(
            admit_menu_row(restaurant_id, Ok(item(6))),
            Ok(None)
        ));
        assert!(matches!(
            admit_menu_row(
                restaurant_id,
                Err(StoreError::InvalidData("spice_level out of range: Some(-1)".to_string()))
            ),
            Ok(None)
        ));
        assert!(matches!(
            admit_menu_row(
                restaurant_id,
                Err(StoreError::Unavailable("connection reset".to_string()))
            ),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn unknown_categories_are_rejected_per_row() {
        assert_eq!(
            parse_category(Some("Desserts".to_string())),
            Ok(MenuCategory::Dessert)
        );
        assert!(parse_category(Some("drinks".to_string())).is_err());
        assert!(parse_category(None).is_err());
    }

    #[test]
    fn negative_or_oversized_spice_levels_are_rejected_per_row() {
        assert_eq!(parse_spice_level(None), Ok(0));
        assert_eq!(parse_spice_level(Some(3)), Ok(3));
        assert!(parse_spice_level(Some(-1)).is_err());
        assert!(parse_spice_level(Some(300)).is_err());
    }
}
