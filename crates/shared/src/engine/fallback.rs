use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{MenuCategory, MenuItem, Restaurant};

use super::extract::mentions_item;

const FEATURED_ITEMS: usize = 3;
const CATEGORY_SUGGESTIONS: usize = 2;
const HEARTY_MIN_CALORIES: i32 = 350;
const LIGHT_MAX_CALORIES: i32 = 300;
const HEALTHY_MAX_CALORIES: i32 = 400;
const SPICY_MIN_LEVEL: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCategory {
    SpecificItem,
    Dietary,
    Hungry,
    Light,
    Spicy,
    Healthy,
    Dessert,
    Budget,
    Recommendation,
    PriceOverview,
    MenuOverview,
    Greeting,
    Courtesy,
    General,
}

impl FallbackCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpecificItem => "specific_item",
            Self::Dietary => "dietary",
            Self::Hungry => "hungry",
            Self::Light => "light",
            Self::Spicy => "spicy",
            Self::Healthy => "healthy",
            Self::Dessert => "dessert",
            Self::Budget => "budget",
            Self::Recommendation => "recommendation",
            Self::PriceOverview => "price_overview",
            Self::MenuOverview => "menu_overview",
            Self::Greeting => "greeting",
            Self::Courtesy => "courtesy",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackReply {
    pub category: FallbackCategory,
    pub text: String,
    /// Menu items the reply points at, in menu order.
    pub suggested: Vec<Uuid>,
}

/// Rule-based reply built only from the message, the persona and the active
/// menu. Identical input always yields identical output.
pub fn fallback_reply(restaurant: &Restaurant, menu: &[MenuItem], message: &str) -> FallbackReply {
    let keywords = Keywords::new(message);

    if let Some(item) = menu.iter().find(|item| mentions_item(&keywords.lowered, item)) {
        return specific_item_reply(item, &keywords);
    }
    if let Some(reply) = dietary_reply(menu, &keywords) {
        return reply;
    }
    if let Some(reply) = preference_reply(menu, &keywords) {
        return reply;
    }
    if keywords.any_stem(&["recommend", "suggest", "favorite", "favourite", "crav"])
        || keywords.any_word(&["best", "popular", "mood", "special", "specials"])
    {
        let picks = take_ids(menu.iter(), FEATURED_ITEMS);
        let text = if picks.is_empty() {
            "I'd love to recommend something! Our menu is being refreshed, so ask me again in a moment.".to_string()
        } else {
            format!(
                "Guests absolutely love {}. Any of those sound good?",
                join_names(menu, &picks)
            )
        };
        return reply(FallbackCategory::Recommendation, text, picks);
    }
    if keywords.any_stem(&["pric", "cost", "expensive"]) || keywords.phrase("how much") {
        return price_overview_reply(menu);
    }
    if keywords.any_word(&["menu", "dishes", "food", "eat", "order", "available", "serve", "categories", "types"]) {
        return menu_overview_reply(menu, &keywords);
    }
    if keywords.any_word(&["hello", "hi", "hey", "hiya", "howdy", "greetings"])
        || keywords.any_phrase(&["good morning", "good afternoon", "good evening"])
    {
        let variants = [
            format!(
                "Hi! I'm {} from {}. What can I help you find today?",
                restaurant.ai_name, restaurant.name
            ),
            format!(
                "Hello and welcome to {}! I'm {}. Looking for something specific, or shall I suggest a favorite?",
                restaurant.name, restaurant.ai_name
            ),
            format!(
                "Hey there! {} here. Tell me what you're in the mood for and I'll find the perfect dish.",
                restaurant.ai_name
            ),
        ];
        let text = pick_variant(&keywords, &variants);
        return reply(FallbackCategory::Greeting, text, take_ids(menu.iter(), FEATURED_ITEMS));
    }
    if let Some(text) = courtesy_text(&keywords) {
        return reply(FallbackCategory::Courtesy, text, Vec::new());
    }

    let variants = [
        "That's an interesting question! I specialize in our menu, so is there anything delicious I can help you find?".to_string(),
        "I'm here to help you navigate our menu. What kind of flavors are you craving today?".to_string(),
        "I'd love to help you find something amazing to eat. Are you after a particular kind of dish?".to_string(),
    ];
    reply(FallbackCategory::General, pick_variant(&keywords, &variants), Vec::new())
}

fn specific_item_reply(item: &MenuItem, keywords: &Keywords) -> FallbackReply {
    let mut text = format!("Great choice! Our {}", item.name);
    let description = item.description.trim().trim_end_matches('.');
    if description.is_empty() {
        text.push('.');
    } else {
        text.push_str(&format!(" is {description}."));
    }
    text.push_str(&format!(" It's priced at ${:.2}.", item.price));

    if keywords.stem("ingredient") && !item.ingredients.is_empty() {
        text.push_str(&format!(
            " The main ingredients are: {}.",
            item.ingredients.join(", ")
        ));
    }
    if keywords.stem("allerg") {
        if item.allergens.is_empty() {
            text.push_str(" This dish has no major allergens.");
        } else {
            text.push_str(&format!(
                " Please note it contains: {}.",
                item.allergens.join(", ")
            ));
        }
    }
    if keywords.any_word(&["spicy", "hot", "heat"]) {
        text.push_str(&format!(" The spice level is {} out of 5.", item.spice_level));
    }
    if keywords.any_word(&["time", "long", "wait", "quick"])
        && let Some(prep_time) = item.prep_time.as_deref()
    {
        text.push_str(&format!(" Preparation time is about {prep_time}."));
    }
    if keywords.stem("calor")
        && let Some(calories) = item.calories
    {
        text.push_str(&format!(" It has about {calories} calories."));
    }
    if keywords.stem("vegetarian") {
        text.push_str(if item.vegetarian {
            " It is vegetarian."
        } else {
            " It is not vegetarian."
        });
    }
    if keywords.stem("vegan") {
        text.push_str(if item.vegan { " It is vegan." } else { " It is not vegan." });
    }
    if keywords.stem("gluten") {
        text.push_str(if item.gluten_free {
            " It is gluten-free."
        } else {
            " It contains gluten."
        });
    }

    reply(FallbackCategory::SpecificItem, text, vec![item.id])
}

fn dietary_reply(menu: &[MenuItem], keywords: &Keywords) -> Option<FallbackReply> {
    let (label, matches): (&str, Vec<&MenuItem>) =
        if keywords.stem("vegetarian") || keywords.any_word(&["veggie", "meatless"]) {
            ("vegetarian", menu.iter().filter(|item| item.vegetarian).collect())
        } else if keywords.stem("vegan") || keywords.phrase("plant based") {
            ("vegan", menu.iter().filter(|item| item.vegan).collect())
        } else if keywords.stem("gluten") || keywords.any_word(&["celiac", "coeliac"]) {
            ("gluten-free", menu.iter().filter(|item| item.gluten_free).collect())
        } else if keywords.stem("allerg")
            || keywords.any_word(&["dairy", "nut", "nuts", "peanut", "peanuts", "lactose"])
        {
            let picks = take_ids(menu.iter().filter(|item| item.allergens.is_empty()), CATEGORY_SUGGESTIONS);
            let mut text = "I'd be happy to help with dietary needs! We accommodate vegetarian, vegan, and gluten-free diets, and every dish lists its allergens.".to_string();
            if !picks.is_empty() {
                text.push_str(&format!(" Free of major allergens: {}.", join_names(menu, &picks)));
            }
            return Some(reply(FallbackCategory::Dietary, text, picks));
        } else {
            return None;
        };

    if matches.is_empty() {
        return Some(reply(
            FallbackCategory::Dietary,
            format!(
                "I'm sorry, we don't have {label} dishes on the menu right now. Our team is happy to suggest adjustments!"
            ),
            Vec::new(),
        ));
    }

    let budget = keywords.wants_budget();
    let picks = if budget {
        cheapest_ids(matches.iter().copied(), CATEGORY_SUGGESTIONS)
    } else {
        take_ids(matches.iter().copied(), CATEGORY_SUGGESTIONS)
    };
    let count = matches.len();
    let plural = if count == 1 { "option" } else { "options" };
    let lead = if budget {
        "For great value, I recommend"
    } else {
        "I especially recommend"
    };
    let text = format!(
        "We have {count} delicious {label} {plural}! {lead} {}.",
        join_names(menu, &picks)
    );
    Some(reply(FallbackCategory::Dietary, text, picks))
}

fn preference_reply(menu: &[MenuItem], keywords: &Keywords) -> Option<FallbackReply> {
    let (category, picks, text) = if keywords.any_word(&["light", "small", "snack", "peckish"])
        || keywords.phrase("not very hungry")
    {
        (
            FallbackCategory::Light,
            take_ids(
                menu.iter().filter(|item| {
                    item.category == MenuCategory::Appetizer
                        || item.calories.is_some_and(|calories| calories < LIGHT_MAX_CALORIES)
                }),
                CATEGORY_SUGGESTIONS,
            ),
            "For something light, our appetizers are perfect",
        )
    } else if keywords.any_word(&["hungry", "starving", "filling", "hearty", "famished"]) {
        (
            FallbackCategory::Hungry,
            take_ids(
                menu.iter().filter(|item| {
                    item.category == MenuCategory::Main
                        && item
                            .calories
                            .is_none_or(|calories| calories > HEARTY_MIN_CALORIES)
                }),
                CATEGORY_SUGGESTIONS,
            ),
            "You sound really hungry! Our hearty mains will satisfy that appetite",
        )
    } else if keywords.any_word(&["spicy", "hot", "heat", "kick"]) {
        (
            FallbackCategory::Spicy,
            take_ids(
                menu.iter().filter(|item| item.spice_level > SPICY_MIN_LEVEL),
                CATEGORY_SUGGESTIONS,
            ),
            "Looking for some heat? These will give you that kick",
        )
    } else if keywords.any_word(&["healthy", "nutritious", "diet", "lean"]) {
        (
            FallbackCategory::Healthy,
            take_ids(
                menu.iter().filter(|item| {
                    item.gluten_free
                        || item.calories.is_some_and(|calories| calories < HEALTHY_MAX_CALORIES)
                }),
                CATEGORY_SUGGESTIONS,
            ),
            "For healthy choices, these are delicious and good for you",
        )
    } else if keywords.any_stem(&["dessert", "sweet"]) {
        (
            FallbackCategory::Dessert,
            take_ids(
                menu.iter().filter(|item| item.category == MenuCategory::Dessert),
                CATEGORY_SUGGESTIONS,
            ),
            "Our desserts are divine, the perfect sweet ending",
        )
    } else if keywords.wants_budget() {
        (
            FallbackCategory::Budget,
            cheapest_ids(menu.iter(), CATEGORY_SUGGESTIONS),
            "Great taste doesn't have to cost much. Our best value picks are",
        )
    } else {
        return None;
    };

    let text = if picks.is_empty() {
        format!("{text}, but nothing on today's menu quite fits. Want me to suggest something else?")
    } else {
        format!("{text}: {}.", join_names(menu, &picks))
    };
    Some(reply(category, text, picks))
}

fn price_overview_reply(menu: &[MenuItem]) -> FallbackReply {
    let lowest = menu.iter().map(|item| item.price).min();
    let highest = menu.iter().map(|item| item.price).max();
    let text = match (lowest, highest) {
        (Some(lowest), Some(highest)) => format!(
            "Our menu prices range from ${lowest:.2} to ${highest:.2}. What's your budget today?"
        ),
        _ => "Our menu is being updated right now, so I don't have prices handy.".to_string(),
    };
    reply(
        FallbackCategory::PriceOverview,
        text,
        cheapest_ids(menu.iter(), CATEGORY_SUGGESTIONS),
    )
}

fn menu_overview_reply(menu: &[MenuItem], keywords: &Keywords) -> FallbackReply {
    let mut categories = Vec::new();
    for item in menu {
        if !categories.contains(&item.category) {
            categories.push(item.category);
        }
    }
    let category_labels = categories
        .iter()
        .map(|category| category_label(*category))
        .collect::<Vec<_>>()
        .join(", ");

    let text = if menu.is_empty() {
        "Our menu is being updated right now. Check back in a moment!".to_string()
    } else if keywords.any_word(&["categories", "types"]) {
        format!(
            "We offer {category_labels}, with {} dishes in total. Want to explore one of them?",
            menu.len()
        )
    } else {
        format!(
            "Our menu features {} carefully crafted dishes across {category_labels}. What are you in the mood for?",
            menu.len()
        )
    };
    reply(
        FallbackCategory::MenuOverview,
        text,
        take_ids(menu.iter(), FEATURED_ITEMS),
    )
}

fn courtesy_text(keywords: &Keywords) -> Option<String> {
    let variants: [&str; 2] = if keywords.any_phrase(&["how are you", "how do you do"]) {
        [
            "I'm doing great, thanks for asking! What sounds good to you today?",
            "I'm wonderful, thanks! Ready to help you discover your next favorite dish.",
        ]
    } else if keywords.any_word(&["thanks", "thx", "cheers"]) || keywords.phrase("thank you") {
        [
            "You're very welcome! Anything else I can help you with?",
            "My pleasure! Is there anything else you'd like to know?",
        ]
    } else if keywords.any_word(&["bye", "goodbye"]) || keywords.phrase("see you") {
        [
            "Goodbye! I hope you enjoy your meal. Come back anytime!",
            "Have a fantastic meal! See you next time!",
        ]
    } else {
        return None;
    };
    Some(pick_variant(keywords, &variants.map(str::to_string)))
}

fn category_label(category: MenuCategory) -> &'static str {
    match category {
        MenuCategory::Appetizer => "appetizers",
        MenuCategory::Main => "mains",
        MenuCategory::Dessert => "desserts",
    }
}

fn reply(category: FallbackCategory, text: String, suggested: Vec<Uuid>) -> FallbackReply {
    FallbackReply {
        category,
        text,
        suggested,
    }
}

fn take_ids<'m>(items: impl Iterator<Item = &'m MenuItem>, limit: usize) -> Vec<Uuid> {
    items.take(limit).map(|item| item.id).collect()
}

/// The `limit` lowest-priced items, returned in menu order.
fn cheapest_ids<'m>(items: impl Iterator<Item = &'m MenuItem>, limit: usize) -> Vec<Uuid> {
    let items = items.collect::<Vec<_>>();
    let mut by_price = items.clone();
    by_price.sort_by_key(|item| item.price);
    let chosen = take_ids(by_price.into_iter(), limit);
    items
        .into_iter()
        .filter(|item| chosen.contains(&item.id))
        .map(|item| item.id)
        .collect()
}

/// Names of `ids` in menu order, joined for prose.
fn join_names(menu: &[MenuItem], ids: &[Uuid]) -> String {
    let names = menu
        .iter()
        .filter(|item| ids.contains(&item.id))
        .map(|item| item.name.as_str())
        .collect::<Vec<_>>();
    match names.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn pick_variant(keywords: &Keywords, variants: &[String]) -> String {
    if variants.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(keywords.normalized.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let index = u64::from_be_bytes(prefix) % variants.len() as u64;
    variants[index as usize].clone()
}

struct Keywords {
    lowered: String,
    normalized: String,
    padded: String,
    words: Vec<String>,
}

impl Keywords {
    fn new(message: &str) -> Self {
        let lowered = message.to_lowercase();
        let words = lowered
            .split(|ch: char| !ch.is_alphanumeric() && ch != '\'')
            .map(|word| word.trim_matches('\''))
            .filter(|word| !word.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let normalized = words.join(" ");
        let padded = format!(" {normalized} ");
        Self {
            lowered,
            normalized,
            padded,
            words,
        }
    }

    fn word(&self, candidate: &str) -> bool {
        self.words.iter().any(|word| word == candidate)
    }

    fn any_word(&self, candidates: &[&str]) -> bool {
        candidates.iter().any(|candidate| self.word(candidate))
    }

    fn stem(&self, stem: &str) -> bool {
        self.words.iter().any(|word| word.starts_with(stem))
    }

    fn any_stem(&self, stems: &[&str]) -> bool {
        stems.iter().any(|stem| self.stem(stem))
    }

    fn phrase(&self, phrase: &str) -> bool {
        self.padded.contains(&format!(" {phrase} "))
    }

    fn any_phrase(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|phrase| self.phrase(phrase))
    }

    fn wants_budget(&self) -> bool {
        self.any_word(&["cheap", "cheapest", "budget", "affordable", "inexpensive", "value"])
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{FallbackCategory, fallback_reply};
    use crate::models::{MenuCategory, MenuItem, Restaurant};

    fn luigi() -> Restaurant {
        Restaurant {
            id: Uuid::new_v4(),
            subdomain: "luigi".to_string(),
            slug: "luigi".to_string(),
            name: "Luigi's".to_string(),
            ai_name: "Sophie".to_string(),
            ai_personality: "friendly and helpful".to_string(),
            welcome_message: String::new(),
            active: true,
        }
    }

    fn item(
        name: &str,
        cents: i64,
        category: MenuCategory,
        vegetarian: bool,
        spice_level: u8,
        calories: Option<i32>,
        display_order: i32,
    ) -> MenuItem {
        MenuItem {
            id: Uuid::new_v4(),
            restaurant_id: Uuid::nil(),
            name: name.to_string(),
            description: format!("House {name}."),
            price: Decimal::new(cents, 2),
            category,
            ingredients: vec!["tomato".to_string(), "basil".to_string()],
            allergens: vec![],
            vegetarian,
            vegan: false,
            gluten_free: false,
            spice_level,
            prep_time: Some("15 minutes".to_string()),
            calories,
            chef_notes: None,
            display_order,
            active: true,
        }
    }

    fn menu() -> Vec<MenuItem> {
        vec![
            item("Bruschetta", 899, MenuCategory::Appetizer, true, 0, Some(250), 1),
            item("Margherita Pizza", 1299, MenuCategory::Main, true, 0, Some(820), 2),
            item("Diavola Pizza", 1599, MenuCategory::Main, false, 4, Some(900), 3),
            item("Tiramisu", 799, MenuCategory::Dessert, true, 0, Some(450), 4),
        ]
    }

    #[test]
    fn vegetarian_and_cheap_prefers_lowest_priced_vegetarian_items() {
        let menu = menu();
        let reply = fallback_reply(&luigi(), &menu, "I want something vegetarian and cheap");

        assert_eq!(reply.category, FallbackCategory::Dietary);
        assert!(reply.text.contains("vegetarian"));
        assert!(reply.text.starts_with("We have 3 delicious vegetarian options!"));
        assert_eq!(reply.suggested, vec![menu[0].id, menu[3].id]);
    }

    #[test]
    fn word_matching_does_not_fire_on_fragments() {
        let menu = menu();
        let reply = fallback_reply(&luigi(), &menu, "something with a kick");
        assert_eq!(reply.category, FallbackCategory::Spicy);
        assert_eq!(reply.suggested, vec![menu[2].id]);
    }

    #[test]
    fn named_item_gets_details_on_request() {
        let menu = menu();
        let reply = fallback_reply(&luigi(), &menu, "What are the ingredients in the margherita pizza?");
        assert_eq!(reply.category, FallbackCategory::SpecificItem);
        assert!(reply.text.contains("Great choice! Our Margherita Pizza is House Margherita Pizza."));
        assert!(reply.text.contains("$12.99"));
        assert!(reply.text.contains("tomato, basil"));
        assert_eq!(reply.suggested, vec![menu[1].id]);
    }

    #[test]
    fn identical_messages_yield_identical_replies() {
        let menu = menu();
        let restaurant = luigi();
        let first = fallback_reply(&restaurant, &menu, "Hello there");
        let second = fallback_reply(&restaurant, &menu, "hello   THERE!");
        assert_eq!(first, second);
        assert_eq!(first.category, FallbackCategory::Greeting);
    }

    #[test]
    fn price_question_reports_menu_range() {
        let reply = fallback_reply(&luigi(), &menu(), "How much do things cost?");
        assert_eq!(reply.category, FallbackCategory::PriceOverview);
        assert!(reply.text.contains("$7.99 to $15.99"));
    }

    #[test]
    fn empty_menu_still_answers() {
        for message in ["hi", "something spicy", "vegan please", "menu?", "what's the weather"] {
            let reply = fallback_reply(&luigi(), &[], message);
            assert!(!reply.text.is_empty(), "empty reply for {message}");
            assert!(reply.suggested.is_empty());
        }
    }
}
