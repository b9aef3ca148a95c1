use std::collections::HashSet;

use uuid::Uuid;

use crate::models::MenuItem;

/// Upper bound on recommendations attached to one reply.
pub const MAX_RECOMMENDATIONS: usize = 5;

/// Menu items whose name occurs in `text` (case-insensitive), in menu order,
/// capped at [`MAX_RECOMMENDATIONS`]. No match yields an empty list.
pub fn extract_recommendations<'m>(text: &str, menu: &'m [MenuItem]) -> Vec<&'m MenuItem> {
    let haystack = text.to_lowercase();
    menu.iter()
        .filter(|item| mentions_item(&haystack, item))
        .take(MAX_RECOMMENDATIONS)
        .collect()
}

/// Items named in `text` plus explicitly suggested ids, still in menu order
/// and under the same cap.
pub fn merge_recommendations<'m>(
    text: &str,
    suggested: &[Uuid],
    menu: &'m [MenuItem],
) -> Vec<&'m MenuItem> {
    let haystack = text.to_lowercase();
    let suggested = suggested.iter().collect::<HashSet<_>>();
    menu.iter()
        .filter(|item| suggested.contains(&item.id) || mentions_item(&haystack, item))
        .take(MAX_RECOMMENDATIONS)
        .collect()
}

pub(crate) fn mentions_item(lowercase_text: &str, item: &MenuItem) -> bool {
    let name = item.name.trim().to_lowercase();
    !name.is_empty() && lowercase_text.contains(&name)
}
