//! Field-order-stable item text.
//!
//! Items are embedded from a single string built from their indexed fields.
//! The order (title, game, category, description, tags) is fixed so that two
//! writers holding the same fields always produce the same text and hence
//! the same cache key, whatever order the fields arrived in.

/// Borrowed view of the indexed text fields of one item.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemFields<'a> {
    pub title: &'a str,
    pub game: Option<&'a str>,
    pub category: Option<&'a str>,
    pub description: Option<&'a str>,
    pub tags: &'a [String],
}

/// Compose the embedding text for an item.
///
/// Blank fields are skipped. Tags are trimmed, deduplicated and sorted so
/// tag order never changes the result.
///
/// ```rust
/// use canonical::{compose_item_text, ItemFields};
///
/// let tags = vec!["ace".to_string(), "clutch".to_string()];
/// let text = compose_item_text(&ItemFields {
///     title: "Insane 1v5 ace",
///     game: Some("Valorant"),
///     tags: &tags,
///     ..Default::default()
/// });
/// assert_eq!(text, "Title: Insane 1v5 ace. Game: Valorant. Tags: ace, clutch");
/// ```
pub fn compose_item_text(fields: &ItemFields<'_>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(5);

    push_part(&mut parts, "Title", Some(fields.title));
    push_part(&mut parts, "Game", fields.game);
    push_part(&mut parts, "Category", fields.category);
    push_part(&mut parts, "Description", fields.description);

    let mut tags: Vec<&str> = fields
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort_unstable();
    tags.dedup();
    if !tags.is_empty() {
        parts.push(format!("Tags: {}", tags.join(", ")));
    }

    parts.join(". ")
}

fn push_part(parts: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        parts.push(format!("{label}: {value}"));
    }
}
