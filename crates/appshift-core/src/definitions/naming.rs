//! Name normalization for definition paths, table names and module matching.

use crate::config::StoreConfig;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a definition directory name.
const MAX_SLUG_LENGTH: usize = 128;

/// Regex for runs of underscores/hyphens.
static CONSECUTIVE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_]{2,}").unwrap());

/// Regex for anything that isn't alphanumeric or underscore.
static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9_]").unwrap());

/// Turn an entity or module name into a filesystem-safe slug.
///
/// # Examples
///
/// ```
/// use appshift::definitions::entity_slug;
///
/// assert_eq!(entity_slug("Invoice Note"), "invoice_note");
/// assert_eq!(entity_slug("Sales Order-Item"), "sales_order_item");
/// ```
pub fn entity_slug(name: &str) -> String {
    let mut result = name.trim().to_lowercase().replace([' ', '-'], "_");
    result = NON_ALNUM.replace_all(&result, "_").to_string();
    result = CONSECUTIVE_SEPARATORS.replace_all(&result, "_").to_string();
    result = result.trim_matches('_').to_string();

    if result.len() > MAX_SLUG_LENGTH {
        result.truncate(MAX_SLUG_LENGTH);
        result = result.trim_end_matches('_').to_string();
    }

    if result.is_empty() {
        result = "unnamed".to_string();
    }

    result
}

/// Backing table name for an entity (`tab<Entity Name>`).
pub fn table_name(entity: &str) -> String {
    format!("{}{}", StoreConfig::TABLE_PREFIX, entity)
}

/// Entity name for a backing table, if the table follows the naming scheme.
pub fn entity_for_table(table: &str) -> Option<&str> {
    table
        .strip_prefix(StoreConfig::TABLE_PREFIX)
        .filter(|rest| !rest.is_empty())
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Pick the module in `candidates` whose name is closest to `module`.
///
/// Exact match wins, then a slug match, then the shortest candidate whose
/// slug starts with (or is a prefix of) the module's slug. Returns `None`
/// when nothing is name-compatible.
pub fn nearest_module<'a>(module: &str, candidates: &'a [String]) -> Option<&'a str> {
    if let Some(exact) = candidates.iter().find(|c| c.as_str() == module) {
        return Some(exact);
    }

    let wanted = entity_slug(module);
    if let Some(slug_match) = candidates.iter().find(|c| entity_slug(c) == wanted) {
        return Some(slug_match);
    }

    candidates
        .iter()
        .filter(|c| {
            let slug = entity_slug(c);
            slug.starts_with(&wanted) || wanted.starts_with(&slug)
        })
        .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
        .map(String::as_str)
}
