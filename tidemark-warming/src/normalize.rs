//! Route normalization.

use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder substituted for id-like path segments.
pub const ID_PLACEHOLDER: &str = ":id";

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid UUID regex")
});

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").expect("valid ID regex"));

/// Collapse concrete record paths onto their route pattern so
/// `/orders/123` and `/orders/456` aggregate together.
///
/// Query strings and fragments are dropped.
pub fn normalize_route(route: &str) -> String {
    let path = route
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    path.split('/')
        .map(|segment| {
            if UUID_SEGMENT.is_match(segment) || NUMERIC_SEGMENT.is_match(segment) {
                ID_PLACEHOLDER
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
