//! Topic derivation from logical message type names.
//!
//! The topic for a typed publish is the type's canonical name: the type
//! path plus, when present, its package qualifier, with version and culture
//! metadata stripped. Topic strings are case-sensitive.

/// Derive the canonical topic for a logical type name.
///
/// `"orders.OrderPlaced"` stays as-is; a qualified name such as
/// `"Orders.OrderPlaced, Orders, Version=1.0.0.0, Culture=neutral"` is
/// reduced to `"Orders.OrderPlaced, Orders"`.
pub fn topic_for_type(type_name: &str) -> String {
    let mut segments = type_name.split(',').map(str::trim);
    let Some(type_path) = segments.next() else {
        return String::new();
    };
    match segments.next().filter(|s| !s.is_empty() && !is_metadata(s)) {
        Some(qualifier) => format!("{type_path}, {qualifier}"),
        None => type_path.to_string(),
    }
}

fn is_metadata(segment: &str) -> bool {
    segment.starts_with("Version=")
        || segment.starts_with("Culture=")
        || segment.starts_with("PublicKeyToken=")
}
