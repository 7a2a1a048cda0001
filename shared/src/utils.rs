//! Naming and JSON helpers used throughout the engine.

use serde_json::Value;

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
    ("mouse", "mice"),
    ("datum", "data"),
];

const UNCOUNTABLE: &[&str] = &["news", "series", "species", "status", "metadata", "information"];

/// `status`, `campus`, `bus`: `-us` after a consonant. `house` and `cause`
/// keep their `e`.
fn latin_us_stem(stem: &str) -> bool {
    stem.strip_suffix("us")
        .is_some_and(|head| head.chars().last().is_some_and(|c| !"aeiou".contains(c)))
}

/// Singular form of an English noun. Total and deterministic: a name that
/// matches no rule is returned unchanged, and the result is never empty for
/// a non-empty input.
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == lower) {
        return (*singular).to_string();
    }
    let stem = if let Some(s) = word.strip_suffix("ies").filter(|s| s.len() > 1) {
        format!("{s}y")
    } else if let Some(s) = word
        .strip_suffix("es")
        .filter(|s| latin_us_stem(s) || UNCOUNTABLE.contains(&s.to_lowercase().as_str()))
    {
        s.to_string()
    } else if ["sses", "shes", "ches", "xes", "zes"].iter().any(|suf| word.ends_with(suf)) {
        word[..word.len() - 2].to_string()
    } else if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        word.to_string()
    } else if let Some(s) = word.strip_suffix('s') {
        s.to_string()
    } else {
        word.to_string()
    };
    if stem.is_empty() {
        word.to_string()
    } else {
        stem
    }
}

/// Plural form of an English noun, the inverse of [`singularize`] for the
/// regular cases.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    if UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }
    let vowel_before_y = word
        .chars()
        .rev()
        .nth(1)
        .map(|c| "aeiou".contains(c))
        .unwrap_or(false);
    if word.ends_with('y') && !vowel_before_y && word.len() > 1 {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|suf| word.ends_with(suf)) {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

/// Walks a dotted path (`a.b.0.c`) into a JSON value. An empty path returns
/// the value itself; array segments must be numeric indices.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn singular_forms() {
        assert_eq!(singularize("comments"), "comment");
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("addresses"), "address");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("author"), "author");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("campuses"), "campus");
        assert_eq!(singularize("buses"), "bus");
        assert_eq!(singularize("houses"), "house");
        assert_eq!(singularize("s"), "s");
        assert_eq!(singularize("ies"), "ie");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(pluralize("post"), "posts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("person"), "people");
    }

    #[test]
    fn path_lookup() {
        let v = json!({"config": {"softDelete": true}, "items": [{"id": 7}]});
        assert_eq!(lookup_path(&v, "config.softDelete"), Some(&json!(true)));
        assert_eq!(lookup_path(&v, "items.0.id"), Some(&json!(7)));
        assert_eq!(lookup_path(&v, ""), Some(&v));
        assert_eq!(lookup_path(&v, "config.missing"), None);
    }
}
