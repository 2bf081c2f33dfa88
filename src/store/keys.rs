//! Store key layout. Consumers read these keys directly, so the format is fixed:
//! `operator:<slug><_label?>:vehicles:status:<plate>` and
//! `operator:<slug><_label?>:vehicles:gtfsrt:<plate>`.

/// `<slug>` or `<slug>_<label>` when the feed carries a non-empty label.
pub fn namespace(slug: &str, label: Option<&str>) -> String {
    match label.map(str::trim).filter(|l| !l.is_empty()) {
        Some(label) => format!("{slug}_{label}"),
        None => slug.to_string(),
    }
}

pub fn status_key(namespace: &str, plate: &str) -> String {
    format!("operator:{namespace}:vehicles:status:{plate}")
}

pub fn gtfsrt_key(namespace: &str, plate: &str) -> String {
    format!("operator:{namespace}:vehicles:gtfsrt:{plate}")
}

pub fn status_pattern(namespace: &str) -> String {
    format!("operator:{namespace}:vehicles:status:*")
}

pub fn gtfsrt_pattern(namespace: &str) -> String {
    format!("operator:{namespace}:vehicles:gtfsrt:*")
}

/// Plate part of a status key produced by [`status_key`].
pub fn plate_from_status_key(key: &str) -> Option<&str> {
    key.split_once(":vehicles:status:").map(|(_, plate)| plate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_with_and_without_label() {
        assert_eq!(namespace("busitalia", None), "busitalia");
        assert_eq!(namespace("busitalia", Some("urbano")), "busitalia_urbano");
        assert_eq!(namespace("busitalia", Some("  ")), "busitalia");
    }

    #[test]
    fn test_key_formats() {
        let ns = namespace("busitalia", Some("urbano"));
        assert_eq!(status_key(&ns, "P007"), "operator:busitalia_urbano:vehicles:status:P007");
        assert_eq!(gtfsrt_key(&ns, "42"), "operator:busitalia_urbano:vehicles:gtfsrt:42");
        assert_eq!(status_pattern("x"), "operator:x:vehicles:status:*");
        assert_eq!(gtfsrt_pattern("x"), "operator:x:vehicles:gtfsrt:*");
    }

    #[test]
    fn test_plate_from_status_key() {
        assert_eq!(plate_from_status_key("operator:x:vehicles:status:P007"), Some("P007"));
        assert_eq!(plate_from_status_key("operator:x:vehicles:gtfsrt:P007"), None);
    }
}
