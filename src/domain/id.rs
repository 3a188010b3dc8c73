//! Domain ID generation
//!
//! IDs read `{6-char-hex}-{type}-{slug}`, e.g. `019430-plan-camp-2026`.
//! The hex prefix comes from a v7 UUID so ids sort roughly by creation time;
//! the slug keeps logs and status output readable.

/// Longest slug kept in an id; stage labels can run long
const MAX_SLUG_LEN: usize = 40;

/// Generate a domain ID from a type tag and a human-readable source string
pub fn generate_id(domain_type: &str, source: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    format!("{}-{}-{}", hex_prefix, domain_type, slugify(source))
}

fn slugify(source: &str) -> String {
    let slug = source
        .to_lowercase()
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    // Truncate on a hyphen boundary where possible
    if slug.len() <= MAX_SLUG_LEN {
        return slug;
    }
    match slug[..MAX_SLUG_LEN].rfind('-') {
        Some(cut) => slug[..cut].to_string(),
        None => slug[..MAX_SLUG_LEN].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id("plan", "Summer Camp Week 2");
        assert!(id.len() > 10);
        assert!(id.contains("-plan-"));
        assert!(id.contains("summer-camp-week-2"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Rec Center!"), "rec-center");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
        assert_eq!(slugify("kid's swim class"), "kids-swim-class");
    }

    #[test]
    fn test_slug_is_capped() {
        let long = "Resolve the payment barrier for the spring aquatics session at the rec center";
        let slug = slugify(long);
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(slug.starts_with("resolve-the-payment"));
    }
}
