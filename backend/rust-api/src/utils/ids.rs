use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

lazy_static! {
    static ref EXTERNAL_ID: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

/// Attempt, survey, question and owner ids.
pub fn is_valid_id(value: &str) -> bool {
    EXTERNAL_ID.is_match(value)
}

/// Session ids are UUIDs issued by this service.
pub fn is_valid_session_id(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_ids() {
        assert!(is_valid_id("attempt-2024_01"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a.b"));
        assert!(!is_valid_id("$where"));
        assert!(!is_valid_id(&"x".repeat(65)));
    }

    #[test]
    fn session_ids() {
        assert!(is_valid_session_id(&Uuid::new_v4().to_string()));
        assert!(!is_valid_session_id("not-a-uuid"));
    }
}
