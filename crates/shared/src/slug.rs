//! Human-friendly room slugs
//!
//! Generated slugs are two words (`adjective-noun`). User-chosen slugs are validated
//! against the same shape: lowercase alphanumeric words joined by a single hyphen.

use rand::seq::SliceRandom;

use crate::error::NotexError;

/// Maximum length of a user-chosen slug
pub const MAX_CUSTOM_SLUG_LEN: usize = 50;

const ADJECTIVES: &[&str] = &[
    "able", "amber", "ample", "azure", "bold", "brave", "brief", "bright", "brisk", "calm",
    "clever", "cosmic", "crisp", "curious", "daring", "deep", "eager", "early", "fancy", "fast",
    "fond", "free", "fresh", "gentle", "giant", "glad", "golden", "grand", "happy", "hidden",
    "humble", "jolly", "keen", "kind", "lively", "loyal", "lucky", "mellow", "merry", "mighty",
    "modest", "neat", "noble", "polite", "proud", "quick", "quiet", "rapid", "silent", "sunny",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "bison", "breeze", "brook", "canyon", "cedar", "comet", "coral", "crane",
    "delta", "dune", "eagle", "ember", "falcon", "fern", "fjord", "forest", "fox", "glacier",
    "harbor", "hawk", "heron", "island", "lagoon", "lark", "lynx", "maple", "meadow", "moose",
    "orbit", "otter", "owl", "panda", "pebble", "pine", "prairie", "quartz", "raven", "reef",
    "river", "robin", "sparrow", "spruce", "summit", "tiger", "tundra", "valley", "willow", "wolf",
];

/// Generate a two-word `adjective-noun` slug.
pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
    format!("{adjective}-{noun}")
}

/// Validate a user-provided slug.
///
/// Accepts one or two lowercase alphanumeric words joined by a single hyphen, each word
/// at least two characters long.
pub fn validate_custom_slug(slug: &str) -> Result<(), NotexError> {
    if slug.is_empty() {
        return Err(NotexError::InvalidSlug("slug cannot be empty"));
    }

    if slug.len() > MAX_CUSTOM_SLUG_LEN {
        return Err(NotexError::InvalidSlug("slug too long (max 50 characters)"));
    }

    let words: Vec<&str> = slug.split('-').collect();
    let well_formed = words.iter().all(|word| {
        !word.is_empty()
            && word
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    });
    if !well_formed || words.len() > 2 {
        return Err(NotexError::InvalidSlug(
            "slug must be lowercase alphanumeric with optional single hyphen",
        ));
    }

    if words.iter().any(|word| word.len() < 2) {
        return Err(NotexError::InvalidSlug("each word must be at least 2 characters"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_slug_is_two_words() {
        let slug = generate_slug();
        let words: Vec<&str> = slug.split('-').collect();
        assert_eq!(words.len(), 2, "slug {slug} should have two words");
        assert!(validate_custom_slug(&slug).is_ok(), "generated slug {slug} should validate");
    }

    #[test]
    fn test_generate_slug_uniqueness() {
        let slugs: HashSet<String> = (0..100).map(|_| generate_slug()).collect();
        assert!(
            slugs.len() >= 80,
            "Expected at least 80 unique slugs out of 100, got {}",
            slugs.len()
        );
    }

    #[test]
    fn test_validate_custom_slug() {
        let cases = [
            // Valid cases
            ("single word", "myroom", true),
            ("two words", "my-project", true),
            ("alphanumeric", "team123", true),
            ("two words alphanumeric", "abc-123", true),
            // Invalid cases
            ("empty", "", false),
            (
                "too long",
                "this-is-a-very-long-slug-that-exceeds-the-maximum-allowed-length",
                false,
            ),
            ("three words", "my-team-room", false),
            ("uppercase", "My-Room", false),
            ("underscore", "my_room", false),
            ("double hyphen", "my--room", false),
            ("leading hyphen", "-myroom", false),
            ("trailing hyphen", "myroom-", false),
            ("too short word", "a-b", false),
            ("special chars", "my@room", false),
            ("spaces", "my room", false),
        ];

        for (name, slug, valid) in cases {
            let result = validate_custom_slug(slug);
            assert_eq!(
                result.is_ok(),
                valid,
                "{name}: validate_custom_slug({slug:?}) = {result:?}"
            );
        }
    }

    #[test]
    fn test_validate_custom_slug_messages() {
        assert_eq!(
            validate_custom_slug("a-b").unwrap_err().to_string(),
            "each word must be at least 2 characters"
        );
        assert_eq!(
            validate_custom_slug("").unwrap_err().to_string(),
            "slug cannot be empty"
        );
    }
}
