//! Record id generators.
//!
//! A generator produces new record identifiers and validates
//! caller-supplied ones. Whatever the pattern, a generator must always
//! accept exactly the ids it generates itself; constructors verify this
//! self-consistency and refuse to initialize otherwise.

use rand::Rng;
use regex::Regex;
use silo_types::{StorageError, StorageResult};
use uuid::Uuid;

/// Produces and validates opaque record identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce a new identifier. Guaranteed to satisfy [`Self::matches`].
    fn generate(&self) -> String;

    /// Validate a caller-supplied identifier (e.g. on PUT-to-create).
    fn matches(&self, id: &str) -> bool;
}

fn verify_self_match(generator: &dyn IdGenerator, pattern: &str) -> StorageResult<()> {
    let sample = generator.generate();
    if generator.matches(&sample) {
        Ok(())
    } else {
        Err(StorageError::InvalidGeneratorConfig(format!(
            "generated id {sample:?} does not match pattern {pattern:?}"
        )))
    }
}

/// Default generator: 8-4-4-4-12 lowercase hex UUID4 form.
pub struct Uuid4Generator {
    pattern: Regex,
}

const UUID4_PATTERN: &str =
    r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$";

impl Uuid4Generator {
    pub fn new() -> StorageResult<Self> {
        let pattern = Regex::new(UUID4_PATTERN)
            .map_err(|err| StorageError::InvalidGeneratorConfig(err.to_string()))?;
        let generator = Self { pattern };
        verify_self_match(&generator, UUID4_PATTERN)?;
        Ok(generator)
    }
}

impl IdGenerator for Uuid4Generator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn matches(&self, id: &str) -> bool {
        self.pattern.is_match(id)
    }
}

/// Generator for human-readable ids (bucket and collection names).
///
/// Generates short random alphanumeric names; validates against a
/// configurable pattern, by default `^[a-zA-Z0-9][a-zA-Z0-9_-]*$`.
pub struct NameGenerator {
    pattern: Regex,
    source: String,
}

const NAME_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$";
const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const NAME_LENGTH: usize = 8;

impl NameGenerator {
    pub fn new() -> StorageResult<Self> {
        Self::with_pattern(NAME_PATTERN)
    }

    /// Build a generator validating against a custom pattern. Fails with
    /// `InvalidGeneratorConfig` if generated names would not match it.
    pub fn with_pattern(pattern: &str) -> StorageResult<Self> {
        let compiled = Regex::new(pattern)
            .map_err(|err| StorageError::InvalidGeneratorConfig(err.to_string()))?;
        let generator = Self {
            pattern: compiled,
            source: pattern.to_string(),
        };
        verify_self_match(&generator, &generator.source)?;
        Ok(generator)
    }
}

impl IdGenerator for NameGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..NAME_LENGTH)
            .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
            .collect()
    }

    fn matches(&self, id: &str) -> bool {
        self.pattern.is_match(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid4_self_consistency() {
        let generator = Uuid4Generator::new().unwrap();
        for _ in 0..1000 {
            let id = generator.generate();
            assert!(generator.matches(&id), "generated id rejected: {id}");
        }
    }

    #[test]
    fn test_uuid4_rejects_foreign_ids() {
        let generator = Uuid4Generator::new().unwrap();
        assert!(!generator.matches("not-a-uuid"));
        assert!(!generator.matches("ABCDEF01-0000-0000-0000-000000000000")); // uppercase
        assert!(generator.matches("01234567-89ab-4cde-8f01-23456789abcd"));
    }

    #[test]
    fn test_name_generator_self_consistency() {
        let generator = NameGenerator::new().unwrap();
        for _ in 0..1000 {
            assert!(generator.matches(&generator.generate()));
        }
    }

    #[test]
    fn test_name_generator_rejects_leading_separator() {
        let generator = NameGenerator::new().unwrap();
        assert!(!generator.matches("-starts-with-dash"));
        assert!(!generator.matches(""));
        assert!(generator.matches("blog_2024-posts"));
    }

    #[test]
    fn test_custom_pattern_must_accept_generated_names() {
        // Digits-only pattern can never match alphanumeric names.
        let result = NameGenerator::with_pattern(r"^[0-9]+$");
        assert!(matches!(
            result,
            Err(StorageError::InvalidGeneratorConfig(_))
        ));
    }

    #[test]
    fn test_invalid_regex_is_rejected_at_construction() {
        let result = NameGenerator::with_pattern("[unclosed");
        assert!(matches!(
            result,
            Err(StorageError::InvalidGeneratorConfig(_))
        ));
    }
}
