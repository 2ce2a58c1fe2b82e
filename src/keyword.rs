//! The fixed set of tracked keywords.

use crate::error::ConfigurationError;

/// Ordered, immutable collection of tracked keywords.
///
/// Display order is the order the keywords were supplied in. Duplicates are
/// accepted; the first occurrence wins for display and matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSet {
    keywords: Vec<String>,
    longest: usize,
}

impl KeywordSet {
    /// Build a keyword set from caller-supplied strings.
    ///
    /// # Errors
    /// - `EmptyKeywords` if no keyword is supplied
    /// - `EmptyKeyword` if any keyword is the empty string
    pub fn new<I, S>(keywords: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords: Vec<String> = keywords.into_iter().map(Into::into).collect();
        if keywords.is_empty() {
            return Err(ConfigurationError::EmptyKeywords);
        }
        if let Some(index) = keywords.iter().position(String::is_empty) {
            return Err(ConfigurationError::EmptyKeyword { index });
        }

        let longest = keywords
            .iter()
            .map(|k| k.chars().count())
            .max()
            .unwrap_or(0);

        Ok(Self { keywords, longest })
    }

    /// Keywords in display order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.keywords
    }

    /// Iterate keywords in display order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keywords.iter().map(String::as_str)
    }

    /// Number of keywords, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Always false: construction rejects empty sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Case-sensitive exact membership test.
    #[must_use]
    pub fn contains(&self, candidate: &str) -> bool {
        self.keywords.iter().any(|k| k == candidate)
    }

    /// Position of the first occurrence of `keyword` in display order.
    #[must_use]
    pub fn position(&self, keyword: &str) -> Option<usize> {
        self.keywords.iter().position(|k| k == keyword)
    }

    /// Character length of the longest keyword.
    #[must_use]
    pub const fn longest_len(&self) -> usize {
        self.longest
    }

    /// Width of one leaderboard cell.
    #[must_use]
    pub const fn cell_size(&self) -> usize {
        self.longest + 3
    }

    /// Padding on each side of the five-digit counter column.
    #[must_use]
    pub const fn counter_padding(&self) -> usize {
        self.cell_size().saturating_sub(6) / 2
    }

    /// Width of the horizontal table border.
    #[must_use]
    pub const fn border_width(&self) -> usize {
        self.cell_size() * 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_set() {
        let err = KeywordSet::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyKeywords));
    }

    #[test]
    fn test_rejects_empty_keyword() {
        let err = KeywordSet::new(["rust", ""]).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyKeyword { index: 1 }));
    }

    #[test]
    fn test_preserves_order_and_longest() {
        let set = KeywordSet::new(["beta", "alphabet", "go"]).unwrap();
        assert_eq!(set.as_slice(), &["beta", "alphabet", "go"]);
        assert_eq!(set.longest_len(), 8);
        assert_eq!(set.cell_size(), 11);
        assert_eq!(set.counter_padding(), 2);
        assert_eq!(set.border_width(), 23);
    }

    #[test]
    fn test_longest_counts_chars_not_bytes() {
        let set = KeywordSet::new(["café", "ab"]).unwrap();
        assert_eq!(set.longest_len(), 4);
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let set = KeywordSet::new(["Rust"]).unwrap();
        assert!(set.contains("Rust"));
        assert!(!set.contains("rust"));
    }

    #[test]
    fn test_counter_padding_saturates_for_short_keywords() {
        let set = KeywordSet::new(["a"]).unwrap();
        assert_eq!(set.counter_padding(), 0);
    }

    #[test]
    fn test_duplicates_position_is_first() {
        let set = KeywordSet::new(["a", "b", "a"]).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.position("a"), Some(0));
    }
}
