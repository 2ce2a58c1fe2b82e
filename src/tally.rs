//! In-memory hit counts per tracked keyword.
//!
//! The tally is the authoritative count for the current run. It is owned by
//! the router and mutated only through [`Tally::increment`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::TallyError;
use crate::keyword::KeywordSet;

/// Keyword to count mapping, ordered by the keyword set.
#[derive(Debug, Clone)]
pub struct Tally {
    keywords: Arc<KeywordSet>,
    /// Keyword to slot in `counts`; duplicates share the first slot.
    slots: HashMap<String, usize>,
    counts: Vec<u64>,
}

impl Tally {
    /// Create a tally with every keyword at zero.
    #[must_use]
    pub fn new(keywords: Arc<KeywordSet>) -> Self {
        let mut slots = HashMap::with_capacity(keywords.len());
        let mut counts = Vec::with_capacity(keywords.len());
        for keyword in keywords.iter() {
            if !slots.contains_key(keyword) {
                slots.insert(keyword.to_string(), counts.len());
                counts.push(0);
            }
        }
        Self {
            keywords,
            slots,
            counts,
        }
    }

    /// The keyword set this tally counts.
    #[must_use]
    pub fn keywords(&self) -> &Arc<KeywordSet> {
        &self.keywords
    }

    /// Add one hit for `keyword` and return the new count.
    pub fn increment(&mut self, keyword: &str) -> Result<u64, TallyError> {
        let slot = self.slot(keyword)?;
        self.counts[slot] += 1;
        Ok(self.counts[slot])
    }

    /// Current count for `keyword`.
    pub fn get(&self, keyword: &str) -> Result<u64, TallyError> {
        Ok(self.counts[self.slot(keyword)?])
    }

    /// Overwrite the count for `keyword`.
    ///
    /// Only used to rehydrate from the store before streaming begins.
    pub fn restore(&mut self, keyword: &str, count: u64) -> Result<(), TallyError> {
        let slot = self.slot(keyword)?;
        self.counts[slot] = count;
        Ok(())
    }

    /// Keyword with the strictly highest count.
    ///
    /// Ties go to the earliest keyword in display order. Returns `None` while
    /// every count is zero.
    #[must_use]
    pub fn winner(&self) -> Option<&str> {
        let mut best: Option<(&str, u64)> = None;
        for keyword in self.keywords.iter() {
            let hits = self.slots.get(keyword).map_or(0, |&slot| self.counts[slot]);
            match best {
                Some((_, top)) if hits <= top => {}
                _ if hits == 0 => {}
                _ => best = Some((keyword, hits)),
            }
        }
        best.map(|(keyword, _)| keyword)
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// `(keyword, count)` pairs in display order, one per distinct keyword.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut out = Vec::with_capacity(self.counts.len());
        let mut seen = vec![false; self.counts.len()];
        for keyword in self.keywords.iter() {
            if let Some(&slot) = self.slots.get(keyword) {
                if !seen[slot] {
                    seen[slot] = true;
                    out.push((keyword.to_string(), self.counts[slot]));
                }
            }
        }
        out
    }

    fn slot(&self, keyword: &str) -> Result<usize, TallyError> {
        self.slots
            .get(keyword)
            .copied()
            .ok_or_else(|| TallyError::UnknownKeyword(keyword.to_string()))
    }
}
