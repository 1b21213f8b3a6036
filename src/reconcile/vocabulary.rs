//! Working set of canonical tags for one reconciliation batch.

use std::collections::HashMap;

/// A canonical tag name together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: String,
    pub embedding: Vec<f32>,
}

impl Tag {
    pub fn new(name: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            embedding,
        }
    }
}

/// Ordered mapping from tag name to [`Tag`].
///
/// Iteration follows insertion order, which is what makes similarity
/// tie-breaks deterministic. Every name is non-empty and appears at most once.
#[derive(Debug, Default)]
pub struct CanonicalVocabulary {
    tags: Vec<Tag>,
    positions: HashMap<String, usize>,
}

impl CanonicalVocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tags: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
        }
    }

    /// Appends a tag. Returns `false` and leaves the vocabulary untouched when
    /// the name is empty or already present.
    pub fn insert(&mut self, tag: Tag) -> bool {
        if tag.name.is_empty() || self.positions.contains_key(&tag.name) {
            return false;
        }

        self.positions.insert(tag.name.clone(), self.tags.len());
        self.tags.push(tag);
        true
    }

    /// Exact, case-sensitive lookup.
    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }
}
