use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Sorted, de-duplicated set of `key=value` tags attached to a series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSet {
    // SmallVec to avoid allocation for small tag sets (usually < 4)
    tags: SmallVec<[(Arc<str>, Arc<str>); 4]>,
}

impl TagSet {
    /// Builds a tag set from arbitrary pairs. When a key repeats, the last value wins.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut tags: SmallVec<[(Arc<str>, Arc<str>); 4]> = SmallVec::new();
        for (k, v) in pairs {
            let (k, v) = (k.as_ref(), v.as_ref());
            match tags.binary_search_by(|(ek, _)| ek.as_ref().cmp(k)) {
                Ok(idx) => tags[idx].1 = Arc::from(v),
                Err(idx) => tags.insert(idx, (Arc::from(k), Arc::from(v))),
            }
        }
        Self { tags }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tags.iter().map(|(k, v)| (k.as_ref(), v.as_ref()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .binary_search_by(|(k, _)| k.as_ref().cmp(key))
            .ok()
            .map(|idx| self.tags[idx].1.as_ref())
    }

    /// True when every `(key, value)` filter is present in this set.
    pub fn matches(&self, filters: &[(&str, &str)]) -> bool {
        filters.iter().all(|(k, v)| self.get(k) == Some(*v))
    }

    /// Returns a new set with `other` layered on top (keys in `other` win).
    #[must_use]
    pub fn merged(&self, other: &TagSet) -> TagSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        TagSet::from_pairs(self.iter().chain(other.iter()))
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}
