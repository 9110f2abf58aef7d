//! Known nicknames, used to recognise addressed messages.

/// Key under which the nickname list is persisted.
pub const NAMES_KEY: &str = "names";

/// Ordered, de-duplicated list of nicknames seen across all channels.
///
/// Mutated only by membership events; every mutator reports whether the list
/// changed so the caller knows when to persist it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameCache {
    names: Vec<String>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from a persisted list, dropping duplicates.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cache = Self::new();
        cache.extend(names);
        cache
    }

    /// Add a nickname. Returns `false` if it was already known.
    pub fn insert(&mut self, nick: impl Into<String>) -> bool {
        let nick = nick.into();
        if nick.is_empty() || self.contains(&nick) {
            return false;
        }
        self.names.push(nick);
        true
    }

    /// Forget a nickname. Returns `false` if it was not known.
    pub fn remove(&mut self, nick: &str) -> bool {
        let before = self.names.len();
        self.names.retain(|name| name != nick);
        self.names.len() != before
    }

    /// Merge a roster, returning how many nicknames were new.
    pub fn extend<I, S>(&mut self, nicks: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for nick in nicks {
            if self.insert(nick) {
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, nick: &str) -> bool {
        self.names.iter().any(|name| name == nick)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
