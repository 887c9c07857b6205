use std::sync::Arc;

use indexmap::IndexMap;

use crate::command::Command;

/// Bounded cache of parsed commands by line index.
///
/// Entries are evicted oldest-inserted first; a lookup does not refresh an
/// entry.
#[derive(Debug)]
pub struct ParseCache {
    capacity: usize,
    entries: IndexMap<u64, Arc<Command>>,
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the capacity, evicting right away when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, line_index: u64) -> bool {
        self.entries.contains_key(&line_index)
    }

    pub fn get(&self, line_index: u64) -> Option<Arc<Command>> {
        self.entries.get(&line_index).cloned()
    }

    /// Caches a command and returns the cached instance for its line.
    ///
    /// A line that is already cached keeps its existing command.
    pub fn insert(&mut self, command: Arc<Command>) -> Arc<Command> {
        if let Some(cached) = self.entries.get(&command.line_index) {
            return Arc::clone(cached);
        }

        self.entries
            .insert(command.line_index, Arc::clone(&command));
        self.evict();
        command
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn command(line_index: u64) -> Arc<Command> {
        Arc::new(parse_line(&format!("G1 X{line_index}"), line_index))
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let mut cache = ParseCache::new(3);
        for line in 0..5 {
            cache.insert(command(line));
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(0));
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(4));
    }

    #[test]
    fn test_lookup_does_not_refresh() {
        let mut cache = ParseCache::new(2);
        cache.insert(command(0));
        cache.insert(command(1));
        assert!(cache.get(0).is_some());

        cache.insert(command(2));
        assert!(cache.get(0).is_none());
        assert!(cache.get(1).is_some());
    }

    #[test]
    fn test_insert_keeps_existing_command() {
        let mut cache = ParseCache::new(4);
        let first = cache.insert(command(7));
        first.set_execute_time_ms(120);

        let second = cache.insert(command(7));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.execute_time_ms(), 120);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shrinking_evicts_immediately() {
        let mut cache = ParseCache::new(10);
        for line in 0..10 {
            cache.insert(command(line));
        }

        cache.set_capacity(4);
        assert_eq!(cache.len(), 4);
        assert!(cache.contains(6));
        assert!(!cache.contains(5));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut cache = ParseCache::new(0);
        let returned = cache.insert(command(1));
        assert_eq!(returned.line_index, 1);
        assert!(cache.is_empty());
    }
}
