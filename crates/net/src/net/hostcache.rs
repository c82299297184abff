use std::net::SocketAddr;

use super::protocol::HOST_CACHE_SIZE;
use super::udp::{AddrMatch, addr_compare};

/// Longest host or map name kept in the cache.
pub const HOST_NAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCacheEntry {
    pub name: String,
    pub map: String,
    /// Name used to connect to this host.
    pub cname: String,
    pub users: u8,
    pub max_users: u8,
    pub driver: usize,
    pub addr: SocketAddr,
}

impl HostCacheEntry {
    pub fn line(&self) -> String {
        if self.max_users > 0 {
            format!(
                "{:<15} {:<15} {:2}/{:2}",
                self.name, self.map, self.users, self.max_users
            )
        } else {
            format!("{:<15} {:<15}", self.name, self.map)
        }
    }
}

pub fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[derive(Debug, Clone, Default)]
pub struct HostCache {
    entries: Vec<HostCacheEntry>,
}

impl HostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= HOST_CACHE_SIZE
    }

    pub fn entries(&self) -> &[HostCacheEntry] {
        &self.entries
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.entries
            .iter()
            .any(|e| addr_compare(&e.addr, addr) == AddrMatch::Same)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&HostCacheEntry> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Adds a newly discovered host, renaming it until its name is unique.
    /// Returns `false` when the cache is full or the address is known.
    pub fn insert(&mut self, mut entry: HostCacheEntry) -> bool {
        if self.is_full() || self.contains_addr(&entry.addr) {
            return false;
        }
        entry.name = truncate(&entry.name, HOST_NAME_LEN);
        entry.map = truncate(&entry.map, HOST_NAME_LEN);
        while self
            .entries
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(&entry.name))
        {
            bump_name(&mut entry.name);
        }
        self.entries.push(entry);
        true
    }
}

fn bump_name(name: &mut String) {
    let mut bytes = name.clone().into_bytes();
    match bytes.last().copied() {
        None => bytes.push(b'0'),
        Some(last) if bytes.len() < HOST_NAME_LEN && last > b'8' => bytes.push(b'0'),
        Some(last) => {
            let len = bytes.len();
            bytes[len - 1] = last.wrapping_add(1);
        }
    }
    *name = String::from_utf8_lossy(&bytes).into_owned();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, port: u16) -> HostCacheEntry {
        let addr: SocketAddr = format!("10.0.0.1:{}", port).parse().unwrap();
        HostCacheEntry {
            name: name.to_string(),
            map: "e1m1".to_string(),
            cname: addr.to_string(),
            users: 0,
            max_users: 8,
            driver: 0,
            addr,
        }
    }

    #[test]
    fn test_duplicate_address_ignored() {
        let mut cache = HostCache::new();
        assert!(cache.insert(entry("alpha", 26000)));
        assert!(!cache.insert(entry("beta", 26000)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_is_bounded() {
        let mut cache = HostCache::new();
        for i in 0..10 {
            cache.insert(entry(&format!("host{}", i), 26000 + i));
        }
        assert_eq!(cache.len(), HOST_CACHE_SIZE);
        assert!(cache.is_full());
    }

    #[test]
    fn test_name_collisions_get_unique_suffixes() {
        let mut cache = HostCache::new();
        cache.insert(entry("server", 26000));
        cache.insert(entry("server", 26001));
        cache.insert(entry("server", 26002));
        cache.insert(entry("SERVER0", 26003));

        let names: Vec<&str> = cache.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["server", "server0", "server1", "SERVER2"]);
    }

    #[test]
    fn test_digit_suffix_is_incremented() {
        let mut cache = HostCache::new();
        cache.insert(entry("box1", 26000));
        cache.insert(entry("box1", 26001));
        assert_eq!(cache.entries()[1].name, "box2");
    }

    #[test]
    fn test_full_length_name_increments_last_char() {
        let mut cache = HostCache::new();
        cache.insert(entry("abcdefghijklmnoXYZ", 26000));
        cache.insert(entry("abcdefghijklmno", 26001));
        assert_eq!(cache.entries()[0].name, "abcdefghijklmno");
        assert_eq!(cache.entries()[1].name, "abcdefghijklmnp");
    }

    #[test]
    fn test_find_by_name_ignores_case() {
        let mut cache = HostCache::new();
        cache.insert(entry("Arena", 26000));
        assert!(cache.find_by_name("arena").is_some());
        assert!(cache.find_by_name("other").is_none());
    }
}
