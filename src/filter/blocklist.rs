use std::collections::HashSet;

/// Immutable set of hostnames the proxy refuses to reach.
///
/// Built once from configuration and shared read-only between connection
/// tasks. Entries and lookups are normalised the same way (ASCII lowercase,
/// trailing root dot removed), so `WWW.YouTube.com.` matches `www.youtube.com`.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    hosts: HashSet<String>,
}

impl BlockList {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|h| normalize_host(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        self.hosts.contains(&normalize_host(host))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim();
    host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase()
}
