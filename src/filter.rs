use crate::models::HostEntry;

/// Case-insensitive pattern match.
///
/// A pattern without `*` matches anywhere in `text`. With `*`, the pattern
/// is anchored at both ends and each `*` stands for any run of characters.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();

    if !pattern.contains('*') {
        return text.contains(&pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remaining) = text.strip_prefix(first) else {
        return false;
    };

    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle.iter().filter(|p| !p.is_empty()) {
        match remaining.find(part) {
            Some(at) => remaining = &remaining[at + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

/// A parsed host filter such as `tag:prod host:10.* web`.
///
/// Supported keys are `tag:`, `host:`, `name:` and `user:`. A bare token
/// matches the name. Every token must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFilter {
    names: Vec<String>,
    hosts: Vec<String>,
    users: Vec<String>,
    tags: Vec<String>,
}

impl HostFilter {
    pub fn parse(expr: &str) -> Self {
        let mut filter = Self::default();
        for token in expr.split_whitespace() {
            if let Some(rest) = token.strip_prefix("name:") {
                filter.names.push(rest.to_string());
            } else if let Some(rest) = token.strip_prefix("host:") {
                filter.hosts.push(rest.to_string());
            } else if let Some(rest) = token.strip_prefix("user:") {
                filter.users.push(rest.to_string());
            } else if let Some(rest) = token.strip_prefix("tag:") {
                filter.tags.push(rest.to_string());
            } else {
                filter.names.push(token.to_string());
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.hosts.is_empty() && self.users.is_empty() && self.tags.is_empty()
    }

    pub fn matches(&self, entry: &HostEntry) -> bool {
        self.names.iter().all(|p| wildcard_match(p, &entry.name))
            && self.hosts.iter().all(|p| wildcard_match(p, &entry.host))
            && self.users.iter().all(|p| wildcard_match(p, &entry.username))
            && self
                .tags
                .iter()
                .all(|p| entry.tags.iter().any(|t| wildcard_match(p, t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, addr: &str, user: &str, tags: &[&str]) -> HostEntry {
        let mut entry = HostEntry::new(name, addr);
        entry.username = user.to_string();
        entry.tags = tags.iter().map(|t| t.to_string()).collect();
        entry
    }

    #[test]
    fn plain_pattern_is_a_substring_match() {
        assert!(wildcard_match("web", "prod-WEB-01"));
        assert!(!wildcard_match("db", "prod-web-01"));
    }

    #[test]
    fn star_anchors_the_pattern() {
        assert!(wildcard_match("10.*", "10.0.0.5"));
        assert!(!wildcard_match("10.*", "192.10.0.5"));
        assert!(wildcard_match("*.internal", "db.internal"));
        assert!(!wildcard_match("*.internal", "db.internal.example"));
        assert!(wildcard_match("web*01", "web-eu-01"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "axxcyyb"));
        assert!(wildcard_match("*", "anything"));
    }

    #[test]
    fn all_tokens_must_match() {
        let web = host("web-1", "10.0.0.5", "ubuntu", &["prod", "eu"]);
        let db = host("db-1", "10.0.0.9", "postgres", &["prod"]);

        let filter = HostFilter::parse("tag:prod host:10.* web");
        assert!(filter.matches(&web));
        assert!(!filter.matches(&db));

        let filter = HostFilter::parse("user:post tag:PROD");
        assert!(filter.matches(&db));
        assert!(!filter.matches(&web));

        assert!(!HostFilter::parse("tag:staging").matches(&web));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = HostFilter::parse("   ");
        assert!(filter.is_empty());
        assert!(filter.matches(&host("x", "y", "z", &[])));
    }
}
