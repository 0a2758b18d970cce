use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    "root".to_string()
}

/// One persisted host profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Alias, also the registry key
    #[serde(default)]
    pub name: String,
    /// Hostname or IP
    #[serde(alias = "ip")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    /// Private key path, may start with `~`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    /// Jump hosts in connection order
    #[serde(
        default,
        deserialize_with = "jump_chain",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub proxy_jump: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwards: Vec<ForwardRule>,
    #[serde(default, deserialize_with = "tag_set")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

impl HostEntry {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            username: default_username(),
            identity_file: None,
            proxy_jump: Vec::new(),
            forwards: Vec::new(),
            tags: BTreeSet::new(),
            folder: None,
        }
    }

    /// `user@host:port`, the form accepted by `ssh -J`.
    pub fn jump_target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn tags_to_string(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// Accepts either `"a,b"` (legacy) or `["a", "b"]`.
fn jump_chain<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Chain {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Chain>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Chain::One(s)) => split_list(&s),
        Some(Chain::Many(v)) => v
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

fn tag_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags = Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(normalize_tags(tags))
}

/// Add `tag` unless an equal tag, ignoring case, is already present.
/// Returns whether it was added.
pub fn insert_tag(tags: &mut BTreeSet<String>, tag: &str) -> bool {
    let tag = tag.trim();
    if tag.is_empty() || tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
        return false;
    }
    tags.insert(tag.to_string())
}

/// Trimmed, non-empty tags with case-insensitive duplicates dropped. The
/// first spelling wins.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = BTreeSet::new();
    for tag in tags {
        insert_tag(&mut set, tag.as_ref());
    }
    set
}

/// Split a comma- or whitespace-separated list, dropping empty items.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardKind {
    Local,
    Remote,
    Dynamic,
}

impl ForwardKind {
    pub fn flag(self) -> &'static str {
        match self {
            ForwardKind::Local => "-L",
            ForwardKind::Remote => "-R",
            ForwardKind::Dynamic => "-D",
        }
    }
}

/// A port forwarding rule. `bind` is `[addr:]port`; `target` is `host:port`
/// and is absent for dynamic (SOCKS) forwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForwardRule {
    pub kind: ForwardKind,
    pub bind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ForwardRule {
    pub fn local(bind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: ForwardKind::Local,
            bind: bind.into(),
            target: Some(target.into()),
        }
    }

    pub fn remote(bind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: ForwardKind::Remote,
            bind: bind.into(),
            target: Some(target.into()),
        }
    }

    pub fn dynamic(bind: impl Into<String>) -> Self {
        Self {
            kind: ForwardKind::Dynamic,
            bind: bind.into(),
            target: None,
        }
    }

    /// Parse the ssh command-line form of a forward.
    ///
    /// Local/remote: `port:host:hostport` or `addr:port:host:hostport`.
    /// Dynamic: `port` or `addr:port`.
    pub fn parse(kind: ForwardKind, spec: &str) -> Result<Self, String> {
        let parts: Vec<&str> = spec.trim().split(':').collect();
        match kind {
            ForwardKind::Dynamic => match parts.as_slice() {
                [port] => Ok(Self::dynamic(check_port(port)?.to_string())),
                [addr, port] if !addr.is_empty() => {
                    Ok(Self::dynamic(format!("{}:{}", addr, check_port(port)?)))
                }
                _ => Err(format!("'{}' is not [bind_address:]port", spec)),
            },
            ForwardKind::Local | ForwardKind::Remote => {
                let (bind, host, host_port) = match parts.as_slice() {
                    [port, host, host_port] => (check_port(port)?.to_string(), *host, *host_port),
                    [addr, port, host, host_port] if !addr.is_empty() => {
                        (format!("{}:{}", addr, check_port(port)?), *host, *host_port)
                    }
                    _ => return Err(format!("'{}' is not [bind_address:]port:host:hostport", spec)),
                };
                if host.is_empty() {
                    return Err(format!("'{}' has an empty target host", spec));
                }
                Ok(Self {
                    kind,
                    bind,
                    target: Some(format!("{}:{}", host, check_port(host_port)?)),
                })
            }
        }
    }

    /// Rendered value for the matching `-L`/`-R`/`-D` flag.
    pub fn to_arg(&self) -> String {
        match &self.target {
            Some(target) => format!("{}:{}", self.bind, target),
            None => self.bind.clone(),
        }
    }
}

fn check_port(s: &str) -> Result<u16, String> {
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("'{}' is not a port between 1 and 65535", s)),
        Ok(p) => Ok(p),
    }
}

/// On-disk shape of the host registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostEntry>,
    /// Flat folder names, no nesting
    #[serde(default)]
    pub folders: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_duplicates_differing_in_case_collapse() {
        let entry: HostEntry =
            serde_json::from_str(r#"{"host": "10.0.0.5", "tags": ["Prod", "prod", " web ", ""]}"#).unwrap();
        assert_eq!(entry.tags.len(), 2);
        assert!(entry.tags.contains("Prod"));
        assert!(entry.tags.contains("web"));

        let tags = normalize_tags(split_list("dev,DEV,Dev,ops"));
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["dev", "ops"]);
    }

    #[test]
    fn parses_local_forward_with_and_without_bind_address() {
        let rule = ForwardRule::parse(ForwardKind::Local, "8080:localhost:80").unwrap();
        assert_eq!(rule, ForwardRule::local("8080", "localhost:80"));
        assert_eq!(rule.to_arg(), "8080:localhost:80");

        let rule = ForwardRule::parse(ForwardKind::Remote, "0.0.0.0:9000:db:5432").unwrap();
        assert_eq!(rule.bind, "0.0.0.0:9000");
        assert_eq!(rule.target.as_deref(), Some("db:5432"));
    }

    #[test]
    fn rejects_malformed_forwards() {
        assert!(ForwardRule::parse(ForwardKind::Local, "8080").is_err());
        assert!(ForwardRule::parse(ForwardKind::Local, "abc:host:80").is_err());
        assert!(ForwardRule::parse(ForwardKind::Local, "8080::80").is_err());
        assert!(ForwardRule::parse(ForwardKind::Local, "8080:host:0").is_err());
        assert!(ForwardRule::parse(ForwardKind::Dynamic, "1080:x:y").is_err());
    }

    #[test]
    fn parses_dynamic_forward() {
        assert_eq!(
            ForwardRule::parse(ForwardKind::Dynamic, "1080").unwrap(),
            ForwardRule::dynamic("1080")
        );
        assert_eq!(
            ForwardRule::parse(ForwardKind::Dynamic, "127.0.0.1:1080").unwrap().bind,
            "127.0.0.1:1080"
        );
    }

    #[test]
    fn legacy_entry_shapes_deserialize() {
        let json = r#"{
            "name": "web",
            "host": "10.0.0.9",
            "proxy_jump": "bastion, edge",
            "tags": null
        }"#;
        let entry: HostEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.port, 22);
        assert_eq!(entry.username, "root");
        assert_eq!(entry.proxy_jump, vec!["bastion", "edge"]);
        assert!(entry.tags.is_empty());
        assert!(entry.folder.is_none());
    }

    #[test]
    fn entry_round_trips_through_json() {
        let mut entry = HostEntry::new("db", "db.internal");
        entry.proxy_jump = vec!["bastion".into()];
        entry.forwards.push(ForwardRule::dynamic("1080"));
        entry.tags.insert("prod".into());
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(serde_json::from_str::<HostEntry>(&json).unwrap(), entry);
    }
}
