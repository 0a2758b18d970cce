use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::models::{insert_tag, split_list, HostEntry, DEFAULT_PORT};

pub const IMPORT_TAG: &str = "ssh_config";

/// One concrete `Host` stanza read from an OpenSSH client config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedHost {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub identity_file: Option<String>,
    pub proxy_jump: Vec<String>,
}

impl ImportedHost {
    fn new(alias: &str) -> Self {
        Self {
            name: alias.to_string(),
            host: alias.to_string(),
            port: DEFAULT_PORT,
            username: None,
            identity_file: None,
            proxy_jump: Vec::new(),
        }
    }

    pub fn into_entry(self) -> HostEntry {
        let mut entry = HostEntry::new(self.name, self.host);
        entry.port = self.port;
        if let Some(user) = self.username {
            entry.username = user;
        }
        entry.identity_file = self.identity_file;
        entry.proxy_jump = self.proxy_jump;
        insert_tag(&mut entry.tags, IMPORT_TAG);
        entry
    }
}

fn is_pattern(alias: &str) -> bool {
    alias.contains('*') || alias.contains('?') || alias.starts_with('!')
}

/// ssh `Host` pattern: `*` is any run of characters, `?` exactly one.
fn pattern_matches(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|skip| pattern_matches(rest, &text[skip..])),
        Some(('?', rest)) => !text.is_empty() && pattern_matches(rest, &text[1..]),
        Some((c, rest)) => text
            .split_first()
            .map_or(false, |(t, tail)| c.eq_ignore_ascii_case(t) && pattern_matches(rest, tail)),
    }
}

/// A `Host` line matches when any pattern matches and no negated one does.
fn host_line_matches(patterns: &[String], alias: &str) -> bool {
    let alias: Vec<char> = alias.chars().collect();
    let mut matched = false;
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) => {
                if pattern_matches(&negated.chars().collect::<Vec<_>>(), &alias) {
                    return false;
                }
            }
            None => matched |= pattern_matches(&pattern.chars().collect::<Vec<_>>(), &alias),
        }
    }
    matched
}

/// Split `Key value`, `Key=value` and `Key = value` lines.
fn split_directive(line: &str) -> Option<(String, &str)> {
    let line = line.trim();
    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (key, rest) = line.split_at(split_at);
    let value = rest
        .trim_start()
        .strip_prefix('=')
        .unwrap_or(rest)
        .trim()
        .trim_matches('"');
    if value.is_empty() {
        return None;
    }
    Some((key.to_lowercase(), value))
}

/// Directives under one `Host` line. `Match` blocks get no patterns and
/// therefore never apply.
struct Block<'a> {
    patterns: Vec<String>,
    directives: Vec<(String, &'a str)>,
}

/// Values collected for one alias. The first value seen for a key sticks.
#[derive(Default)]
struct Collected {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_file: Option<String>,
    proxy_jump: Option<Vec<String>>,
}

impl Collected {
    fn apply(&mut self, alias: &str, key: &str, value: &str) {
        match key {
            "hostname" => {
                self.host.get_or_insert_with(|| value.to_string());
            }
            "user" => {
                self.username.get_or_insert_with(|| value.to_string());
            }
            "port" if self.port.is_none() => match value.parse::<u16>() {
                Ok(port) if port > 0 => self.port = Some(port),
                _ => tracing::warn!("Ignoring bad port '{}' for {}", value, alias),
            },
            "identityfile" => {
                self.identity_file.get_or_insert_with(|| value.to_string());
            }
            "proxyjump" => {
                self.proxy_jump.get_or_insert_with(|| {
                    if value.eq_ignore_ascii_case("none") {
                        Vec::new()
                    } else {
                        split_list(value)
                    }
                });
            }
            _ => {}
        }
    }

    fn into_host(self, alias: &str) -> ImportedHost {
        let mut host = ImportedHost::new(alias);
        if let Some(name) = self.host {
            host.host = name;
        }
        host.port = self.port.unwrap_or(DEFAULT_PORT);
        host.username = self.username;
        host.identity_file = self.identity_file;
        host.proxy_jump = self.proxy_jump.unwrap_or_default();
        host
    }
}

/// Parse config text into one host per concrete alias, in order of first
/// appearance. Each alias takes its settings the way ssh does: every
/// `Host` block whose patterns match it applies, in file order, and the
/// first value for a key wins. Wildcard blocks such as `Host *` therefore
/// only fill keys the alias has not set earlier in the file. `Match`
/// blocks are skipped.
pub fn parse_ssh_config(text: &str) -> Vec<ImportedHost> {
    // Directives before the first `Host` line apply to every alias
    let mut blocks = vec![Block {
        patterns: vec!["*".to_string()],
        directives: Vec::new(),
    }];
    let mut aliases: Vec<String> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = split_directive(line) else {
            continue;
        };

        match key.as_str() {
            "host" => {
                let patterns = split_list(value);
                for alias in patterns.iter().filter(|p| !is_pattern(p)) {
                    if !aliases.contains(alias) {
                        aliases.push(alias.clone());
                    }
                }
                blocks.push(Block {
                    patterns,
                    directives: Vec::new(),
                });
            }
            "match" => blocks.push(Block {
                patterns: Vec::new(),
                directives: Vec::new(),
            }),
            _ => {
                if let Some(block) = blocks.last_mut() {
                    block.directives.push((key, value));
                }
            }
        }
    }

    aliases
        .iter()
        .map(|alias| {
            let mut collected = Collected::default();
            for block in blocks.iter().filter(|b| host_line_matches(&b.patterns, alias)) {
                for (key, value) in &block.directives {
                    collected.apply(alias, key, value);
                }
            }
            collected.into_host(alias)
        })
        .collect()
}

pub fn load_ssh_config(path: &Path) -> Result<Vec<ImportedHost>> {
    if !path.exists() {
        tracing::warn!("SSH config file not found at {:?}", path);
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read SSH config file {}", path.display()))?;
    let hosts = parse_ssh_config(&content);
    tracing::info!("Loaded {} hosts from SSH config", hosts.len());
    Ok(hosts)
}
