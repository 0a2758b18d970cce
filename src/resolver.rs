use std::fmt;

use crate::error::ResolutionError;
use crate::models::{split_list, ForwardKind, ForwardRule, HostEntry};
use crate::registry::HostRegistry;

/// Per-invocation overrides. `None` means "keep the profile value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideSet {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub identity_file: Option<String>,
    pub proxy_jump: Option<Vec<String>>,
    pub forwards: Vec<ForwardRule>,
}

impl OverrideSet {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Parse ssh-style flags: `-i -J -L -R -D -p -l`. Values may be
    /// attached (`-p2222`) or separate (`-p 2222`).
    pub fn from_args(args: &[String]) -> Result<Self, ResolutionError> {
        let mut set = Self::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            let flag = match arg.get(..2) {
                Some(flag) if flag.starts_with('-') => flag,
                _ => return Err(ResolutionError::invalid(arg.as_str(), "unexpected argument")),
            };
            let value = if arg.len() > 2 {
                arg[2..].to_string()
            } else {
                iter.next()
                    .cloned()
                    .ok_or_else(|| ResolutionError::invalid(flag, "missing value"))?
            };

            match flag {
                "-i" => set.identity_file = Some(value),
                "-l" => set.username = Some(value),
                "-p" => {
                    let port = value
                        .parse::<u16>()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| ResolutionError::invalid("-p", format!("'{}' is not a valid port", value)))?;
                    set.port = Some(port);
                }
                "-J" => {
                    let hops = split_list(&value);
                    if hops.is_empty() {
                        return Err(ResolutionError::invalid("-J", "empty jump chain"));
                    }
                    set.proxy_jump = Some(hops);
                }
                "-L" | "-R" | "-D" => {
                    let kind = match flag {
                        "-L" => ForwardKind::Local,
                        "-R" => ForwardKind::Remote,
                        _ => ForwardKind::Dynamic,
                    };
                    let rule = ForwardRule::parse(kind, &value)
                        .map_err(|reason| ResolutionError::invalid(flag, reason))?;
                    set.forwards.push(rule);
                }
                _ => return Err(ResolutionError::invalid(flag, "unknown option")),
            }
        }

        Ok(set)
    }
}

/// Fully resolved connection parameters. Built once per attempt and never
/// mutated; any field difference means a different session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_file: Option<String>,
    pub proxy_jump: Vec<String>,
    pub forwards: Vec<ForwardRule>,
}

impl fmt::Display for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

impl ConnectionSpec {
    /// `user@host`, the destination argument for ssh and scp.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Port, identity and jump chain as `-o` options, accepted by ssh and scp alike.
    pub fn transport_options(&self) -> Vec<String> {
        let mut options = vec![format!("Port={}", self.port)];
        if let Some(identity) = self.identity_path() {
            options.push(format!("IdentityFile={}", identity));
        }
        if !self.proxy_jump.is_empty() {
            options.push(format!("ProxyJump={}", self.proxy_jump.join(",")));
        }
        options.into_iter().flat_map(|o| ["-o".to_string(), o]).collect()
    }

    fn identity_path(&self) -> Option<String> {
        let raw = self.identity_file.as_ref()?;
        match (raw.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => Some(home.join(rest).to_string_lossy().into_owned()),
            _ => Some(raw.clone()),
        }
    }

    /// Port, identity, jump chain and forwards.
    pub fn endpoint_args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string(), self.port.to_string()];
        if let Some(identity) = self.identity_path() {
            args.push("-i".into());
            args.push(identity);
        }
        if !self.proxy_jump.is_empty() {
            args.push("-J".into());
            args.push(self.proxy_jump.join(","));
        }
        for rule in &self.forwards {
            args.push(rule.kind.flag().into());
            args.push(rule.to_arg());
        }
        args
    }

    /// Quiet, non-interactive option list: no banner, no prompts.
    /// Does not include the destination.
    pub fn ssh_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-q", "-o", "LogLevel=ERROR", "-o", "BatchMode=yes"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.endpoint_args());
        args
    }

    /// Options for a login shell, destination last.
    pub fn ssh_args_interactive(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "ServerAliveInterval=60",
            "-o",
            "ServerAliveCountMax=3",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(self.endpoint_args());
        args.push(self.destination());
        args
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<String, ResolutionError> {
    let value = value.trim();
    if value.is_empty() {
        Err(ResolutionError::MissingField(field))
    } else {
        Ok(value.to_string())
    }
}

/// Merge a profile with overrides. Pure: no network or filesystem access.
///
/// Set override fields replace profile fields. Forward rules are merged by
/// `(kind, bind)` with the override winning. Tags are not part of the
/// result.
pub fn resolve(entry: &HostEntry, overrides: &OverrideSet) -> Result<ConnectionSpec, ResolutionError> {
    let host = non_empty(overrides.host.as_deref().unwrap_or(&entry.host), "host")?;
    let username = non_empty(
        overrides.username.as_deref().unwrap_or(&entry.username),
        "username",
    )?;

    let port = match overrides.port {
        Some(0) => return Err(ResolutionError::invalid("-p", "port must be between 1 and 65535")),
        Some(port) => port,
        None if entry.port == 0 => return Err(ResolutionError::MissingField("port")),
        None => entry.port,
    };

    let identity_file = overrides
        .identity_file
        .clone()
        .or_else(|| entry.identity_file.clone())
        .filter(|p| !p.trim().is_empty());

    let proxy_jump = overrides
        .proxy_jump
        .clone()
        .unwrap_or_else(|| entry.proxy_jump.clone());

    let mut forwards = entry.forwards.clone();
    for rule in &overrides.forwards {
        if rule.kind != ForwardKind::Dynamic && rule.target.is_none() {
            return Err(ResolutionError::invalid(
                rule.kind.flag(),
                format!("forward on {} has no target", rule.bind),
            ));
        }
        match forwards
            .iter_mut()
            .find(|f| f.kind == rule.kind && f.bind == rule.bind)
        {
            Some(existing) => *existing = rule.clone(),
            None => forwards.push(rule.clone()),
        }
    }

    Ok(ConnectionSpec {
        host,
        port,
        username,
        identity_file,
        proxy_jump,
        forwards,
    })
}

/// Look `name` up in the registry, resolve it, then expand jump hops that
/// name registry hosts into `user@host:port`.
pub fn resolve_in(
    registry: &HostRegistry,
    name: &str,
    overrides: &OverrideSet,
) -> Result<ConnectionSpec, ResolutionError> {
    let entry = registry.find(name)?;
    let mut spec = resolve(entry, overrides)?;
    spec.proxy_jump = spec
        .proxy_jump
        .into_iter()
        .map(|hop| match registry.get(&hop) {
            Some(bastion) => bastion.jump_target(),
            None => hop,
        })
        .collect();
    tracing::debug!("Resolved '{}' to {}", entry.name, spec);
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn dev_server() -> HostEntry {
        let mut entry = HostEntry::new("dev-server", "10.0.0.5");
        entry.port = 22;
        entry.username = "ubuntu".into();
        entry.tags.insert("dev".into());
        entry
    }

    #[test]
    fn dev_server_with_key_jump_and_forward() {
        let overrides = OverrideSet {
            identity_file: Some("~/.ssh/custom_key".into()),
            proxy_jump: Some(vec!["jump-host".into()]),
            forwards: vec![ForwardRule::local("8080", "localhost:80")],
            ..Default::default()
        };
        let spec = resolve(&dev_server(), &overrides).unwrap();
        assert_eq!(
            spec,
            ConnectionSpec {
                host: "10.0.0.5".into(),
                port: 22,
                username: "ubuntu".into(),
                identity_file: Some("~/.ssh/custom_key".into()),
                proxy_jump: vec!["jump-host".into()],
                forwards: vec![ForwardRule::local("8080", "localhost:80")],
            }
        );
    }

    #[test]
    fn override_fields_win_and_absent_fields_keep_the_profile() {
        let mut base = dev_server();
        base.identity_file = Some("/keys/base".into());
        base.proxy_jump = vec!["base-hop".into()];
        base.forwards = vec![ForwardRule::dynamic("1080")];

        // Every combination of the six overridable fields
        for mask in 1u8..64 {
            let overrides = OverrideSet {
                host: (mask & 1 != 0).then(|| "override.example".to_string()),
                port: (mask & 2 != 0).then_some(2200),
                username: (mask & 4 != 0).then(|| "deploy".to_string()),
                identity_file: (mask & 8 != 0).then(|| "/keys/other".to_string()),
                proxy_jump: (mask & 16 != 0).then(|| vec!["hop-a".to_string(), "hop-b".to_string()]),
                forwards: if mask & 32 != 0 {
                    vec![ForwardRule::local("9000", "db:5432")]
                } else {
                    Vec::new()
                },
            };
            let spec = resolve(&base, &overrides).unwrap();

            assert_eq!(spec.host, overrides.host.clone().unwrap_or(base.host.clone()));
            assert_eq!(spec.port, overrides.port.unwrap_or(base.port));
            assert_eq!(spec.username, overrides.username.clone().unwrap_or(base.username.clone()));
            assert_eq!(
                spec.identity_file,
                overrides.identity_file.clone().or(base.identity_file.clone())
            );
            assert_eq!(
                spec.proxy_jump,
                overrides.proxy_jump.clone().unwrap_or(base.proxy_jump.clone())
            );
            assert!(spec.forwards.contains(&ForwardRule::dynamic("1080")));
            for rule in &overrides.forwards {
                assert!(spec.forwards.contains(rule));
            }
        }
    }

    #[test]
    fn forward_with_same_bind_is_replaced() {
        let mut base = dev_server();
        base.forwards = vec![
            ForwardRule::local("8080", "old:80"),
            ForwardRule::remote("8080", "kept:80"),
        ];
        let overrides = OverrideSet {
            forwards: vec![ForwardRule::local("8080", "new:80")],
            ..Default::default()
        };
        let spec = resolve(&base, &overrides).unwrap();
        assert_eq!(
            spec.forwards,
            vec![
                ForwardRule::local("8080", "new:80"),
                ForwardRule::remote("8080", "kept:80"),
            ]
        );
    }

    #[test]
    fn missing_fields_are_reported() {
        let mut base = dev_server();
        base.username = String::new();
        assert_eq!(
            resolve(&base, &OverrideSet::default()),
            Err(ResolutionError::MissingField("username"))
        );
        let overrides = OverrideSet {
            username: Some("ok".into()),
            host: Some(" ".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve(&base, &overrides),
            Err(ResolutionError::MissingField("host"))
        );
    }

    #[test]
    fn parses_override_flags() {
        let set = OverrideSet::from_args(&args(&[
            "-i", "~/.ssh/k", "-J", "a,b", "-L", "8080:localhost:80", "-p2222", "-l", "root", "-D", "1080",
        ]))
        .unwrap();
        assert_eq!(set.identity_file.as_deref(), Some("~/.ssh/k"));
        assert_eq!(set.proxy_jump, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(set.port, Some(2222));
        assert_eq!(set.username.as_deref(), Some("root"));
        assert_eq!(
            set.forwards,
            vec![ForwardRule::local("8080", "localhost:80"), ForwardRule::dynamic("1080")]
        );
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        for bad in [
            vec!["-L", "8080"],
            vec!["-p", "99999"],
            vec!["-i"],
            vec!["-x", "1"],
            vec!["stray"],
        ] {
            assert!(
                matches!(
                    OverrideSet::from_args(&args(&bad)),
                    Err(ResolutionError::InvalidOverride { .. })
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn registry_hops_are_expanded() {
        let mut registry = HostRegistry::new();
        let mut bastion = HostEntry::new("bastion", "203.0.113.7");
        bastion.username = "jump".into();
        bastion.port = 2222;
        registry.add_host(bastion).unwrap();
        let mut target = dev_server();
        target.proxy_jump = vec!["bastion".into(), "edge.example".into()];
        registry.add_host(target).unwrap();

        let spec = resolve_in(&registry, "dev", &OverrideSet::default()).unwrap();
        assert_eq!(spec.proxy_jump, vec!["jump@203.0.113.7:2222", "edge.example"]);
    }

    #[test]
    fn args_are_quiet_and_ordered() {
        let spec = resolve(
            &dev_server(),
            &OverrideSet {
                proxy_jump: Some(vec!["a".into(), "b".into()]),
                forwards: vec![ForwardRule::dynamic("1080")],
                ..Default::default()
            },
        )
        .unwrap();
        let args = spec.ssh_args();
        assert_eq!(&args[..5], &["-q", "-o", "LogLevel=ERROR", "-o", "BatchMode=yes"]);
        assert!(args.windows(2).any(|w| w == ["-J", "a,b"]));
        assert!(args.windows(2).any(|w| w == ["-D", "1080"]));
        assert_eq!(spec.ssh_args_interactive().last().unwrap(), "ubuntu@10.0.0.5");
    }
}
