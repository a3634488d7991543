use std::{path::PathBuf, str::FromStr};

use super::Error;

/// Lifecycle verb supplied by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add,
    Del,
    Check,
    Version,
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Command::Add),
            "DEL" => Ok(Command::Del),
            "CHECK" => Ok(Command::Check),
            "VERSION" => Ok(Command::Version),
            other => Err(Error::InvalidEnvironment(format!(
                "Unknown CNI_COMMAND {other:?}"
            ))),
        }
    }
}

/// Per-invocation arguments taken from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdArgs {
    pub command: Command,
    pub container_id: String,
    /// Path to the container's network namespace. May be absent on `DEL`
    pub netns: Option<PathBuf>,
    pub ifname: String,
    /// Raw `CNI_ARGS`
    pub args: String,
    pub path: Vec<PathBuf>,
}

impl CmdArgs {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Read the arguments through `lookup`, checking the ones `command` requires
    pub fn from_vars<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| Error::InvalidEnvironment(format!("{name} must be set")))
        };

        let command: Command = require("CNI_COMMAND")?.parse()?;
        if command == Command::Version {
            return Ok(Self {
                command,
                container_id: String::new(),
                netns: None,
                ifname: String::new(),
                args: String::new(),
                path: Vec::new(),
            });
        }

        let netns = match command {
            Command::Del => lookup("CNI_NETNS").filter(|value| !value.is_empty()),
            _ => Some(require("CNI_NETNS")?),
        };

        Ok(Self {
            command,
            container_id: require("CNI_CONTAINERID")?,
            netns: netns.map(PathBuf::from),
            ifname: require("CNI_IFNAME")?,
            args: lookup("CNI_ARGS").unwrap_or_default(),
            path: lookup("CNI_PATH")
                .map(|path| std::env::split_paths(&path).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(vars: &[(&str, &str)]) -> Result<CmdArgs, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        CmdArgs::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_add() {
        let args = parse(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_NETNS", "/var/run/netns/c1"),
            ("CNI_IFNAME", "eth0"),
            ("CNI_PATH", "/opt/cni/bin:/usr/libexec/cni"),
        ])
        .unwrap();
        assert_eq!(args.command, Command::Add);
        assert_eq!(args.netns, Some(PathBuf::from("/var/run/netns/c1")));
        assert_eq!(args.path.len(), 2);
    }

    #[test]
    fn test_add_requires_netns() {
        let error = parse(&[
            ("CNI_COMMAND", "ADD"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_IFNAME", "eth0"),
        ])
        .unwrap_err();
        assert_eq!(error.code(), 4);
    }

    #[test]
    fn test_del_without_netns() {
        let args = parse(&[
            ("CNI_COMMAND", "DEL"),
            ("CNI_CONTAINERID", "c1"),
            ("CNI_NETNS", ""),
            ("CNI_IFNAME", "eth0"),
        ])
        .unwrap();
        assert_eq!(args.netns, None);
    }

    #[test]
    fn test_version_needs_nothing_else() {
        assert_eq!(
            parse(&[("CNI_COMMAND", "VERSION")]).unwrap().command,
            Command::Version
        );
        assert!(parse(&[("CNI_COMMAND", "GC")]).is_err());
        assert!(parse(&[]).is_err());
    }
}
