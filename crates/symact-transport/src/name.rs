//! Pipe naming and access control.

use std::path::PathBuf;

/// Namespace prefix of Windows named pipes.
pub const PIPE_PREFIX: &str = r"\\.\pipe\";

/// Suffix appended to the base name for the pipe carrying requests toward
/// the accepting side.
pub const INBOUND_SUFFIX: &str = "-in";

/// Suffix appended to the base name for the pipe carrying requests away from
/// the accepting side.
pub const OUTBOUND_SUFFIX: &str = "-out";

/// Strip the named-pipe namespace prefix, if present.
///
/// Used for diagnostics such as worker thread names.
pub fn short_name(name: &str) -> &str {
    name.strip_prefix(PIPE_PREFIX).unwrap_or(name)
}

/// Pipe name of the inbound (toward acceptor) half of a session.
pub fn inbound_name(base: &str) -> String {
    format!("{base}{INBOUND_SUFFIX}")
}

/// Pipe name of the outbound (away from acceptor) half of a session.
pub fn outbound_name(base: &str) -> String {
    format!("{base}{OUTBOUND_SUFFIX}")
}

/// Resolve a pipe name to the Unix socket path that stands in for it.
///
/// Absolute paths are used as-is. Anything else has the named-pipe prefix
/// removed and lands in the system temp directory with a `.sock` suffix.
pub fn socket_path(name: &str) -> PathBuf {
    let path = std::path::Path::new(name);
    if path.is_absolute() && !name.starts_with(PIPE_PREFIX) {
        return path.to_path_buf();
    }
    let short = short_name(name).replace(['\\', '/'], "_");
    std::env::temp_dir().join(format!("{short}.sock"))
}

/// Access policy applied to server pipe instances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PipeSecurity {
    /// Platform default (owner-only on Unix).
    #[default]
    Default,
    /// Only the current user may connect.
    CurrentUser,
    /// Any local user may connect.
    Everyone,
    /// Explicit Windows security descriptor string. Ignored on Unix.
    Sddl(String),
}

impl PipeSecurity {
    /// SDDL string for this policy, if one must be applied.
    pub fn sddl(&self) -> Option<&str> {
        match self {
            PipeSecurity::Default => None,
            // owner full access, SYSTEM full access
            PipeSecurity::CurrentUser => Some("D:P(A;;GA;;;OW)(A;;GA;;;SY)"),
            // everyone read/write, SYSTEM full access
            PipeSecurity::Everyone => Some("D:P(A;;GRGW;;;WD)(A;;GA;;;SY)"),
            PipeSecurity::Sddl(sddl) => Some(sddl.as_str()),
        }
    }

    /// Unix socket file mode for this policy.
    pub fn unix_mode(&self) -> u32 {
        match self {
            PipeSecurity::Everyone => 0o666,
            PipeSecurity::Default | PipeSecurity::CurrentUser | PipeSecurity::Sddl(_) => 0o600,
        }
    }
}

impl std::str::FromStr for PipeSecurity {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "default" => Ok(PipeSecurity::Default),
            "current-user" => Ok(PipeSecurity::CurrentUser),
            "everyone" => Ok(PipeSecurity::Everyone),
            other => match other.strip_prefix("sddl:") {
                Some(sddl) if !sddl.is_empty() => Ok(PipeSecurity::Sddl(sddl.to_string())),
                _ => Err(format!(
                    "unknown security mode '{other}' (expected default, current-user, everyone, sddl:<descriptor>)"
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_prefix() {
        assert_eq!(short_name(r"\\.\pipe\symact-svc"), "symact-svc");
        assert_eq!(short_name("symact-svc"), "symact-svc");
    }

    #[test]
    fn directional_names() {
        assert_eq!(inbound_name(r"\\.\pipe\svc"), r"\\.\pipe\svc-in");
        assert_eq!(outbound_name(r"\\.\pipe\svc"), r"\\.\pipe\svc-out");
    }

    #[test]
    fn socket_path_for_pipe_name_lives_in_temp() {
        let path = socket_path(r"\\.\pipe\symact-svc-in");
        assert_eq!(path, std::env::temp_dir().join("symact-svc-in.sock"));
    }

    #[cfg(unix)]
    #[test]
    fn socket_path_keeps_absolute_paths() {
        assert_eq!(
            socket_path("/tmp/custom/svc-in.sock"),
            PathBuf::from("/tmp/custom/svc-in.sock")
        );
    }

    #[test]
    fn parse_security_modes() {
        assert_eq!("default".parse::<PipeSecurity>(), Ok(PipeSecurity::Default));
        assert_eq!(
            "everyone".parse::<PipeSecurity>(),
            Ok(PipeSecurity::Everyone)
        );
        assert_eq!(
            "sddl:D:(A;;GA;;;WD)".parse::<PipeSecurity>(),
            Ok(PipeSecurity::Sddl("D:(A;;GA;;;WD)".to_string()))
        );
        assert!("sddl:".parse::<PipeSecurity>().is_err());
        assert!("bogus".parse::<PipeSecurity>().is_err());
    }

    #[test]
    fn unix_modes() {
        assert_eq!(PipeSecurity::Default.unix_mode(), 0o600);
        assert_eq!(PipeSecurity::Everyone.unix_mode(), 0o666);
        assert!(PipeSecurity::Default.sddl().is_none());
        assert!(PipeSecurity::CurrentUser.sddl().is_some());
    }
}
