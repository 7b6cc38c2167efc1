//! Launcher command validation.

use std::path::Path;

use toolbridge_core::{BridgeError, SecurityViolation};

/// Launchers a server command may start with.
pub const ALLOWED_LAUNCHERS: &[&str] = &[
    "node", "npx", "python", "python3", "uv", "uvx", "deno", "bun", "bunx", "docker", "podman",
    "java", "ruby", "go", "cargo", "dotnet", "php", "pipx",
];

/// Directories from which an absolute launcher path is accepted.
pub const TRUSTED_BIN_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/bin", "/opt/homebrew/bin"];

/// Characters that would change meaning if the string ever reached a shell.
pub const SHELL_METACHARACTERS: &[char] = &['&', '|', ';', '$', '<', '>', '`'];

pub fn contains_metacharacter(value: &str) -> bool {
    value.contains(SHELL_METACHARACTERS)
}

/// Tokenize a launcher command line and check it against the allow-list.
///
/// Tokenizing follows POSIX shell quoting, but no shell is ever invoked; the
/// tokens become the argv of the child directly.
pub fn validate_command(raw: &str) -> Result<Vec<String>, BridgeError> {
    if raw.trim().is_empty() {
        return Err(SecurityViolation::EmptyCommand.into());
    }

    let tokens = shlex::split(raw).ok_or(SecurityViolation::UnbalancedQuotes)?;
    let Some(launcher) = tokens.first() else {
        return Err(SecurityViolation::EmptyCommand.into());
    };

    if tokens.iter().any(|t| contains_metacharacter(t)) {
        return Err(SecurityViolation::ShellMetacharacter.into());
    }

    if !is_allowed_launcher(launcher) {
        tracing::warn!(launcher = %launcher, "Rejected launcher not on the allow-list");
        return Err(SecurityViolation::DisallowedLauncher.into());
    }

    Ok(tokens)
}

/// Apply the metacharacter rule to separately configured arguments.
pub fn validate_args(args: &[String]) -> Result<(), BridgeError> {
    if args.iter().any(|a| contains_metacharacter(a)) {
        return Err(SecurityViolation::ShellMetacharacter.into());
    }
    Ok(())
}

fn is_allowed_launcher(token: &str) -> bool {
    if ALLOWED_LAUNCHERS.contains(&token) {
        return true;
    }

    let path = Path::new(token);
    if !path.is_absolute() {
        return false;
    }
    let name_allowed = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| ALLOWED_LAUNCHERS.contains(&name));
    let dir_trusted = path
        .parent()
        .is_some_and(|dir| TRUSTED_BIN_DIRS.iter().any(|t| dir == Path::new(t)));

    name_allowed && dir_trusted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(raw: &str) -> SecurityViolation {
        match validate_command(raw) {
            Err(BridgeError::Security(v)) => v,
            other => panic!("expected security error for {raw:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_allow_listed_launchers() {
        let tokens = validate_command("npx -y @modelcontextprotocol/server-filesystem /tmp").unwrap();
        assert_eq!(tokens[0], "npx");
        assert_eq!(tokens.len(), 4);

        let tokens = validate_command("python3 -m 'my server'").unwrap();
        assert_eq!(tokens, vec!["python3", "-m", "my server"]);

        assert!(validate_command("/usr/local/bin/node server.js").is_ok());
    }

    #[test]
    fn test_rejects_launchers_outside_allow_list() {
        for raw in ["bash -c id", "sh server.sh", "curl http://x", "rm -rf /tmp/x", "./node x"] {
            assert_eq!(violation(raw), SecurityViolation::DisallowedLauncher, "{raw}");
        }
    }

    #[test]
    fn test_rejects_absolute_paths_outside_trusted_dirs() {
        assert_eq!(
            violation("/tmp/evil/node server.js"),
            SecurityViolation::DisallowedLauncher
        );
        assert_eq!(violation("/usr/bin/bash"), SecurityViolation::DisallowedLauncher);
    }

    #[test]
    fn test_rejects_metacharacters_anywhere() {
        for raw in [
            "node server.js; rm -rf /",
            "node server.js && id",
            "node server.js | tee x",
            "node $HOME/x.js",
            "node `id`",
            "node a > b",
            "node a < b",
            "node 'quoted;still-bad'",
        ] {
            assert_eq!(violation(raw), SecurityViolation::ShellMetacharacter, "{raw}");
        }
    }

    #[test]
    fn test_rejects_unbalanced_quotes_and_empty() {
        assert_eq!(violation("node 'server.js"), SecurityViolation::UnbalancedQuotes);
        assert_eq!(violation("node \"server.js"), SecurityViolation::UnbalancedQuotes);
        assert_eq!(violation(""), SecurityViolation::EmptyCommand);
        assert_eq!(violation("   "), SecurityViolation::EmptyCommand);
    }

    #[test]
    fn test_validate_args() {
        assert!(validate_args(&["--port".into(), "8080".into()]).is_ok());
        assert!(validate_args(&["--x=$(id)".into()]).is_err());
    }
}
