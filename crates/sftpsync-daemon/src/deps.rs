//! External command availability checks

use anyhow::{bail, Result};

/// Commands the daemon shells out to
pub const REQUIRED_COMMANDS: &[&str] = &["lftp", "notify-send"];

/// Fails with the list of `commands` not found on `PATH`
pub fn check_required(commands: &[&str]) -> Result<()> {
    let missing = missing_commands(commands, |cmd| which::which(cmd).is_ok());
    if !missing.is_empty() {
        bail!("missing dependencies: {}", missing.join(", "));
    }
    Ok(())
}

/// The `commands` for which `found` is false, in order
fn missing_commands<'a>(commands: &[&'a str], found: impl Fn(&str) -> bool) -> Vec<&'a str> {
    commands
        .iter()
        .copied()
        .filter(|cmd| !found(*cmd))
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use std::ffi::OsString;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;

    fn touch(dir: &Path, name: &str, mode: u32) {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn missing_in<'a>(commands: &[&'a str], path_var: &OsString, cwd: &Path) -> Vec<&'a str> {
        missing_commands(commands, |cmd| {
            which::which_in(cmd, Some(path_var), cwd).is_ok()
        })
    }

    #[test]
    fn test_finds_executable_in_later_dir() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        touch(b.path(), "lftp", 0o755);
        let path_var = std::env::join_paths([a.path(), b.path()]).unwrap();

        assert!(missing_in(&["lftp"], &path_var, a.path()).is_empty());
    }

    #[test]
    fn test_non_executable_is_missing() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "notify-send", 0o644);
        let path_var = std::env::join_paths([dir.path()]).unwrap();

        assert_eq!(
            missing_in(&["notify-send"], &path_var, dir.path()),
            vec!["notify-send"]
        );
    }

    #[test]
    fn test_missing_commands_listed_in_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "lftp", 0o755);
        let path_var = std::env::join_paths([dir.path()]).unwrap();

        assert_eq!(
            missing_in(&["lftp", "notify-send", "sshfs"], &path_var, dir.path()),
            vec!["notify-send", "sshfs"]
        );
    }

    #[test]
    fn test_check_required_names_missing_commands() {
        let err = check_required(&["sftpsync-no-such-command"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing dependencies: sftpsync-no-such-command"
        );
    }
}
