//! lftp command construction
//!
//! Every invocation has the shape
//!
//! ```text
//! lftp -e "<settings>; <command>; quit" -u <user>,<password> -p <port> <protocol>://<host>
//! ```
//!
//! With SFTP and an SSH key, lftp is told to connect through
//! `ssh -a -x -i <key>` and gets an empty password so it never prompts.

use std::path::{Component, Path};

use sftpsync_core::config::Profile;

/// Settings applied to every session
const BASE_SETTINGS: &str = "set ftp:ssl-allow no; set ssl:verify-certificate no";

/// Known lftp output fragments and the reason shown for them, in priority order
const KNOWN_ERRORS: &[(&str, &str)] = &[
    ("Connection refused", "Connection refused"),
    ("Login incorrect", "Authentication failed"),
    ("Permission denied", "Permission denied"),
    ("Name or service not known", "Host not found"),
    ("No such file or directory", "File or directory not found"),
];

/// Builds lftp's argument vector for running `command` against `profile`
pub fn build_args(profile: &Profile, command: &str) -> Vec<String> {
    let key = profile
        .ssh_key_path()
        .filter(|_| profile.protocol == "sftp");

    let (settings, credentials) = match key {
        Some(key) => {
            let connect = format!("ssh -a -x -i {}", key.display());
            (
                format!("set sftp:connect-program {}; {BASE_SETTINGS}", quote(&connect)),
                format!("{},", profile.username),
            )
        }
        None => (
            BASE_SETTINGS.to_string(),
            format!("{},{}", profile.username, profile.password),
        ),
    };

    vec![
        "-e".to_string(),
        format!("{settings}; {command}; quit"),
        "-u".to_string(),
        credentials,
        "-p".to_string(),
        profile.port.to_string(),
        format!("{}://{}", profile.protocol, profile.host),
    ]
}

/// `put` command uploading `local` into the remote directory that mirrors
/// `relative` under `remote_root`
pub fn put_command(remote_root: &str, relative: &Path, local: &Path) -> String {
    format!(
        "put -O {} {}",
        quote(&remote_dir(remote_root, relative)),
        quote(&local.to_string_lossy())
    )
}

/// Remote directory for a file at `relative` below the context root
///
/// Always `/`-separated, whatever the local platform.
pub fn remote_dir(remote_root: &str, relative: &Path) -> String {
    let mut dir = remote_root.trim_end_matches('/').to_string();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            if let Component::Normal(part) = component {
                dir.push('/');
                dir.push_str(&part.to_string_lossy());
            }
        }
    }
    if dir.is_empty() {
        "/".to_string()
    } else {
        dir
    }
}

/// Double-quotes an argument for lftp's command parser
pub fn quote(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('"');
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Reduces lftp's output to a short reason
///
/// Falls back to the first non-empty line, then to "Unknown error".
pub fn parse_error(output: &str) -> String {
    if let Some((_, reason)) = KNOWN_ERRORS
        .iter()
        .find(|(needle, _)| output.contains(needle))
    {
        return (*reason).to_string();
    }

    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Unknown error")
        .to_string()
}
