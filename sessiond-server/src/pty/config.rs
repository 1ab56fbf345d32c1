//! PTY configuration and the session shell environment

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Host terminal hints that must not leak into a session
const HOST_TERMINAL_HINTS: &[&str] = &[
    "KITTY_WINDOW_ID",
    "KITTY_PUBLIC_KEY",
    "ITERM_SESSION_ID",
    "LC_TERMINAL",
    "LC_TERMINAL_VERSION",
    "TERM_PROGRAM_VERSION",
];

const HOST_TERMINAL_HINT_PREFIXES: &[&str] = &["WEZTERM_"];

/// Configuration for spawning a PTY
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Command to execute (shell or program)
    pub command: String,
    /// Arguments to the command
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
    /// Environment variables to remove
    pub env_remove: Vec<String>,
    /// Initial terminal size (cols, rows)
    pub size: (u16, u16),
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: "/bin/sh".into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            env_remove: Vec::new(),
            size: (80, 24),
        }
    }
}

impl PtyConfig {
    /// Create config for a specific command
    pub fn command(cmd: impl Into<String>) -> Self {
        Self {
            command: cmd.into(),
            ..Default::default()
        }
    }

    /// The user's login shell, set up for session `session_id` rooted at `cwd`
    pub fn login_shell(session_id: &str, cwd: &Path) -> Self {
        let (command, args) = resolve_shell();
        let mut config = Self::command(command.clone())
            .with_cwd(cwd)
            .with_env("TERM", "xterm-256color")
            .with_env("COLORTERM", "truecolor")
            .with_env("TERM_PROGRAM", "sessiond")
            .with_env("SHELL", command)
            .with_env("SESSIOND_SESSION", session_id)
            .with_env("SESSIOND_ROOT", cwd.display().to_string());
        config.args = args;

        for key in HOST_TERMINAL_HINTS {
            config = config.without_env(*key);
        }
        for (key, _) in std::env::vars_os() {
            let key = key.to_string_lossy();
            if HOST_TERMINAL_HINT_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
            {
                config = config.without_env(key.into_owned());
            }
        }
        config
    }

    /// Set working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Remove environment variable
    pub fn without_env(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Set initial size
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.size = (cols, rows);
        self
    }

    /// Add argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Shell executable and its login arguments
pub fn resolve_shell() -> (String, Vec<String>) {
    let shell = std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(lookup_user_shell)
        .unwrap_or_else(|| "/bin/sh".into());
    let args = login_args(&shell);
    (shell, args)
}

fn login_args(shell: &str) -> Vec<String> {
    let name = Path::new(shell)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.as_str() {
        "zsh" | "bash" => vec!["-l".into(), "-i".into()],
        "fish" => vec!["-l".into()],
        _ => Vec::new(),
    }
}

/// Shell field of the current user's `/etc/passwd` entry
fn lookup_user_shell() -> Option<String> {
    let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
    // SAFETY: getuid() is always safe to call
    let uid = unsafe { libc::getuid() };
    passwd_shell(&passwd, uid)
}

fn passwd_shell(passwd: &str, uid: u32) -> Option<String> {
    passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 || fields[2].parse::<u32>().ok()? != uid {
            return None;
        }
        let shell = fields[6].trim();
        (!shell.is_empty()).then(|| shell.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PtyConfig::default();
        assert_eq!(config.size, (80, 24));
        assert!(config.args.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = PtyConfig::command("bash")
            .with_cwd("/home/user")
            .with_env("FOO", "bar")
            .without_env("BAZ")
            .with_size(120, 40)
            .with_arg("-l");

        assert_eq!(config.command, "bash");
        assert_eq!(config.cwd, Some(PathBuf::from("/home/user")));
        assert_eq!(config.env.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(config.env_remove, vec!["BAZ"]);
        assert_eq!(config.size, (120, 40));
        assert_eq!(config.args, vec!["-l"]);
    }

    #[test]
    fn test_login_args() {
        assert_eq!(login_args("/bin/zsh"), vec!["-l", "-i"]);
        assert_eq!(login_args("/usr/bin/bash"), vec!["-l", "-i"]);
        assert_eq!(login_args("/usr/local/bin/fish"), vec!["-l"]);
        assert!(login_args("/bin/sh").is_empty());
    }

    #[test]
    fn test_passwd_shell() {
        let passwd = "root:x:0:0:root:/root:/bin/bash\n\
                      broken line\n\
                      dev:x:1000:1000::/home/dev:/usr/bin/zsh\n\
                      nologin:x:1001:1001::/home/n:\n";
        assert_eq!(passwd_shell(passwd, 0), Some("/bin/bash".into()));
        assert_eq!(passwd_shell(passwd, 1000), Some("/usr/bin/zsh".into()));
        assert_eq!(passwd_shell(passwd, 1001), None);
        assert_eq!(passwd_shell(passwd, 42), None);
    }

    #[test]
    fn test_login_shell_environment() {
        let config = PtyConfig::login_shell("ws-1", Path::new("/work/ws"));
        assert_eq!(config.cwd, Some(PathBuf::from("/work/ws")));
        assert_eq!(config.env["TERM"], "xterm-256color");
        assert_eq!(config.env["COLORTERM"], "truecolor");
        assert_eq!(config.env["TERM_PROGRAM"], "sessiond");
        assert_eq!(config.env["SESSIOND_SESSION"], "ws-1");
        assert_eq!(config.env["SESSIOND_ROOT"], "/work/ws");
        assert_eq!(config.env["SHELL"], config.command);
        assert!(config.env_remove.iter().any(|k| k == "KITTY_WINDOW_ID"));
        assert!(config.env_remove.iter().any(|k| k == "TERM_PROGRAM_VERSION"));
    }
}
