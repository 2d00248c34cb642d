//! Packet-capture runner.
//!
//! Builds a whitelisted argument vector for the tcpdump-class binary and
//! launches it as a streaming foreground job. Validation is conservative and
//! fail-closed: unknown flags, shell metacharacters, unsafe paths, and
//! over-long inputs are all rejected before anything is spawned. The binary
//! itself is still expected to run with restricted capabilities; this layer
//! stops the obvious misuse at the door.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{Error, Result};
use crate::process::{self, ForegroundJob};

const MAX_TOKENS: usize = 80;
const MAX_TOKEN_LEN: usize = 256;
const MAX_ARGV_CHARS: usize = 4096;

/// Flags that may appear at all.
const ALLOWED_FLAGS: &[&str] = &[
    "-i", "-n", "-nn", "-v", "-vv", "-vvv", "-c", "-s", "-X", "-XX", "-A", "-e", "-tt", "-ttt",
    "-q", "-Q", "-U", "-E", "-p", "-Z", "-w",
];

/// Flags that consume the following token.
const FLAGS_WITH_ARG: &[&str] = &["-i", "-c", "-s", "-w", "-r", "-E", "-Q", "-Z"];

/// Capture-filter keywords accepted as bare tokens.
const FILTER_KEYWORDS: &[&str] = &[
    "port", "host", "src", "dst", "and", "or", "not", "ip", "ip6", "tcp", "udp", "icmp",
];

/// Shell metacharacters that are never allowed in any token.
const METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '<', '>', '*', '?', '(', ')', '{', '}', '[', ']',
];

static SAFE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:@/-]+$").expect("static regex"));
static IFACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:-]+$").expect("static regex"));
static UNIX_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("static regex"));
static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{1,3}\.){3}[0-9]{1,3}$").expect("static regex"));
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("static regex"));
static WRITE_BASENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,200}$").expect("static regex"));
static HOSTNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.-]{1,128}$").expect("static regex"));

/// Capture runner configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Path to the capture binary.
    pub binary: PathBuf,
    /// The only directory `-w` may write into; bare basenames are mapped
    /// into it.
    pub capture_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/tcpdump"),
            capture_dir: PathBuf::from("/var/log/webcli"),
        }
    }
}

/// Runner for the privileged packet-capture tool.
#[derive(Debug, Clone)]
pub struct CaptureRunner {
    config: CaptureConfig,
}

impl CaptureRunner {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Validate the user-supplied tokens and start a streaming capture job.
    ///
    /// Nothing is spawned unless the whole argument vector passes the
    /// whitelist.
    pub fn start(
        &self,
        args: &[String],
        lines: mpsc::UnboundedSender<String>,
    ) -> Result<ForegroundJob> {
        let argv = self.validate(args)?;
        let job = process::spawn_streaming(&self.config.binary, &argv, "tcpdump", lines)?;
        info!(command = %job.command_line(), "capture started");
        Ok(job)
    }

    /// Whitelist validation. Returns the normalized argv on success.
    pub fn validate(&self, tokens: &[String]) -> Result<Vec<String>> {
        if tokens.is_empty() {
            return Err(Error::Rejected("no capture arguments provided".into()));
        }
        if tokens.len() > MAX_TOKENS {
            return Err(Error::Rejected("too many arguments".into()));
        }
        let argv_chars: usize = tokens.iter().map(String::len).sum::<usize>() + tokens.len() - 1;
        if argv_chars > MAX_ARGV_CHARS {
            return Err(Error::Rejected("command too long".into()));
        }

        let mut out: Vec<String> = Vec::with_capacity(tokens.len());
        let mut iter = tokens.iter();
        while let Some(tok) = iter.next() {
            reject_suspicious(tok)?;

            if tok == "-r" {
                return Err(Error::Rejected(
                    "-r (read capture file) is not allowed".into(),
                ));
            }

            if ALLOWED_FLAGS.contains(&tok.as_str()) {
                if FLAGS_WITH_ARG.contains(&tok.as_str()) {
                    let Some(param) = iter.next() else {
                        return Err(Error::Rejected(format!("flag {tok} requires an argument")));
                    };
                    reject_suspicious(param)?;
                    out.push(tok.clone());
                    out.push(self.validate_flag_arg(tok, param)?);
                } else {
                    out.push(tok.clone());
                }
                continue;
            }

            if tok.starts_with('-') {
                return Err(Error::Rejected(format!("flag {tok} is not allowed")));
            }

            // Bare filter tokens: keywords, numbers, addresses, hostnames.
            if FILTER_KEYWORDS.contains(&tok.as_str())
                || NUMBER.is_match(tok)
                || IPV4.is_match(tok)
                || HOSTNAME.is_match(tok)
            {
                out.push(tok.clone());
                continue;
            }

            return Err(Error::Rejected(format!("unsupported token '{tok}'")));
        }

        if out.iter().filter(|t| *t == "-Z").count() > 1 {
            return Err(Error::Rejected("multiple -Z flags are not allowed".into()));
        }

        if out.iter().any(|t| t == "-w") {
            std::fs::create_dir_all(&self.config.capture_dir).map_err(|_| {
                Error::Rejected("cannot prepare the capture output directory".into())
            })?;
        }

        Ok(out)
    }

    fn validate_flag_arg(&self, flag: &str, param: &str) -> Result<String> {
        match flag {
            "-i" => {
                if !IFACE.is_match(param) {
                    return Err(Error::Rejected(format!("invalid interface '{param}'")));
                }
                Ok(param.to_string())
            }
            "-Z" => {
                if !UNIX_USER.is_match(param) {
                    return Err(Error::Rejected(format!("invalid username '{param}'")));
                }
                Ok(param.to_string())
            }
            "-c" | "-s" => {
                if !NUMBER.is_match(param) {
                    return Err(Error::Rejected(format!(
                        "argument for {flag} must be numeric"
                    )));
                }
                Ok(param.to_string())
            }
            "-w" => self.validate_write_path(param),
            _ => {
                if param.starts_with('-') {
                    return Err(Error::Rejected(format!("invalid argument after {flag}")));
                }
                Ok(param.to_string())
            }
        }
    }

    /// `-w` may only write under the capture directory. Bare basenames are
    /// mapped into it; absolute paths must normalize to somewhere below it.
    fn validate_write_path(&self, param: &str) -> Result<String> {
        if param.starts_with('/') {
            let normalized = normalize_lexically(Path::new(param));
            if !normalized.starts_with(&self.config.capture_dir) {
                return Err(Error::Rejected(
                    "-w output must stay inside the capture directory".into(),
                ));
            }
            return Ok(normalized.display().to_string());
        }
        if !WRITE_BASENAME.is_match(param) {
            return Err(Error::Rejected(format!("invalid -w filename '{param}'")));
        }
        Ok(self.config.capture_dir.join(param).display().to_string())
    }
}

fn reject_suspicious(tok: &str) -> Result<()> {
    if tok.len() > MAX_TOKEN_LEN {
        return Err(Error::Rejected("token too long".into()));
    }
    if let Some(c) = tok.chars().find(|c| METACHARACTERS.contains(c)) {
        return Err(Error::Rejected(format!(
            "token contains shell metacharacter '{c}'"
        )));
    }
    if !SAFE_TOKEN.is_match(tok) {
        return Err(Error::Rejected(format!(
            "token contains unsafe characters: '{tok}'"
        )));
    }
    Ok(())
}

/// Resolve `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(dir: &Path) -> CaptureRunner {
        CaptureRunner::new(CaptureConfig {
            binary: PathBuf::from("/bin/echo"),
            capture_dir: dir.to_path_buf(),
        })
    }

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_a_typical_filter() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let argv = r
            .validate(&args(&["-i", "eth0", "-nn", "port", "80", "and", "host", "10.0.0.1"]))
            .unwrap();
        assert_eq!(
            argv,
            args(&["-i", "eth0", "-nn", "port", "80", "and", "host", "10.0.0.1"])
        );
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        for bad in ["port;rm", "$(whoami)", "a|b", "`id`", "one&two"] {
            let err = r.validate(&args(&[bad])).unwrap_err();
            assert!(matches!(err, Error::Rejected(_)), "{bad} was accepted");
        }
    }

    #[test]
    fn rejects_unknown_flags() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        assert!(r.validate(&args(&["-G", "60"])).is_err());
    }

    #[test]
    fn rejects_read_flag() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let err = r.validate(&args(&["-r", "old.pcap"])).unwrap_err();
        assert!(err.to_string().contains("-r"));
    }

    #[test]
    fn count_and_snaplen_must_be_numeric() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        assert!(r.validate(&args(&["-c", "100"])).is_ok());
        assert!(r.validate(&args(&["-c", "ten"])).is_err());
        assert!(r.validate(&args(&["-s", "0"])).is_ok());
    }

    #[test]
    fn interface_pattern_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        assert!(r.validate(&args(&["-i", "eth0.100"])).is_ok());
        assert!(r.validate(&args(&["-i", "eth0/../.."])).is_err());
    }

    #[test]
    fn write_basename_is_mapped_into_capture_dir() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let argv = r.validate(&args(&["-w", "out.pcap"])).unwrap();
        assert_eq!(argv[0], "-w");
        assert_eq!(argv[1], dir.path().join("out.pcap").display().to_string());
    }

    #[test]
    fn write_path_cannot_escape_capture_dir() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let sneaky = format!("{}/../../etc/passwd", dir.path().display());
        assert!(r.validate(&args(&["-w", &sneaky])).is_err());
    }

    #[test]
    fn absolute_write_path_inside_capture_dir_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let ok = format!("{}/caps/today.pcap", dir.path().display());
        let argv = r.validate(&args(&["-w", &ok])).unwrap();
        assert_eq!(argv[1], ok);
    }

    #[test]
    fn duplicate_drop_user_flags_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let err = r
            .validate(&args(&["-Z", "nobody", "-Z", "daemon"]))
            .unwrap_err();
        assert!(err.to_string().contains("-Z"));
    }

    #[test]
    fn drop_user_must_look_like_a_unix_account() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        assert!(r.validate(&args(&["-Z", "nobody"])).is_ok());
        assert!(r.validate(&args(&["-Z", "Not/AUser"])).is_err());
    }

    #[test]
    fn empty_argument_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        assert!(r.validate(&[]).is_err());
    }

    #[test]
    fn validation_failure_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let r = CaptureRunner::new(CaptureConfig {
            binary: PathBuf::from("/nonexistent/capture-tool"),
            capture_dir: dir.path().to_path_buf(),
        });
        // A bad argv must fail with Rejected, not with a launch error from
        // trying to spawn the missing binary.
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = r.start(&args(&["bad;token"]), tx).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }

    #[tokio::test]
    async fn streaming_start_uses_the_configured_binary() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let job = r.start(&args(&["port", "80"]), tx).unwrap();
        assert!(job.command_line().ends_with("port 80"));

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines[0], "port 80");
        assert!(lines.last().unwrap().contains("finished"));
    }
}
