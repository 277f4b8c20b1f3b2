//! SMB share capacity queries

use async_trait::async_trait;
use casevault_types::{Error, Result};
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Free and total space of a share in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareSpace {
    /// Capacity
    pub total: u64,
    /// Free bytes
    pub available: u64,
}

/// Queries the capacity of a remote share
#[async_trait]
pub trait RemoteShareProbe: Send + Sync {
    /// Query space on `url` with plaintext credentials
    ///
    /// Implementations must not log the password.
    async fn query_space(&self, url: &str, username: &str, password: &str) -> Result<ShareSpace>;
}

/// Probe backed by the `smbclient` binary
#[derive(Debug, Clone)]
pub struct SmbClientProbe {
    program: PathBuf,
    timeout: Duration,
}

impl Default for SmbClientProbe {
    fn default() -> Self {
        Self::new("smbclient", Duration::from_secs(30))
    }
}

impl SmbClientProbe {
    /// Use `program` with a per-query timeout
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl RemoteShareProbe for SmbClientProbe {
    async fn query_space(&self, url: &str, username: &str, password: &str) -> Result<ShareSpace> {
        let share = share_from_url(url)?;
        let (domain, user) = split_domain_user(username);

        let mut command = Command::new(&self.program);
        command
            .arg(&share)
            .arg("-U")
            .arg(user)
            .arg("-c")
            .arg("du")
            .env("PASSWD", password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(domain) = domain {
            command.arg("-W").arg(domain);
        }

        debug!("Querying share space for {} as {}", share, user);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| Error::Timeout {
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                Error::remote(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::remote(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        parse_du_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn du_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d+) blocks of size (\d+)\. (\d+) blocks available")
            .unwrap_or_else(|e| unreachable!("static pattern: {}", e))
    })
}

/// Parse the summary line `smbclient -c du` prints
pub fn parse_du_output(output: &str) -> Result<ShareSpace> {
    let captures = du_pattern()
        .captures(output)
        .ok_or_else(|| Error::remote("share size summary not found in smbclient output"))?;

    let number = |index: usize| -> Result<u64> {
        captures[index]
            .parse::<u64>()
            .map_err(|e| Error::remote(format!("bad number in smbclient output: {}", e)))
    };
    let blocks = number(1)?;
    let block_size = number(2)?;
    let free_blocks = number(3)?;

    let total = blocks
        .checked_mul(block_size)
        .ok_or_else(|| Error::remote("share size overflows"))?;
    let available = free_blocks
        .checked_mul(block_size)
        .ok_or_else(|| Error::remote("share size overflows"))?;

    Ok(ShareSpace {
        total,
        available: available.min(total),
    })
}

/// `DOMAIN\user` → (Some(`DOMAIN`), `user`)
pub fn split_domain_user(username: &str) -> (Option<&str>, &str) {
    match username.split_once('\\') {
        Some((domain, user)) if !domain.is_empty() => (Some(domain), user),
        Some((_, user)) => (None, user),
        None => (None, username),
    }
}

/// `smb://host/share[/dir]` or `\\host\share` → `//host/share`
pub fn share_from_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("smb://")
        .or_else(|| trimmed.strip_prefix("//"))
        .or_else(|| trimmed.strip_prefix("\\\\"))
        .ok_or_else(|| Error::validation(format!("not an SMB share url: {}", url)))?;

    let normalized = rest.replace('\\', "/");
    let mut parts = normalized.split('/').filter(|p| !p.is_empty());
    match (parts.next(), parts.next()) {
        (Some(host), Some(share)) => Ok(format!("//{}/{}", host, share)),
        _ => Err(Error::validation(format!(
            "share url needs a host and a share name: {}",
            url
        ))),
    }
}
