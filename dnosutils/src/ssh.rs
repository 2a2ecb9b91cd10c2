//! Interactive DNOS shell over SSH.
//!
//! One session wraps one interactive shell on one device. Sessions are never
//! shared across threads or pooled across logical operations; the executor
//! opens one per device per operation and closes it when done.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use dnaas_api::config::DeviceInfo;

use crate::capture::{clean_capture, pager_active};

/// Poll interval while draining channel output.
const READ_POLL: Duration = Duration::from_millis(50);

/// Grace period after entering or leaving configuration mode, in which the
/// prompt is re-learned before the next command goes out.
const MODE_SETTLE: Duration = Duration::from_millis(200);

static PROMPT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[\w.\-()@/]+[#>]\s*$").unwrap());

/// Configuration mode is indicated by a `cfg` fragment in the prompt, e.g.
/// `dnaas-leaf-b14(cfg)#`.
static CONFIG_PROMPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[\w.\-@/]*\(cfg[^)]*\)#\s*$").unwrap());

/// Device-side error markers. A command whose output matches any of these
/// failed on the device even though the transport succeeded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceErrorKind {
    Syntax,
    AccessDenied,
    InvalidValue,
    General,
}

/// Inspects a command's captured output for device-side error markers.
pub fn detect_error(output: &str) -> Option<(DeviceErrorKind, String)> {
    for line in output.lines() {
        let trimmed = line.trim_start();
        let kind = if trimmed.starts_with("% ") {
            Some(DeviceErrorKind::Syntax)
        } else if trimmed.starts_with("ERROR:") || trimmed.starts_with("rpc error") {
            if trimmed.contains("access-denied") {
                Some(DeviceErrorKind::AccessDenied)
            } else if trimmed.contains("invalid-value") {
                Some(DeviceErrorKind::InvalidValue)
            } else {
                Some(DeviceErrorKind::General)
            }
        } else if trimmed.contains("access-denied") {
            Some(DeviceErrorKind::AccessDenied)
        } else if trimmed.contains("invalid-value") {
            Some(DeviceErrorKind::InvalidValue)
        } else {
            None
        };
        if let Some(kind) = kind {
            return Some((kind, trimmed.to_string()));
        }
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("could not resolve '{host}'")]
    Resolve { host: String },
    #[error("connect to {host}:{port} failed")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("SSH handshake failed")]
    Handshake(#[source] ssh2::Error),
    #[error("authentication rejected for user '{username}'")]
    Authentication { username: String },
    #[error("failed to open interactive shell")]
    Shell(#[source] ssh2::Error),
    #[error("prompt did not return within {timeout:?} after '{command}'")]
    PromptTimeout { command: String, timeout: Duration },
    #[error("channel write failed")]
    Write(#[source] std::io::Error),
    #[error("session is closed")]
    Closed,
    #[error("device did not enter configuration mode (prompt: '{prompt}')")]
    ConfigModeEntry { prompt: String },
}

/// Connection timing bounds. Every suspension point in the session is
/// covered by one of these.
#[derive(Clone, Copy, Debug)]
pub struct SshTimeouts {
    pub connect: Duration,
    pub command: Duration,
}

impl Default for SshTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            command: Duration::from_secs(30),
        }
    }
}

/// TCP probe of the device's SSH port. Used for the warning-only
/// reachability pre-flight; failure is never fatal.
pub fn probe(host: &str, port: u16, timeout: Duration) -> bool {
    let Ok(mut addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs.any(|addr| TcpStream::connect_timeout(&addr, timeout).is_ok())
}

pub struct SshSession {
    device: String,
    _session: ssh2::Session,
    channel: ssh2::Channel,
    /// Last prompt line observed; used to delimit command output.
    prompt: String,
    in_config_mode: bool,
    closed: bool,
    timeouts: SshTimeouts,
}

impl SshSession {
    /// Establishes an interactive shell on the device within the connect
    /// timeout, drains the login banner, and learns the prompt.
    pub fn open(device: &DeviceInfo, timeouts: SshTimeouts) -> Result<Self, SshError> {
        debug!("Opening SSH session to '{}' ({})", device.name, device.host);

        let addr = (device.host.as_str(), device.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| SshError::Resolve {
                host: device.host.clone(),
            })?;
        let stream =
            TcpStream::connect_timeout(&addr, timeouts.connect).map_err(|source| {
                SshError::Connect {
                    host: device.host.clone(),
                    port: device.port,
                    source,
                }
            })?;

        let mut session = ssh2::Session::new().map_err(SshError::Handshake)?;
        session.set_tcp_stream(stream);
        session.set_timeout(timeouts.connect.as_millis() as u32);
        session.handshake().map_err(SshError::Handshake)?;
        session
            .userauth_password(&device.username, &device.password)
            .map_err(|_| SshError::Authentication {
                username: device.username.clone(),
            })?;

        let mut channel = session.channel_session().map_err(SshError::Shell)?;
        channel
            .request_pty("vt100", None, None)
            .map_err(SshError::Shell)?;
        channel.shell().map_err(SshError::Shell)?;
        session.set_blocking(false);

        let mut this = Self {
            device: device.name.clone(),
            _session: session,
            channel,
            prompt: String::new(),
            in_config_mode: false,
            closed: false,
            timeouts,
        };

        // Drain the banner and learn the prompt by nudging the shell.
        this.write_line("")?;
        let banner = this.read_until_prompt("", timeouts.command)?;
        trace!("Banner from '{}': {} bytes", this.device, banner.len());
        Ok(this)
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn in_config_mode(&self) -> bool {
        self.in_config_mode
    }

    /// Sends one command line and drains output until the prompt returns or
    /// the timeout elapses. The returned block excludes the echoed command
    /// and the prompt itself.
    pub fn send(&mut self, command: &str, timeout: Option<Duration>) -> Result<String, SshError> {
        if self.closed {
            return Err(SshError::Closed);
        }
        let timeout = timeout.unwrap_or(self.timeouts.command);

        trace!("'{}' <- '{}'", self.device, command);
        self.write_line(command)?;
        let raw = self.read_until_prompt(command, timeout)?;
        Ok(strip_echo_and_prompt(&raw, command))
    }

    /// Enters configuration mode and verifies the `cfg` prompt fragment.
    pub fn enter_config(&mut self) -> Result<(), SshError> {
        self.send("configure", None)?;
        std::thread::sleep(MODE_SETTLE);
        if !CONFIG_PROMPT.is_match(&self.prompt) {
            return Err(SshError::ConfigModeEntry {
                prompt: self.prompt.clone(),
            });
        }
        self.in_config_mode = true;
        Ok(())
    }

    /// Leaves configuration mode. The caller decides whether a `rollback`
    /// precedes this.
    pub fn exit_config(&mut self) -> Result<String, SshError> {
        let output = self.send("exit", None)?;
        std::thread::sleep(MODE_SETTLE);
        self.in_config_mode = false;
        Ok(output)
    }

    /// Releases the shell. Idempotent; never fails.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.channel.send_eof();
        let _ = self.channel.close();
        debug!("Closed SSH session to '{}'", self.device);
    }

    fn write_line(&mut self, command: &str) -> Result<(), SshError> {
        let deadline = Instant::now() + self.timeouts.command;
        let line = format!("{command}\n");
        let mut written = 0;
        let bytes = line.as_bytes();
        while written < bytes.len() {
            match self.channel.write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(SshError::Write(e));
                    }
                    std::thread::sleep(READ_POLL);
                }
                Err(e) => return Err(SshError::Write(e)),
            }
        }
        let _ = self.channel.flush();
        Ok(())
    }

    /// Accumulates channel output until a prompt line terminates it or the
    /// deadline passes. Advances through `--More--` pager stops, though
    /// read commands are expected to suppress the pager with `| no-more`.
    fn read_until_prompt(&mut self, command: &str, timeout: Duration) -> Result<String, SshError> {
        let deadline = Instant::now() + timeout;
        let mut buffer = String::new();
        let mut chunk = [0u8; 4096];

        loop {
            match self.channel.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) if self.channel.eof() => return Err(SshError::Closed),
                Err(_) => {}
            }

            if pager_active(&buffer) {
                warn!(
                    "Pager active on '{}' during '{}'; advancing",
                    self.device, command
                );
                if let Err(e) = self.channel.write_all(b" ") {
                    if e.kind() != std::io::ErrorKind::WouldBlock {
                        return Err(SshError::Write(e));
                    }
                }
            } else if let Some(prompt) = last_prompt_line(&buffer) {
                self.prompt = prompt.to_string();
                return Ok(buffer);
            }

            if Instant::now() >= deadline {
                return Err(SshError::PromptTimeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            std::thread::sleep(READ_POLL);
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// The final line of the buffer if it looks like a device prompt.
fn last_prompt_line(buffer: &str) -> Option<&str> {
    let cleaned = buffer.trim_end_matches([' ', '\t']);
    let last = cleaned.rsplit(['\n', '\r']).next()?;
    let trimmed = last.trim();
    if !trimmed.is_empty() && PROMPT_LINE.is_match(trimmed) {
        Some(trimmed)
    } else {
        None
    }
}

/// Removes the echoed command line and the trailing prompt from a raw
/// capture, then cleans pager artifacts.
fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let cleaned = clean_capture(raw);
    let mut lines: Vec<&str> = cleaned.lines().collect();

    while let Some(last) = lines.last() {
        let trimmed = last.trim();
        if trimmed.is_empty() || PROMPT_LINE.is_match(trimmed) {
            lines.pop();
        } else {
            break;
        }
    }

    if let Some(first) = lines.first() {
        if first.trim_end().ends_with(command.trim()) {
            lines.remove(0);
        }
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_detection() {
        assert_eq!(
            last_prompt_line("show interfaces\r\noutput line\r\ndnaas-leaf-b14# "),
            Some("dnaas-leaf-b14#")
        );
        assert_eq!(
            last_prompt_line("partial output with no prompt\r\n| table |"),
            None
        );
        // Mid-buffer prompts do not terminate the read.
        assert_eq!(last_prompt_line("dnaas-leaf-b14#\r\nstill printing"), None);
    }

    #[test]
    fn test_config_prompt_fragment() {
        assert!(CONFIG_PROMPT.is_match("dnaas-leaf-b14(cfg)#"));
        assert!(CONFIG_PROMPT.is_match("dnaas-leaf-b14(cfg-if)#"));
        assert!(!CONFIG_PROMPT.is_match("dnaas-leaf-b14#"));
    }

    #[test]
    fn test_strip_echo_and_prompt() {
        let raw = "show network-services bridge-domain\r\nBridge domain: g_visaev_v253\r\n  Admin state: enabled\r\ndnaas-leaf-b14# ";
        assert_eq!(
            strip_echo_and_prompt(raw, "show network-services bridge-domain"),
            "Bridge domain: g_visaev_v253\n  Admin state: enabled\n"
        );
    }

    #[test]
    fn test_detect_error_markers() {
        assert_eq!(
            detect_error("ERROR: access-denied for user\n"),
            Some((
                DeviceErrorKind::AccessDenied,
                "ERROR: access-denied for user".to_string()
            ))
        );
        assert_eq!(
            detect_error("% Unknown command\n").map(|(k, _)| k),
            Some(DeviceErrorKind::Syntax)
        );
        assert_eq!(
            detect_error("ERROR: invalid-value for vlan-id\n").map(|(k, _)| k),
            Some(DeviceErrorKind::InvalidValue)
        );
        assert_eq!(
            detect_error("ERROR: commit failed\n").map(|(k, _)| k),
            Some(DeviceErrorKind::General)
        );
        assert_eq!(detect_error("all good\nno errors here\n"), None);
    }
}
