//! Operator I/O: line prompts, marked status lines and browser launching.

use std::io;
use std::path::PathBuf;
use std::process::Command;

/// Line-based conversation with whoever runs the wizard.
///
/// Answers come back trimmed; an empty answer means "use the default" to every
/// caller in this crate.
pub trait Operator {
    fn ask(&mut self, prompt: &str) -> io::Result<String>;

    /// Section heading for the next group of prompts.
    fn step(&mut self, message: &str);
    fn info(&mut self, message: &str);
    fn warning(&mut self, message: &str);
    fn success(&mut self, message: &str);
    fn failure(&mut self, message: &str);
    /// Short "still waiting" marker, e.g. one per readiness probe.
    fn progress(&mut self, message: &str);

    /// `(y/n)` question. Only an explicit "n" declines.
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        let answer = self.ask(&format!("{} (y/n)", prompt))?;
        Ok(!answer.eq_ignore_ascii_case("n"))
    }
}

/// Interactive terminal operator built on cliclack.
#[derive(Debug, Default)]
pub struct TerminalOperator;

fn report(result: io::Result<()>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "failed to write to terminal");
    }
}

impl Operator for TerminalOperator {
    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        let value: String = cliclack::input(prompt).required(false).interact()?;
        Ok(value.trim().to_string())
    }

    fn step(&mut self, message: &str) {
        report(cliclack::log::step(message));
    }

    fn info(&mut self, message: &str) {
        report(cliclack::log::info(message));
    }

    fn warning(&mut self, message: &str) {
        report(cliclack::log::warning(message));
    }

    fn success(&mut self, message: &str) {
        report(cliclack::log::success(format!("✓ {}", message)));
    }

    fn failure(&mut self, message: &str) {
        report(cliclack::log::error(format!("✗ {}", message)));
    }

    fn progress(&mut self, message: &str) {
        report(cliclack::log::remark(message));
    }
}

pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Launches the platform's default browser without waiting for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener {
    termux: bool,
}

impl SystemOpener {
    pub fn detect() -> Self {
        Self {
            termux: is_termux(),
        }
    }

    fn command(&self, url: &str) -> Command {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            cmd
        } else if cfg!(target_os = "windows") {
            let mut cmd = Command::new("rundll32");
            cmd.args(["url.dll,FileProtocolHandler", url]);
            cmd
        } else if self.termux {
            let mut cmd = Command::new("termux-open-url");
            cmd.arg(url);
            cmd
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            cmd
        }
    }
}

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> io::Result<()> {
        self.command(url).spawn().map(|_| ())
    }
}

pub fn is_termux() -> bool {
    cfg!(target_os = "android")
        || std::env::var("PATH")
            .map(|path| path.contains("com.termux"))
            .unwrap_or(false)
}

fn termux_cert_path(prefix: &str) -> PathBuf {
    PathBuf::from(prefix).join("etc/tls/cert.pem")
}

/// Point TLS at Termux's CA bundle. Must run before any thread is spawned.
pub fn prepare_environment() {
    if !is_termux() {
        return;
    }
    let prefix = std::env::var("PREFIX").unwrap_or_default();
    let cert = termux_cert_path(&prefix);
    tracing::debug!(path = %cert.display(), "using Termux certificate bundle");
    std::env::set_var("SSL_CERT_FILE", cert);
}
