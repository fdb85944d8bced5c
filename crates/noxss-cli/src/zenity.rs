//! Desktop dialog confirmation backend
//!
//! Asks the operator with `zenity --question`. Zenity exits 0 for "Yes" and
//! 1 for "No" (or a closed dialog); any other outcome means the dialog could
//! not be shown.
//!
//! Dialogs are shown one at a time. With `--confirm-timeout`, a dialog that
//! outlives its request stays open until answered, and later questions
//! queue behind it.

use noxss::gateway::DIALOG_TITLE;
use noxss::{ConfirmationGateway, GatewayError};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Exit status zenity uses for a declined question.
const DECLINED_STATUS: i32 = 1;

/// Confirmation via a zenity question dialog.
#[derive(Debug)]
pub struct ZenityGateway {
    bin: PathBuf,
    dialog_lock: Mutex<()>,
}

impl ZenityGateway {
    /// Use the zenity binary at `bin`.
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            dialog_lock: Mutex::new(()),
        }
    }

    /// Path of the zenity binary.
    #[must_use]
    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Check that zenity can be executed.
    ///
    /// Run once at startup so a missing dialog tool is reported before any
    /// traffic is accepted.
    pub fn preflight(&self) -> Result<(), GatewayError> {
        let status = Command::new(&self.bin)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| GatewayError::Spawn { source })?;
        if status.success() {
            Ok(())
        } else {
            Err(GatewayError::Unavailable(format!(
                "{} --help failed with {}",
                self.bin.display(),
                status
            )))
        }
    }
}

impl ConfirmationGateway for ZenityGateway {
    fn confirm(&self, message: &str) -> Result<bool, GatewayError> {
        let _guard = self
            .dialog_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug!("Opening confirmation dialog via {}", self.bin.display());
        let status = Command::new(&self.bin)
            .args(["--question", "--text", message, "--title", DIALOG_TITLE])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| GatewayError::Spawn { source })?;
        interpret_status(status)
    }

    fn backend_name(&self) -> &str {
        "zenity"
    }
}

/// Map a dialog exit status to an answer.
fn interpret_status(status: ExitStatus) -> Result<bool, GatewayError> {
    match status.code() {
        Some(0) => Ok(true),
        Some(DECLINED_STATUS) => Ok(false),
        Some(code) => Err(GatewayError::Unavailable(format!(
            "dialog exited with status {}",
            code
        ))),
        None => Err(GatewayError::Unavailable(
            "dialog terminated by signal".to_string(),
        )),
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for zenity.
    fn fake_zenity(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("zenity");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_approved() {
        let dir = TempDir::new().unwrap();
        let gateway = ZenityGateway::new(fake_zenity(&dir, "exit 0"));
        assert!(gateway.confirm("question").unwrap());
    }

    #[test]
    fn test_declined() {
        let dir = TempDir::new().unwrap();
        let gateway = ZenityGateway::new(fake_zenity(&dir, "exit 1"));
        assert!(!gateway.confirm("question").unwrap());
    }

    #[test]
    fn test_other_exit_status_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let gateway = ZenityGateway::new(fake_zenity(&dir, "exit 5"));
        let err = gateway.confirm("question").unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let gateway = ZenityGateway::new(dir.path().join("no-such-zenity"));
        assert!(matches!(
            gateway.confirm("question").unwrap_err(),
            GatewayError::Spawn { .. }
        ));
        assert!(gateway.preflight().is_err());
    }

    #[test]
    fn test_passes_question_and_title() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("args");
        let script = format!("printf '%s\\n' \"$@\" > '{}'\nexit 0", out.display());
        let gateway = ZenityGateway::new(fake_zenity(&dir, &script));

        let message = noxss::gateway::confirmation_message("http://b.test/x");
        assert!(gateway.confirm(&message).unwrap());

        let args = std::fs::read_to_string(&out).unwrap();
        assert!(args.starts_with("--question\n--text\nDo you want to run the following request?"));
        assert!(args.contains("http://b.test/x"));
        assert!(args.ends_with("--title\nNoxss\n"));
    }

    #[test]
    fn test_dialogs_are_shown_one_at_a_time() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("open");
        let script = format!(
            "mkdir '{0}' 2>/dev/null || exit 5\nsleep 0.2\nrmdir '{0}'\nexit 0",
            lock.display()
        );
        let gateway = ZenityGateway::new(fake_zenity(&dir, &script));

        std::thread::scope(|s| {
            let answers: Vec<_> = (0..3)
                .map(|_| s.spawn(|| gateway.confirm("question")))
                .collect();
            for answer in answers {
                assert!(answer.join().unwrap().unwrap());
            }
        });
    }

    #[test]
    fn test_preflight_ok() {
        let dir = TempDir::new().unwrap();
        let gateway = ZenityGateway::new(fake_zenity(&dir, "exit 0"));
        assert!(gateway.preflight().is_ok());
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(ZenityGateway::new("/usr/bin/zenity").backend_name(), "zenity");
    }
}
