use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitStatus {
    Success,
    /// Exited with a non-zero status (`None` when killed by a signal).
    Failed(Option<i32>),
    TimedOut,
    /// The program could not be started at all.
    Unavailable(String),
}

impl GitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, GitStatus::Success)
    }
}

/// Synchronous git invocations. `timeout: None` waits for as long as it takes.
pub trait GitRunner {
    fn run(&self, args: &[&str], cwd: &Path, timeout: Option<Duration>) -> GitStatus;
}

pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run_with_timeout(mut command: Command, timeout: Duration) -> GitStatus {
        let mut child = match command.stdout(Stdio::null()).stderr(Stdio::null()).spawn() {
            Ok(child) => child,
            Err(err) => return GitStatus::Unavailable(err.to_string()),
        };

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return GitStatus::Success,
                Ok(Some(status)) => return GitStatus::Failed(status.code()),
                Ok(None) => {
                    if start.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return GitStatus::TimedOut;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(err) => return GitStatus::Unavailable(err.to_string()),
            }
        }
    }

    fn run_to_completion(mut command: Command) -> GitStatus {
        match command.stdout(Stdio::null()).stderr(Stdio::piped()).output() {
            Ok(output) if output.status.success() => GitStatus::Success,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!("git failed: {}", stderr.trim());
                GitStatus::Failed(output.status.code())
            }
            Err(err) => GitStatus::Unavailable(err.to_string()),
        }
    }
}

impl GitRunner for GitCli {
    fn run(&self, args: &[&str], cwd: &Path, timeout: Option<Duration>) -> GitStatus {
        let mut command = Command::new(&self.program);
        // Never block on a credential prompt for a missing or private repository.
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never");
        tracing::debug!("git {} (in {})", args.join(" "), cwd.display());

        match timeout {
            Some(timeout) => Self::run_with_timeout(command, timeout),
            None => Self::run_to_completion(command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new("plugman-definitely-not-a-real-binary");
        let status = git.run(&["--version"], dir.path(), Some(Duration::from_secs(1)));
        assert!(matches!(status, GitStatus::Unavailable(_)));

        let status = git.run(&["--version"], dir.path(), None);
        assert!(matches!(status, GitStatus::Unavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn git_never_prompts_for_credentials() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-git");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '%s %s' \"${GIT_TERMINAL_PROMPT:-unset}\" \"${GCM_INTERACTIVE:-unset}\" > \"$(dirname \"$0\")/env.txt\"\nexit 128\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let git = GitCli::new(script.display().to_string());
        let status = git.run(&["clone", "https://github.com/x/private", "P"], dir.path(), None);

        assert_eq!(status, GitStatus::Failed(Some(128)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("env.txt")).unwrap(),
            "0 never"
        );
    }
}
