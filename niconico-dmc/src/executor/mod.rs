//! Runs the external media inspection tool.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// A single invocation of an external program.
///
/// # Example
///
/// ```rust,no_run
/// # use niconico_dmc::executor::Executor;
/// # use std::path::PathBuf;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let executor = Executor {
///     executable_path: PathBuf::from("ffprobe"),
///     timeout: Duration::from_secs(30),
///     args: vec!["-version".to_string()],
/// };
///
/// let output = executor.execute().await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Executor {
    /// The path to the program.
    pub executable_path: PathBuf,
    /// How long the program may run before it is killed.
    pub timeout: Duration,

    /// The arguments to pass to the program.
    pub args: Vec<String>,
}

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// The stdout of the process.
    pub stdout: String,
    /// The stderr of the process.
    pub stderr: String,
    /// The exit code of the process, `-1` when killed by a signal.
    pub code: i32,
}

impl Executor {
    /// Runs the program to completion and collects its output.
    ///
    /// # Errors
    ///
    /// Fails if the program cannot be spawned, exits unsuccessfully, prints non UTF-8 text,
    /// or outlives the timeout.
    pub async fn execute(&self) -> Result<ProcessOutput> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Executing command: {:?}", self);

        let mut command = tokio::process::Command::new(&self.executable_path);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(target_os = "windows")]
        {
            command.creation_flags(0x08000000);
        }

        let mut child = command.spawn()?;

        let mut stdout_handle = child
            .stdout
            .take()
            .ok_or_else(|| Error::Command("Failed to capture stdout".to_string()))?;
        let mut stderr_handle = child
            .stderr
            .take()
            .ok_or_else(|| Error::Command("Failed to capture stderr".to_string()))?;

        // Drain both pipes while waiting, ffprobe output on large containers can fill them.
        let stdout_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            stdout_handle.read_to_end(&mut buffer).await?;
            Ok::<Vec<u8>, std::io::Error>(buffer)
        });
        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            stderr_handle.read_to_end(&mut buffer).await?;
            Ok::<Vec<u8>, std::io::Error>(buffer)
        });

        let exit_status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Process timed out after {:?}, killing it", self.timeout);

                if let Err(_e) = child.kill().await {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to kill process after timeout: {}", _e);
                }

                return Err(Error::Timeout(self.timeout));
            }
        };

        let stdout = String::from_utf8(stdout_task.await??)
            .map_err(|_| Error::Command("Failed to parse stdout as UTF-8".to_string()))?;
        let stderr = String::from_utf8(stderr_task.await??)
            .map_err(|_| Error::Command("Failed to parse stderr as UTF-8".to_string()))?;

        let code = exit_status.code().unwrap_or(-1);
        if exit_status.success() {
            return Ok(ProcessOutput {
                stdout,
                stderr,
                code,
            });
        }

        Err(Error::Command(format!(
            "{} failed with code {}: {}",
            self.executable_path.display(),
            code,
            stderr.trim()
        )))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_stdout_of_successful_process() {
        let executor = Executor {
            executable_path: PathBuf::from("sh"),
            timeout: Duration::from_secs(5),
            args: vec!["-c".into(), "printf '{\"streams\":[]}'".into()],
        };

        let output = executor.execute().await.unwrap();
        assert_eq!(output.stdout, "{\"streams\":[]}");
        assert_eq!(output.code, 0);
    }

    #[tokio::test]
    async fn failing_process_reports_stderr() {
        let executor = Executor {
            executable_path: PathBuf::from("sh"),
            timeout: Duration::from_secs(5),
            args: vec!["-c".into(), "echo 'Invalid data' >&2; exit 1".into()],
        };

        let err = executor.execute().await.unwrap_err();
        match err {
            Error::Command(message) => assert!(message.contains("Invalid data")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_an_io_error() {
        let executor = Executor {
            executable_path: PathBuf::from("/nonexistent/ffprobe"),
            timeout: Duration::from_secs(5),
            args: Vec::new(),
        };

        assert!(matches!(executor.execute().await, Err(Error::IO(_))));
    }
}
