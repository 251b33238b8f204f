use crate::error::{Result, ZfsError};
use async_trait::async_trait;
use tracing::debug;

pub const ZPOOL: &str = "zpool";
pub const ZFS: &str = "zfs";

/// Output from a command execution, stdout and stderr combined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_code: 0,
        }
    }

    pub fn failure(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external binaries
///
/// `SystemRunner` spawns real processes. `MockRunner` replays scripted output and
/// records every invocation for tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, returning output regardless of exit code
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Executing: {} {}", program, args.join(" "));

        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                ZfsError::spawn_failed(format!("{} {}", program, args.join(" ")), e.to_string())
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);

        debug!(
            "Command exited with code {}: {} {}",
            exit_code,
            program,
            args.join(" ")
        );

        Ok(CommandOutput {
            output: combined,
            exit_code,
        })
    }
}

/// Run a command and fail on non-zero exit code
pub async fn exec(runner: &dyn CommandRunner, program: &str, args: &[String]) -> Result<String> {
    let output = runner.run(program, args).await?;

    if !output.is_success() {
        return Err(ZfsError::command_failed(
            format!("{} {}", program, args.join(" ")),
            output.exit_code,
            output.output.trim(),
        ));
    }

    Ok(output.output)
}

/// A typed command for one of the ZFS binaries
#[async_trait]
pub trait ZfsCommand: Sync {
    /// Binary the command runs under
    fn program(&self) -> &'static str;

    /// Render the argument vector, validating required fields
    fn build(&self) -> Result<Vec<String>>;

    /// Build and run the command, returning its combined output
    async fn execute(&self, runner: &dyn CommandRunner) -> Result<String> {
        let args = self.build()?;
        exec(runner, self.program(), &args).await
    }
}

/// Fail with `MissingField` when `value` is empty
pub(crate) fn require(command: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ZfsError::missing_field(command, field));
    }
    Ok(())
}

/// Render a combined scripted/parsable flag such as "-Hp"
pub(crate) fn mode_flags(scripted: bool, parsable: bool) -> Option<String> {
    let mut flag = String::from("-");
    if scripted {
        flag.push('H');
    }
    if parsable {
        flag.push('p');
    }
    (flag.len() > 1).then_some(flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_system_runner_combines_output() {
        let args = vec!["-c".to_string(), "echo out; echo err 1>&2; exit 3".to_string()];
        let output = SystemRunner.run("sh", &args).await.unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.output.contains("out"));
        assert!(output.output.contains("err"));
    }

    #[tokio::test]
    async fn test_exec_maps_failure() {
        let args = vec!["-c".to_string(), "echo boom; exit 1".to_string()];
        let err = exec(&SystemRunner, "sh", &args).await.unwrap_err();
        match err {
            ZfsError::CommandFailed {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let err = SystemRunner
            .run("/nonexistent/zpool-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ZfsError::SpawnFailed { .. }));
    }

    #[test]
    fn test_mode_flags() {
        assert_eq!(mode_flags(true, true).as_deref(), Some("-Hp"));
        assert_eq!(mode_flags(true, false).as_deref(), Some("-H"));
        assert_eq!(mode_flags(false, false), None);
    }
}
