use miette::Diagnostic;
use thiserror::Error;

/// Error type for ZFS command construction, execution and output parsing
#[derive(Error, Debug, Diagnostic)]
pub enum ZfsError {
    /// A required builder field was left empty
    #[error("{command}: missing required field '{field}'")]
    #[diagnostic(
        code(cstor::zfs::missing_field),
        help("Set '{field}' on the {command} builder before calling build() or execute()")
    )]
    MissingField {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        field: String,
    },

    /// Vdev list cannot be laid out for the requested type
    #[error("Invalid vdev layout: {message}")]
    #[diagnostic(
        code(cstor::zfs::invalid_vdev_layout),
        help("A group needs at least one device and mirror groups need an even device count")
    )]
    InvalidVdevLayout {
        #[allow(unused)]
        message: String,
    },

    /// Command ran and exited nonzero
    #[error("Command '{command}' failed with exit code {exit_code}: {output}")]
    #[diagnostic(
        code(cstor::zfs::command_failed),
        help("Inspect the command output. Check that zrepl is running and the pool is imported")
    )]
    CommandFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        exit_code: i32,
        #[allow(unused)]
        output: String,
    },

    /// Command could not be started
    #[error("Failed to spawn '{command}': {message}")]
    #[diagnostic(
        code(cstor::zfs::spawn_failed),
        help("Verify the zpool/zfs binaries are installed and on PATH")
    )]
    SpawnFailed {
        #[allow(unused)]
        command: String,
        #[allow(unused)]
        message: String,
    },

    /// Command output did not match the expected shape
    #[error("Failed to parse {what}: {message}")]
    #[diagnostic(
        code(cstor::zfs::parse_failure),
        help("The output format may have changed with the ZFS version. Raw output: {raw}")
    )]
    ParseFailure {
        #[allow(unused)]
        what: String,
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        raw: String,
    },
}

/// Result type alias for ZFS operations
pub type Result<T> = std::result::Result<T, ZfsError>;

impl ZfsError {
    pub fn missing_field(command: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            command: command.into(),
            field: field.into(),
        }
    }

    pub fn invalid_vdev_layout(message: impl Into<String>) -> Self {
        Self::InvalidVdevLayout {
            message: message.into(),
        }
    }

    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        output: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    pub fn spawn_failed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn parse_failure(
        what: impl Into<String>,
        message: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        Self::ParseFailure {
            what: what.into(),
            message: message.into(),
            raw: raw.into(),
        }
    }

    /// Builder validation failures; retrying without a spec change cannot succeed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ZfsError::MissingField { .. } | ZfsError::InvalidVdevLayout { .. }
        )
    }

    /// The command failed because the target dataset or pool does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            ZfsError::CommandFailed { output, .. } => {
                output.contains("dataset does not exist") || output.contains("no such pool")
            }
            _ => false,
        }
    }
}
