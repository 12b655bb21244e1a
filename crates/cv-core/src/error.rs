use thiserror::Error;

/// Failure of an external firewall command (dump, zero counters, restart)
#[derive(Debug, Error)]
pub enum CommandError {
    /// The binary does not exist or is disabled for this session
    #[error("{program} not found")]
    NotFound { program: String },

    /// The command ran but exited unsuccessfully
    #[error("{program} exited with {}: {stderr}", exit_code_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Spawning or talking to the process failed
    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn from_io(program: impl Into<String>, source: std::io::Error) -> Self {
        let program = program.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            CommandError::NotFound { program }
        } else {
            CommandError::Io { program, source }
        }
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "signal".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseNameError {
    #[error("unknown address family '{0}' (expected v4 or v6)")]
    Family(String),

    #[error("unknown table '{0}' (expected filter, nat, mangle or raw)")]
    Table(String),
}
