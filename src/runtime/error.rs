use std::fmt;
use std::time::Duration;

/// Why a runtime CLI invocation failed.
///
/// Every call in [`super::RuntimeClient`] ends in one of four ways: the
/// subprocess outlived its deadline, it exited non-zero, it could not be
/// spawned at all, or it succeeded but printed something the client could
/// not interpret. Daemon outages are not a separate case — they surface as
/// non-zero exits whose detail carries the daemon's own complaint, and
/// health probes return `bool` rather than an error.
#[derive(Debug)]
pub enum RuntimeError {
    /// The subprocess did not finish within its deadline.
    Expired { command: String, waited: Duration },

    /// The subprocess finished with a non-zero exit. `detail` is the
    /// trimmed stderr (or a caller-supplied summary when stderr was
    /// streamed to the terminal, as during image builds).
    Exit {
        command: String,
        code: Option<i32>,
        detail: String,
    },

    /// The runtime binary itself could not be started (missing from PATH,
    /// permission denied).
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    /// The subprocess succeeded but its output defied parsing (e.g. a
    /// non-numeric exit code from `wait`).
    Garbled { command: String, output: String },
}

impl RuntimeError {
    pub fn expired(command: impl Into<String>, waited: Duration) -> Self {
        RuntimeError::Expired {
            command: command.into(),
            waited,
        }
    }

    /// Build an `Exit` from a finished subprocess, taking its stderr as the
    /// detail line.
    pub fn exit(command: impl Into<String>, output: &std::process::Output) -> Self {
        RuntimeError::Exit {
            command: command.into(),
            code: output.status.code(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Build an `Exit` with a caller-supplied detail, for commands whose
    /// stderr went to the terminal instead of a pipe.
    pub fn exit_with(
        command: impl Into<String>,
        detail: impl Into<String>,
        code: Option<i32>,
    ) -> Self {
        RuntimeError::Exit {
            command: command.into(),
            code,
            detail: detail.into(),
        }
    }

    pub fn spawn(binary: impl Into<String>, source: std::io::Error) -> Self {
        RuntimeError::Spawn {
            binary: binary.into(),
            source,
        }
    }

    pub fn garbled(command: impl Into<String>, output: impl Into<String>) -> Self {
        RuntimeError::Garbled {
            command: command.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Expired { command, waited } => {
                write!(
                    f,
                    "runtime command '{}' still running after {}s, gave up",
                    command,
                    waited.as_secs()
                )
            }
            RuntimeError::Exit {
                command,
                code,
                detail,
            } => match code {
                Some(code) => write!(f, "'{}' exited with {}: {}", command, code, detail),
                None => write!(f, "'{}' was killed by a signal: {}", command, detail),
            },
            RuntimeError::Spawn { binary, source } => {
                write!(f, "could not launch '{}': {}", binary, source)
            }
            RuntimeError::Garbled { command, output } => {
                write!(f, "could not parse output of '{}': {:?}", command, output)
            }
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let RuntimeError::Spawn { source, .. } = self {
            Some(source)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn exit_captures_stderr_and_code() {
        use std::os::unix::process::ExitStatusExt;
        let output = std::process::Output {
            // Raw wait status 256 decodes as "exited with code 1"
            status: std::process::ExitStatus::from_raw(256),
            stdout: Vec::new(),
            stderr: b"no such network\n".to_vec(),
        };
        let err = RuntimeError::exit("docker run", &output);
        let message = err.to_string();
        assert!(message.contains("docker run"));
        assert!(message.contains("exited with 1"));
        assert!(message.contains("no such network"));
    }

    #[test]
    fn signal_death_has_its_own_wording() {
        let err = RuntimeError::exit_with("docker stop web", "terminated", None);
        assert!(err.to_string().contains("killed by a signal"));
    }

    #[test]
    fn expired_reports_the_deadline() {
        let err = RuntimeError::expired("docker wait job", Duration::from_secs(300));
        assert!(err.to_string().contains("300s"));
    }

    #[test]
    fn spawn_preserves_the_io_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = RuntimeError::spawn("podman", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("podman"));
    }
}
