//! Piped subprocess
//!
//! A child whose stdin is a pipe owned by us and whose stdout and stderr go
//! to files chosen by the caller. The pipe is closed and the child reaped on
//! every exit path.

use std::fs::File;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

/// Running child fed through its stdin
#[derive(Debug)]
pub struct PipedChild {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    status: Option<ExitStatus>,
}

impl PipedChild {
    /// Start `program` with stdout and stderr redirected to the given files
    pub fn spawn(program: &str, args: &[String], stdout: File, stderr: File) -> io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?;

        tracing::debug!(program, ?args, pid = child.id(), "spawned");

        let stdin = child.stdin.take();
        Ok(Self {
            program: program.to_string(),
            child,
            stdin,
            status: None,
        })
    }

    /// Program name, for diagnostics
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Feed `data` to the child
    ///
    /// Fails with `BrokenPipe` once the child has stopped reading.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write_all(data),
            None => Err(io::ErrorKind::BrokenPipe.into()),
        }
    }

    /// Close the pipe and wait for the child to exit
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        drop(self.stdin.take());
        let status = self.child.wait()?;
        tracing::debug!(program = %self.program, %status, "exited");
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for PipedChild {
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek};

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_stdin_reaches_stdout_file() {
        let mut out = tempfile::tempfile().unwrap();
        let err = tempfile::tempfile().unwrap();

        let mut child =
            PipedChild::spawn("cat", &[], out.try_clone().unwrap(), err).unwrap();
        child.write_all(b"through the pipe").unwrap();
        assert!(child.wait().unwrap().success());

        let mut text = String::new();
        out.rewind().unwrap();
        out.read_to_string(&mut text).unwrap();
        assert_eq!(text, "through the pipe");
    }

    #[test]
    fn test_stderr_and_exit_status() {
        let out = tempfile::tempfile().unwrap();
        let mut err = tempfile::tempfile().unwrap();

        let mut child =
            PipedChild::spawn("sh", &sh("echo oops >&2; exit 3"), out, err.try_clone().unwrap())
                .unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(child.wait().unwrap().code(), Some(3));

        let mut text = String::new();
        err.rewind().unwrap();
        err.read_to_string(&mut text).unwrap();
        assert_eq!(text.trim(), "oops");
    }

    #[test]
    fn test_write_after_wait_is_broken_pipe() {
        let out = tempfile::tempfile().unwrap();
        let err = tempfile::tempfile().unwrap();
        let mut child = PipedChild::spawn("true", &[], out, err).unwrap();
        child.wait().unwrap();
        let e = child.write_all(b"late").unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_missing_program() {
        let out = tempfile::tempfile().unwrap();
        let err = tempfile::tempfile().unwrap();
        assert!(PipedChild::spawn("/nonexistent/insturl-helper", &[], out, err).is_err());
    }
}
