//! Value types passed through the node capability set

use std::time::Duration;

use crate::error::TestbedError;

/// Exit code reported for a command that ran past its deadline
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported when a command ended without one (killed by a signal)
pub const SIGNALED_EXIT_CODE: i32 = 1;

/// Deadline scope for a single node operation
///
/// Each operation gets its own context, so an expired deadline on one node
/// never cancels work on another.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecContext {
    pub timeout: Option<Duration>,
}

impl ExecContext {
    /// No deadline
    pub fn background() -> Self {
        Self { timeout: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Captured result of a command executed in a node's environment
#[derive(Debug)]
pub struct Output {
    pub args: Vec<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    /// Failure that still produced output (deadline exceeded)
    pub error: Option<TestbedError>,
}

impl Output {
    pub fn new(args: Vec<String>, stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i32) -> Self {
        Self {
            args,
            stdout,
            stderr,
            exit_code,
            error: None,
        }
    }

    /// Successful operation with nothing captured
    pub fn empty(args: Vec<String>) -> Self {
        Self::new(args, Vec::new(), Vec::new(), 0)
    }

    /// Successful operation whose result is a line of text
    pub fn text(args: Vec<String>, text: &str) -> Self {
        let mut stdout = text.as_bytes().to_vec();
        if !text.ends_with('\n') {
            stdout.push(b'\n');
        }
        Self::new(args, stdout, Vec::new(), 0)
    }

    /// Command killed after exceeding `timeout`
    pub fn timed_out(args: Vec<String>, timeout: Duration) -> Self {
        let command = args.join(" ");
        Self {
            args,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: TIMEOUT_EXIT_CODE,
            error: Some(TestbedError::CommandTimeout { command, timeout }),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Record a non-zero exit as this output's error, keeping the captures
    pub fn with_exit_error(mut self) -> Self {
        if self.error.is_none() && self.exit_code != 0 {
            self.error = Some(TestbedError::process(format!(
                "{:?} exited with code {}",
                self.args.join(" "),
                self.exit_code
            )));
        }
        self
    }

    /// Turn a non-zero exit or carried error into an `Err`
    pub fn into_result(mut self) -> Result<Self, TestbedError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if self.exit_code != 0 {
            return Err(TestbedError::process(format!(
                "{:?} exited with code {}: {}",
                self.args.join(" "),
                self.exit_code,
                self.stderr_str().trim()
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_timed_out_output() {
        let output = Output::timed_out(args(&["ipfs", "id"]), Duration::from_millis(50));
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!output.success());
        assert!(output.error.as_ref().unwrap().is_timeout());
    }

    #[test]
    fn test_into_result_reports_stderr() {
        let output = Output::new(args(&["ipfs", "init"]), Vec::new(), b"repo exists\n".to_vec(), 1);
        let err = output.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("code 1"));
        assert!(text.contains("repo exists"));
    }

    #[test]
    fn test_exit_error_keeps_captures() {
        let output = Output::new(args(&["false"]), b"partial".to_vec(), Vec::new(), 3).with_exit_error();
        assert_eq!(output.stdout_str(), "partial");
        assert!(output.error.as_ref().unwrap().to_string().contains("code 3"));

        let clean = Output::empty(args(&["true"])).with_exit_error();
        assert!(clean.error.is_none());
    }

    #[test]
    fn test_text_output_is_line_terminated() {
        assert_eq!(Output::text(args(&["get", "id"]), "QmA").stdout_str(), "QmA\n");
        assert_eq!(Output::text(args(&["logs"]), "a\nb\n").stdout_str(), "a\nb\n");
    }

    #[test]
    fn test_into_result_passes_success() {
        let output = Output::new(args(&["true"]), b"ok".to_vec(), Vec::new(), 0);
        let output = output.into_result().unwrap();
        assert_eq!(output.stdout_str(), "ok");
    }
}
