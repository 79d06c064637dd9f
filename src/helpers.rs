//! External helper programs (update and list utility).
//!
//! The handler blocks on a helper until its output is drained. The
//! [`HelperRunner`] seam keeps that call swappable, and lets tests record
//! invocations instead of spawning processes.

use log::debug;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

pub trait HelperRunner {
    /// Run `program` with `args` and return its output lines.
    fn run(&mut self, program: &Path, args: &[String]) -> io::Result<Vec<String>>;
}

/// Runs helpers as child processes: stdout lines first, then stderr lines.
#[derive(Debug, Default)]
pub struct ScriptHelpers;

impl HelperRunner for ScriptHelpers {
    fn run(&mut self, program: &Path, args: &[String]) -> io::Result<Vec<String>> {
        debug!("Running {} {:?}", program.display(), args);
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );
        debug!("{} exited with {}", program.display(), output.status);
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_stdout_then_stderr() {
        let mut helpers = ScriptHelpers;
        let lines = helpers
            .run(
                Path::new("/bin/sh"),
                &["-c".to_string(), "echo one; echo two >&2; echo three".to_string()],
            )
            .unwrap();
        assert_eq!(lines, vec!["one", "three", "two"]);
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut helpers = ScriptHelpers;
        assert!(helpers
            .run(Path::new("/nonexistent/helper"), &[])
            .is_err());
    }
}
