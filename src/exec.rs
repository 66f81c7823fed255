// src/exec.rs

//! Script execution seam for the build pipeline
//!
//! Pipeline stages never spawn processes directly: they hand a [`Job`] to
//! an [`Executor`]. The jobs carry everything an external runtime needs,
//! an optional container image, bind mounts, a variable set and a script
//! body, so a container-backed executor can be dropped in without
//! touching the pipeline. [`HostExecutor`] is the built-in implementation
//! that runs imageless jobs in a local bash subprocess.

use crate::bash::{serialize, Variables};
use crate::build::BuildError;
use crate::error::Result;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// A host directory made visible to the executed script.
#[derive(Debug, Clone)]
pub struct BindMount {
    /// Host-side directory.
    pub source: PathBuf,
    /// Path the script sees it at.
    pub target: String,
}

/// One unit of work handed to an executor.
#[derive(Debug, Clone)]
pub struct Job {
    /// Container image to run in, or `None` for the host.
    pub image: Option<String>,
    pub mounts: Vec<BindMount>,
    /// Variables declared before the script body runs.
    pub variables: Variables,
    pub script: String,
}

/// Runs jobs and reports their exit status. Output is relayed line by
/// line as it is produced, not buffered until completion.
pub trait Executor {
    fn execute(&self, job: &Job) -> Result<i32>;
}

/// Executor backed by a bash subprocess on the build host.
///
/// Jobs requesting a container image are refused: the host has no
/// runtime to honor the isolation the job asks for.
#[derive(Debug, Default)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        Self
    }

    fn script_for(job: &Job) -> String {
        let mut script = String::from("set -euo pipefail\n");
        script.push_str(&serialize::render(&job.variables));
        script.push_str(&job.script);
        script.push('\n');
        script
    }
}

impl Executor for HostExecutor {
    fn execute(&self, job: &Job) -> Result<i32> {
        if let Some(image) = &job.image {
            return Err(BuildError::NoRuntime(image.clone()).into());
        }

        let script = Self::script_for(job);
        debug!(bytes = script.len(), "running script on host");

        let mut child = Command::new("/usr/bin/env")
            .arg("bash")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes())?;
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let status = std::thread::scope(|scope| -> Result<_> {
            if let Some(stderr) = stderr {
                scope.spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                        warn!("{line}");
                    }
                });
            }

            if let Some(stdout) = stdout {
                for line in BufReader::new(stdout).lines() {
                    info!("{}", line?);
                }
            }

            Ok(child.wait()?)
        })?;

        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bash::Value;

    #[test]
    fn test_host_executor_runs_script() {
        let job = Job {
            image: None,
            mounts: vec![],
            variables: Variables::new(),
            script: "true".into(),
        };
        assert_eq!(HostExecutor::new().execute(&job).unwrap(), 0);
    }

    #[test]
    fn test_host_executor_reports_exit_status() {
        let job = Job {
            image: None,
            mounts: vec![],
            variables: Variables::new(),
            script: "exit 42".into(),
        };
        assert_eq!(HostExecutor::new().execute(&job).unwrap(), 42);
    }

    #[test]
    fn test_variables_are_visible_to_the_script() {
        let mut variables = Variables::new();
        variables.insert("expected".into(), Value::Scalar("yes".into()));
        let job = Job {
            image: None,
            mounts: vec![],
            variables,
            script: "[[ $expected = yes ]]".into(),
        };
        assert_eq!(HostExecutor::new().execute(&job).unwrap(), 0);
    }

    #[test]
    fn test_failures_stop_the_script() {
        // set -e: the false on the first line must prevent the exit 0.
        let job = Job {
            image: None,
            mounts: vec![],
            variables: Variables::new(),
            script: "false\nexit 0".into(),
        };
        assert_ne!(HostExecutor::new().execute(&job).unwrap(), 0);
    }

    #[test]
    fn test_image_jobs_are_refused() {
        let job = Job {
            image: Some("base:v1.0".into()),
            mounts: vec![],
            variables: Variables::new(),
            script: "true".into(),
        };
        assert!(HostExecutor::new().execute(&job).is_err());
    }
}
