//! Asynchronous launcher for R scripts over a stdin/stdout JSON protocol.
//!
//! The wire format matches the launcher script's expectations: a single
//! JSON document `[{"1": arg1, "2": arg2, ..}, "<scriptPath>", {options}]`
//! followed by a newline on standard input, and a JSON value on standard
//! output. The positional-argument object mirrors how the launcher binds
//! `input[[1]]`, `input[[2]]`, .. inside R.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

/// Process-level settings for one R invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RLauncherConfig {
    /// The `Rscript` interpreter binary.
    pub rscript_bin: PathBuf,
    /// The fixed launcher script that reads the stdin protocol and sources
    /// the requested script.
    pub launcher_script: PathBuf,
    /// Wall-clock budget before the child is killed.
    pub timeout: Duration,
}

/// Errors from spawning or talking to the R runtime.
#[derive(Debug, thiserror::Error)]
pub enum RLauncherError {
    /// The interpreter could not be spawned.
    #[error("Failed to spawn R runtime: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O failure while feeding stdin or collecting output.
    #[error("I/O error communicating with R runtime: {0}")]
    Io(#[from] std::io::Error),

    /// The script wrote to stderr; whatever it printed is the error.
    #[error("R script error: {stderr}")]
    Script {
        /// Raw stderr text from the script.
        stderr: String,
    },

    /// Non-zero exit with no stderr output. The exit code is attached
    /// because the script left no other diagnostic.
    #[error("R runtime exited with code {code:?} and no stderr output")]
    ExitCode {
        /// Process exit code, if the OS reported one.
        code: Option<i32>,
    },

    /// The invocation exceeded its budget and the process was killed.
    #[error("R script timed out after {timeout:?}")]
    Timeout {
        /// The configured budget.
        timeout: Duration,
    },

    /// Standard output was not valid JSON.
    #[error("Failed to parse R output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serializes the stdin payload for one invocation.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if an argument cannot be serialized.
pub(crate) fn build_payload(
    script: &Path,
    args: &[serde_json::Value],
) -> Result<String, serde_json::Error> {
    let mut positional = serde_json::Map::new();
    for (i, arg) in args.iter().enumerate() {
        positional.insert((i + 1).to_string(), arg.clone());
    }

    let document = serde_json::json!([positional, script.to_string_lossy(), {}]);

    let mut payload = serde_json::to_string(&document)?;
    // The launcher reads exactly one line; without the trailing newline R's
    // stdin reader errors out.
    payload.push('\n');
    Ok(payload)
}

/// Runs `script` through the launcher, passing `args` as the positional
/// argument groups, and returns the parsed JSON it printed.
///
/// The payload travels over standard input rather than argv or the
/// environment because both of those are kernel-bounded and a full yearly
/// batch can exceed the bound.
///
/// # Errors
///
/// Returns [`RLauncherError`] if the process cannot be spawned, writes to
/// stderr, exits non-zero, exceeds the configured timeout (the child is
/// killed), or prints something that is not JSON.
pub async fn call_r_script(
    config: &RLauncherConfig,
    script: &Path,
    args: &[serde_json::Value],
) -> Result<serde_json::Value, RLauncherError> {
    let payload = build_payload(script, args)?;

    log::debug!(
        "Invoking {} ({} bytes of input)",
        script.display(),
        payload.len()
    );

    let mut child = Command::new(&config.rscript_bin)
        .arg("--vanilla")
        .arg(&config.launcher_script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // If the timeout below fires, dropping the child must kill it.
        .kill_on_drop(true)
        .spawn()
        .map_err(RLauncherError::Spawn)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(payload.as_bytes()).await?;
        // Dropping stdin closes the stream, which is what lets R start.
    }

    let output = tokio::time::timeout(config.timeout, child.wait_with_output())
        .await
        .map_err(|_| RLauncherError::Timeout {
            timeout: config.timeout,
        })??;

    if !output.stderr.is_empty() {
        return Err(RLauncherError::Script {
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    if !output.status.success() {
        return Err(RLauncherError::ExitCode {
            code: output.status.code(),
        });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let args = vec![serde_json::json!([{"SPB": 5}]), serde_json::json!("extra")];
        let payload = build_payload(Path::new("scripts/model.R"), &args).unwrap();

        assert!(payload.ends_with('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let parts = parsed.as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["1"], serde_json::json!([{"SPB": 5}]));
        assert_eq!(parts[0]["2"], serde_json::json!("extra"));
        assert_eq!(parts[1], serde_json::json!("scripts/model.R"));
        assert_eq!(parts[2], serde_json::json!({}));
    }

    #[test]
    fn payload_with_no_args_has_empty_positional_object() {
        let payload = build_payload(Path::new("m.R"), &[]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed[0], serde_json::json!({}));
    }
}
