//! The `command` job runner: runs a shell command.
//!
//! Attributes:
//! - `command` (required): passed to `sh -c`
//! - `env`: map of extra environment variables, layered over the run
//!   environment from `reconcile.toml`
//! - `working_dir`: directory to run in
//!
//! Stdout lines of the form `::output key=value` become job outputs that
//! downstream nodes can reference as `${job.key}`.

use std::collections::BTreeMap;
use std::process::Stdio;

use reconcile_core::provider::{JobOutput, JobRunner, JobSpec};
use reconcile_types::error::ProviderError;
use tokio::process::Command;

const OUTPUT_MARKER: &str = "::output ";

pub struct CommandJobRunner {
    shell: String,
}

impl CommandJobRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl Default for CommandJobRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect `::output key=value` lines.
fn parse_outputs(stdout: &str) -> BTreeMap<String, serde_json::Value> {
    stdout
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(OUTPUT_MARKER))
        .filter_map(|rest| rest.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), serde_json::Value::String(v.to_string())))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn env_attribute(spec: &JobSpec) -> Result<BTreeMap<String, String>, ProviderError> {
    let Some(value) = spec.attributes.get("env") else {
        return Ok(BTreeMap::new());
    };
    let serde_json::Value::Object(map) = value else {
        return Err(ProviderError::terminal(format!(
            "{}: attribute 'env' must be a map",
            spec.node_id
        )));
    };
    Ok(map
        .iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect())
}

impl JobRunner for CommandJobRunner {
    fn name(&self) -> &str {
        "command"
    }

    async fn run(
        &self,
        spec: &JobSpec,
        environment: &BTreeMap<String, String>,
    ) -> Result<JobOutput, ProviderError> {
        let command = spec
            .attributes
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::terminal(format!("{}: attribute 'command' is required", spec.node_id))
            })?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(environment)
            .envs(env_attribute(spec)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = spec.attributes.get("working_dir").and_then(|v| v.as_str()) {
            cmd.current_dir(dir);
        }

        tracing::debug!(node = spec.node_id.as_str(), command, "spawning job");
        let output = cmd.output().await.map_err(|e| {
            ProviderError::terminal(format!("{}: failed to spawn '{}': {e}", spec.node_id, self.shell))
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut logs = stdout.to_string();
        if !stderr.is_empty() {
            logs.push_str(&stderr);
        }

        Ok(JobOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            outputs: parse_outputs(&stdout),
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(attributes: serde_json::Value) -> JobSpec {
        let serde_json::Value::Object(map) = attributes else {
            panic!("attributes must be an object");
        };
        JobSpec {
            node_id: "build".to_string(),
            runner: "command".to_string(),
            attributes: map.into_iter().collect(),
        }
    }

    #[test]
    fn test_parse_outputs() {
        let outputs = parse_outputs("compiling\n::output image=app:v2\n::output digest=sha256:abc=\n::output =x\n");
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["image"], json!("app:v2"));
        assert_eq!(outputs["digest"], json!("sha256:abc="));
    }

    #[tokio::test]
    async fn test_runs_command_with_layered_environment() {
        let runner = CommandJobRunner::new();
        let environment = BTreeMap::from([
            ("REGION".to_string(), "eu".to_string()),
            ("TAG".to_string(), "v1".to_string()),
        ]);
        let output = runner
            .run(
                &spec(json!({
                    "command": "echo \"::output where=$REGION-$TAG\"",
                    "env": {"TAG": "v2"},
                })),
                &environment,
            )
            .await
            .unwrap();

        assert!(output.is_success());
        assert_eq!(output.outputs["where"], json!("eu-v2"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported_not_raised() {
        let runner = CommandJobRunner::new();
        let output = runner
            .run(&spec(json!({"command": "echo oops >&2; exit 3"})), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert!(output.logs.contains("oops"));
    }

    #[tokio::test]
    async fn test_missing_command_is_terminal() {
        let runner = CommandJobRunner::new();
        let err = runner.run(&spec(json!({})), &BTreeMap::new()).await.unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_env_must_be_map() {
        let runner = CommandJobRunner::new();
        let err = runner
            .run(&spec(json!({"command": "true", "env": "X=1"})), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("'env' must be a map"));
    }
}
