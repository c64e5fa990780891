use crate::error::KronoformError;
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

const TEE_CHUNK_BYTES: usize = 8 * 1024;

/// Deterministic argument vector for one wrapped command: verb, flags, then positionals.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Invocation {
    verb: String,
    flags: Vec<String>,
    positional: Vec<String>,
}

impl Invocation {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            ..Self::default()
        }
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// `-f a -f b` style repeated flag.
    pub fn repeated(mut self, flag: &str, values: &[String]) -> Self {
        for value in values {
            self.flags.push(flag.to_string());
            self.flags.push(value.clone());
        }
        self
    }

    pub fn value(mut self, flag: &str, value: Option<&str>) -> Self {
        if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
            self.flags.push(flag.to_string());
            self.flags.push(value.to_string());
        }
        self
    }

    pub fn switch(mut self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.flags.push(flag.to_string());
        }
        self
    }

    /// `--flag=value` for every value.
    pub fn assigned(mut self, flag: &str, values: &[String]) -> Self {
        for value in values {
            self.flags.push(format!("{flag}={value}"));
        }
        self
    }

    pub fn positional(mut self, values: &[String]) -> Self {
        self.positional.extend(values.iter().cloned());
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(1 + self.flags.len() + self.positional.len());
        args.push(self.verb.clone());
        args.extend(self.flags.iter().cloned());
        args.extend(self.positional.iter().cloned());
        args
    }
}

/// Runs the wrapped tool and hands back its captured standard output.
pub trait ToolRunner {
    async fn run(&self, invocation: &Invocation) -> Result<String, KronoformError>;
}

/// Reads the current serialized state of a live resource.
pub trait StateSource {
    async fn fetch(&self, target: &[String], namespace: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct Kubectl {
    program: String,
}

impl Kubectl {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ToolRunner for Kubectl {
    async fn run(&self, invocation: &Invocation) -> Result<String, KronoformError> {
        let args = invocation.args();
        info!("executing {} {}", self.program, args.join(" "));

        let io_error = |source: std::io::Error| KronoformError::SubprocessIo {
            program: self.program.clone(),
            source,
        };

        let mut child = TokioCommand::new(&self.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(io_error)?;

        let mut captured = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            let mut terminal = tokio::io::stdout();
            tee(&mut stdout, &mut terminal, &mut captured)
                .await
                .map_err(io_error)?;
        }

        let status = child.wait().await.map_err(io_error)?;
        if !status.success() {
            return Err(KronoformError::SubprocessFailed {
                program: self.program.clone(),
                verb: invocation.verb().to_string(),
                status,
            });
        }

        debug!("{} {} finished", self.program, invocation.verb());
        Ok(String::from_utf8_lossy(&captured).into_owned())
    }
}

impl StateSource for Kubectl {
    async fn fetch(&self, target: &[String], namespace: &str) -> Result<String> {
        let output = TokioCommand::new(&self.program)
            .arg("get")
            .args(target)
            .arg("-n")
            .arg(namespace)
            .arg("-o")
            .arg("yaml")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to execute {} get {}", self.program, target.join(" ")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(anyhow::anyhow!(
                "{} get {} exited with {}: {}",
                self.program,
                target.join(" "),
                output.status,
                stderr.trim()
            ))
        }
    }
}

/// Copies `reader` to `writer` chunk by chunk while keeping a copy of every byte.
/// Each chunk is flushed before the next read so the child never blocks on a full pipe
/// waiting for us.
async fn tee<R, W>(reader: &mut R, writer: &mut W, captured: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0_u8; TEE_CHUNK_BYTES];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        writer.write_all(&chunk[..read]).await?;
        writer.flush().await?;
        captured.extend_from_slice(&chunk[..read]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Invocation, Kubectl, StateSource, ToolRunner, tee};
    use crate::error::KronoformError;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn apply_arguments_follow_verb_flags_positionals() {
        let invocation = Invocation::new("apply")
            .repeated("-f", &strings(&["a.yaml", "b.yaml"]))
            .switch("--dry-run=client", true)
            .value("-n", Some("staging"))
            .positional(&strings(&["--prune"]));

        assert_eq!(
            invocation.args(),
            strings(&["apply", "-f", "a.yaml", "-f", "b.yaml", "--dry-run=client", "-n", "staging", "--prune"])
        );
    }

    #[test]
    fn default_flags_are_omitted() {
        let invocation = Invocation::new("delete")
            .repeated("-f", &[])
            .value("-l", None)
            .value("-n", Some("  "))
            .switch("--all", false)
            .assigned("--ignore-not-found", &[]);

        assert_eq!(invocation.args(), strings(&["delete"]));
    }

    #[test]
    fn assigned_flags_use_equals_form() {
        let invocation = Invocation::new("delete")
            .assigned("--ignore-not-found", &strings(&["true"]))
            .positional(&strings(&["configmap", "demo"]));

        assert_eq!(
            invocation.args(),
            strings(&["delete", "--ignore-not-found=true", "configmap", "demo"])
        );
    }

    #[tokio::test]
    async fn tee_copies_everything_and_keeps_a_copy() {
        let input = b"deployment.apps/demo created\nservice/demo unchanged\n".repeat(500);
        let mut reader = &input[..];
        let mut terminal = Vec::new();
        let mut captured = Vec::new();

        tee(&mut reader, &mut terminal, &mut captured)
            .await
            .expect("tee succeeds");

        assert_eq!(terminal, input);
        assert_eq!(captured, input);
    }

    #[tokio::test]
    async fn runner_captures_child_stdout() {
        let runner = Kubectl::new("echo");
        let invocation = Invocation::new("configmap/test").positional(&strings(&["unchanged"]));

        let output = runner.run(&invocation).await.expect("echo runs");
        assert_eq!(output, "configmap/test unchanged\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_subprocess_failure() {
        let runner = Kubectl::new("false");
        let error = runner
            .run(&Invocation::new("apply"))
            .await
            .expect_err("false exits non-zero");

        assert!(matches!(error, KronoformError::SubprocessFailed { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_subprocess_io() {
        let runner = Kubectl::new("kronoform-test-no-such-binary");
        let error = runner
            .run(&Invocation::new("apply"))
            .await
            .expect_err("spawn fails");

        assert!(matches!(error, KronoformError::SubprocessIo { .. }));
    }

    #[tokio::test]
    async fn failed_lookup_is_an_error() {
        let source = Kubectl::new("false");
        let result = source.fetch(&strings(&["configmap", "demo"]), "default").await;
        assert!(result.is_err());
    }
}
