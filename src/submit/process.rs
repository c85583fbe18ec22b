use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::command::SubmitCommand;
use super::correlator::JobIdCorrelator;
use crate::error::{Result, SubmitError};
use crate::events::{EventSink, OutputStream, SubmitEvent};

/// A running `ray job submit`.
///
/// stdout and stderr are drained line by line by two reader tasks for the
/// whole life of the process. Non-empty lines are echoed as
/// [`SubmitEvent::Output`]; stdout lines are also fed to the correlator, which
/// is dropped (closing its handoff) when stdout ends.
pub struct SubmitProcess {
    program: String,
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

/// Read `reader` line by line until EOF. Invalid UTF-8 is replaced rather than
/// ending the stream, so the pipe is always fully drained.
async fn for_each_line<R, F>(reader: R, mut f: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(mut bytes)) => {
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                f(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed reading ray job submit output");
                break;
            }
        }
    }
}

impl SubmitProcess {
    /// Spawn `command` with piped output and start both readers.
    pub fn launch(
        command: &SubmitCommand,
        events: EventSink,
        correlator: Option<JobIdCorrelator>,
    ) -> Result<Self> {
        let program = command.program().to_string();
        tracing::info!(command = %command, "Running ray job submit");

        let mut child = Command::new(&program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SubmitError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(SubmitError::PipeSetup("stdout"))?;
        let stderr = child.stderr.take().ok_or(SubmitError::PipeSetup("stderr"))?;

        let stdout_events = events.clone();
        let mut correlator = correlator;
        let stdout_reader = tokio::spawn(async move {
            for_each_line(stdout, |line| {
                if line.is_empty() {
                    return;
                }
                if let Some(ref mut correlator) = correlator {
                    correlator.observe(&line);
                }
                stdout_events.emit(SubmitEvent::Output {
                    stream: OutputStream::Stdout,
                    line,
                });
            })
            .await;
        });

        let stderr_reader = tokio::spawn(async move {
            for_each_line(stderr, |line| {
                if !line.is_empty() {
                    events.emit(SubmitEvent::Output {
                        stream: OutputStream::Stderr,
                        line,
                    });
                }
            })
            .await;
        });

        Ok(Self {
            program,
            child,
            readers: vec![stdout_reader, stderr_reader],
        })
    }

    /// Wait for exit and for both readers to drain. Non-zero exit is an error.
    pub async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await.map_err(SubmitError::Wait)?;

        for reader in self.readers.drain(..) {
            if let Err(e) = reader.await {
                tracing::warn!(error = %e, "Output reader task failed");
            }
        }

        tracing::info!(program = %self.program, status = %status, "ray job submit exited");
        if status.success() {
            Ok(())
        } else {
            Err(SubmitError::SubmitFailed(status))
        }
    }
}
