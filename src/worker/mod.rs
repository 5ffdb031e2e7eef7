//! Backend worker process management.
//!
//! The worker's stdout is read in chunks and reassembled into lines; its stdin is fed by
//! a single writer task through a bounded queue. Whether a command may wait for room in
//! that queue is decided by [`WritePolicy`].

use crate::model::{Delivery, DropReason, WorkerSpec, WritePolicy};
use crate::protocol::{LineBuffer, EXIT};
use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc::{self, error::TrySendError, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;
/// Longest a `Wait` command may wait for queue space before it is dropped as busy.
const WAIT_LIMIT: Duration = Duration::from_secs(2);
/// Budget for queueing `EXIT` and flushing the input on shutdown.
const DRAIN_DEADLINE: Duration = Duration::from_millis(500);

/// Events observed on the worker side, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// One complete output line, without its terminator.
    Line(String),
    /// The output stream reached EOF.
    Closed,
    /// The process exited; `None` when killed by a signal.
    Exited(Option<i32>),
}

/// Handle to a running worker: its input queue and, for spawned processes, a kill switch.
pub struct WorkerHandle {
    cmd_tx: Option<mpsc::Sender<String>>,
    policy: WritePolicy,
    writer: Option<JoinHandle<()>>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_watch: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Launch the worker process with piped stdin/stdout.
    pub fn spawn(
        spec: &WorkerSpec,
        policy: WritePolicy,
        queue: usize,
    ) -> Result<(WorkerHandle, UnboundedReceiver<WorkerEvent>)> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn worker {}", spec.program.display()))?;
        info!(program = %spec.program.display(), pid = ?child.id(), "worker spawned");

        let stdin = child.stdin.take().context("worker stdin not piped")?;
        let stdout = child.stdout.take().context("worker stdout not piped")?;
        let (mut handle, event_rx, event_tx) = Self::wire(stdout, stdin, policy, queue);

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        handle.kill_tx = Some(kill_tx);
        handle.exit_watch = Some(tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        debug!("kill worker: {e}");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(s) => s.code(),
                Err(e) => {
                    warn!("wait for worker: {e}");
                    None
                }
            };
            let _ = event_tx.send(WorkerEvent::Exited(code));
        }));

        Ok((handle, event_rx))
    }

    /// Drive a worker over arbitrary async streams. Nothing is killed on shutdown.
    pub fn attach<R, W>(
        output: R,
        input: W,
        policy: WritePolicy,
        queue: usize,
    ) -> (WorkerHandle, UnboundedReceiver<WorkerEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (handle, event_rx, _) = Self::wire(output, input, policy, queue);
        (handle, event_rx)
    }

    fn wire<R, W>(
        output: R,
        input: W,
        policy: WritePolicy,
        queue: usize,
    ) -> (
        WorkerHandle,
        UnboundedReceiver<WorkerEvent>,
        UnboundedSender<WorkerEvent>,
    )
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel::<String>(queue.max(1));

        tokio::spawn(read_output(output, event_tx.clone()));
        let writer = tokio::spawn(write_input(input, cmd_rx));

        let handle = WorkerHandle {
            cmd_tx: Some(cmd_tx),
            policy,
            writer: Some(writer),
            kill_tx: None,
            exit_watch: None,
        };
        (handle, event_rx, event_tx)
    }

    /// Queue one command for the worker's input, subject to the write policy.
    pub async fn send(&self, command: &str) -> Delivery {
        let Some(tx) = self.cmd_tx.as_ref() else {
            return Delivery::Dropped(DropReason::Unwritable);
        };
        let line = command.to_string();
        let result = match self.policy {
            WritePolicy::DropNewest => tx.try_send(line).map_err(|e| match e {
                TrySendError::Full(_) => DropReason::Busy,
                TrySendError::Closed(_) => DropReason::Unwritable,
            }),
            WritePolicy::Wait => match tokio::time::timeout(WAIT_LIMIT, tx.send(line)).await {
                Ok(sent) => sent.map_err(|_| DropReason::Unwritable),
                Err(_) => Err(DropReason::Busy),
            },
        };
        match result {
            Ok(()) => Delivery::Queued,
            Err(reason) => {
                warn!(command, ?reason, "worker input not writable, command dropped");
                Delivery::Dropped(reason)
            }
        }
    }

    /// Send `EXIT` and terminate the process.
    ///
    /// Queueing `EXIT` and draining the writer share one short deadline. A worker that
    /// stopped reading its input is killed once the deadline passes.
    pub async fn shutdown(mut self) {
        let tx = self.cmd_tx.take();
        let mut writer = self.writer.take();
        let drained = tokio::time::timeout(DRAIN_DEADLINE, async {
            if let Some(tx) = tx {
                if tx.send(EXIT.to_string()).await.is_err() {
                    debug!("worker input closed, exit command not delivered");
                }
            }
            if let Some(writer) = writer.as_mut() {
                let _ = writer.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("worker input did not drain, terminating");
            if let Some(writer) = writer {
                writer.abort();
            }
        }
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }
        if let Some(watch) = self.exit_watch.take() {
            let _ = watch.await;
        }
    }
}

async fn read_output<R: AsyncRead + Unpin>(mut output: R, event_tx: UnboundedSender<WorkerEvent>) {
    let mut buf = LineBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match output.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("worker output read failed: {e}");
                break;
            }
        };
        for line in buf.feed(&chunk[..n]) {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("dropping worker line: {e}");
                    continue;
                }
            };
            if event_tx.send(WorkerEvent::Line(line)).is_err() {
                return;
            }
        }
    }
    if let Some(partial) = buf.take_partial() {
        warn!(%partial, "worker output ended mid-line, discarding");
    }
    let _ = event_tx.send(WorkerEvent::Closed);
}

async fn write_input<W: AsyncWrite + Unpin>(mut input: W, mut cmd_rx: mpsc::Receiver<String>) {
    while let Some(cmd) = cmd_rx.recv().await {
        let line = format!("{cmd}\n");
        let res = async {
            input.write_all(line.as_bytes()).await?;
            input.flush().await
        }
        .await;
        if let Err(e) = res {
            warn!(command = %cmd, "worker input closed: {e}");
            // Dropping the receiver makes later sends report the input as unwritable.
            return;
        }
        debug!(command = %cmd, "sent to worker");
    }
    let _ = input.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_lines_arrive_in_order_then_closed() {
        let (mut worker_out, host_in) = duplex(64);
        let (_worker_in, host_out) = duplex(64);
        let (_handle, mut events) =
            WorkerHandle::attach(host_in, host_out, WritePolicy::DropNewest, 4);

        worker_out.write_all(b"{\"a\":1}\n{\"b\"").await.unwrap();
        worker_out.write_all(b":2}\ntail").await.unwrap();
        drop(worker_out);

        assert_eq!(events.recv().await, Some(WorkerEvent::Line("{\"a\":1}".into())));
        assert_eq!(events.recv().await, Some(WorkerEvent::Line("{\"b\":2}".into())));
        assert_eq!(events.recv().await, Some(WorkerEvent::Closed));
    }

    #[tokio::test]
    async fn test_commands_are_newline_terminated() {
        let (_worker_out, host_in) = duplex(64);
        let (worker_in, host_out) = duplex(64);
        let (handle, _events) = WorkerHandle::attach(host_in, host_out, WritePolicy::Wait, 4);

        assert_eq!(handle.send("GET_CHARACTERS").await, Delivery::Queued);
        handle.shutdown().await;

        let mut lines = BufReader::new(worker_in).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("GET_CHARACTERS"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("EXIT"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_drop_newest_when_input_closed() {
        let (_worker_out, host_in) = duplex(64);
        let (worker_in, host_out) = duplex(64);
        drop(worker_in);
        let (handle, _events) =
            WorkerHandle::attach(host_in, host_out, WritePolicy::DropNewest, 4);

        // The first write fails and takes the writer down with it.
        handle.send("first").await;
        let mut delivery = Delivery::Queued;
        for _ in 0..100 {
            delivery = handle.send("later").await;
            if delivery == Delivery::Dropped(DropReason::Unwritable) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(delivery, Delivery::Dropped(DropReason::Unwritable));
    }

    #[tokio::test]
    async fn test_drop_newest_when_queue_full() {
        let (_worker_out, host_in) = duplex(64);
        // A tiny pipe nobody reads: the writer blocks on the first command.
        let (_worker_in, host_out) = duplex(1);
        let (handle, _events) =
            WorkerHandle::attach(host_in, host_out, WritePolicy::DropNewest, 1);

        let mut saw_busy = false;
        for i in 0..100 {
            if handle.send(&format!("cmd-{i}")).await == Delivery::Dropped(DropReason::Busy) {
                saw_busy = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(saw_busy);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_dropped() {
        let (mut worker_out, host_in) = duplex(64);
        let (_worker_in, host_out) = duplex(64);
        let (_handle, mut events) =
            WorkerHandle::attach(host_in, host_out, WritePolicy::DropNewest, 4);

        worker_out.write_all(b"{\"n\":\"\xff\"}\n{\"n\":1}\n").await.unwrap();
        drop(worker_out);

        assert_eq!(events.recv().await, Some(WorkerEvent::Line("{\"n\":1}".into())));
        assert_eq!(events.recv().await, Some(WorkerEvent::Closed));
    }

    #[tokio::test]
    async fn test_wait_gives_up_on_stalled_input() {
        let (_worker_out, host_in) = duplex(64);
        let (_worker_in, host_out) = duplex(1);
        let (handle, _events) = WorkerHandle::attach(host_in, host_out, WritePolicy::Wait, 1);

        let mut last = Delivery::Queued;
        for i in 0..3 {
            last = handle.send(&format!("cmd-{i}")).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(last, Delivery::Dropped(DropReason::Busy));
        assert!(timeout(Duration::from_secs(5), handle.shutdown()).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_worker_that_stopped_reading() {
        let spec = WorkerSpec {
            program: "sleep".into(),
            args: vec!["30".into()],
        };
        let (handle, mut events) = WorkerHandle::spawn(&spec, WritePolicy::DropNewest, 4).unwrap();

        // Far more than a pipe holds, so the writer blocks and the queue fills.
        let big = "x".repeat(200 * 1024);
        for _ in 0..6 {
            handle.send(&big).await;
            tokio::task::yield_now().await;
        }

        assert!(timeout(Duration::from_secs(5), handle.shutdown()).await.is_ok());
        loop {
            match events.recv().await {
                Some(WorkerEvent::Exited(code)) => {
                    assert_eq!(code, None);
                    break;
                }
                Some(_) => {}
                None => panic!("no exit event"),
            }
        }
    }
}
