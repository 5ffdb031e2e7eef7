//! Host event loop.
//!
//! Consumes worker events and UI commands and emits envelopes for the display layer.

use super::{intercept, preload, HostContext};
use crate::protocol::{Envelope, ReadyHandshake};
use crate::worker::{WorkerEvent, WorkerHandle};
use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Commands from the UI side of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UiCommand {
    /// A command line typed or clicked in the UI.
    Submit(String),
    /// The display finished its initial load and can take preloaded data.
    DisplayLoaded,
    Quit,
}

/// Route one outbound command: build saves stay on the host, everything else goes to the worker.
async fn submit(ctx: &HostContext, worker: &WorkerHandle, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if intercept::try_intercept(ctx, line) {
        return;
    }
    worker.send(line).await;
}

/// Decode one worker line, run the handshake on it and forward it if it is valid JSON.
async fn on_worker_line(
    ctx: &HostContext,
    worker: &WorkerHandle,
    handshake: &mut ReadyHandshake,
    line: &str,
) {
    let env = match Envelope::decode(line) {
        None => return,
        Some(Ok(env)) => env,
        Some(Err(e)) => {
            warn!("dropping worker line: {e}");
            return;
        }
    };
    if let Some(cmd) = handshake.observe(&env) {
        info!("worker ready");
        worker.send(cmd).await;
    }
    debug!(line = env.raw(), "forwarding");
    ctx.forward(env);
}

/// Run the host until the UI quits. The worker is sent `EXIT` and terminated on the way out.
pub(crate) async fn run_host(
    ctx: HostContext,
    worker: WorkerHandle,
    worker_events: UnboundedReceiver<WorkerEvent>,
    mut ui_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    info!(
        worker = %ctx.config.worker.program.display(),
        builds = %ctx.builds.path().display(),
        "host running"
    );
    let mut handshake = ReadyHandshake::default();
    let mut worker_events = Some(worker_events);

    loop {
        tokio::select! {
            // UI first, so a pending DisplayLoaded lands before the worker's first lines.
            biased;

            cmd = ui_rx.recv() => {
                match cmd {
                    Some(UiCommand::Submit(line)) => submit(&ctx, &worker, &line).await,
                    Some(UiCommand::DisplayLoaded) => preload::emit_startup_data(&ctx),
                    Some(UiCommand::Quit) | None => break,
                }
            }
            // Once the worker side is exhausted this branch parks forever.
            ev = async {
                match worker_events.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => futures::future::pending().await,
                }
            } => {
                match ev {
                    Some(WorkerEvent::Line(line)) => {
                        on_worker_line(&ctx, &worker, &mut handshake, &line).await;
                    }
                    Some(WorkerEvent::Closed) => debug!("worker output closed"),
                    Some(WorkerEvent::Exited(code)) => {
                        warn!(?code, "worker exited; no restart will be attempted");
                    }
                    None => worker_events = None,
                }
            }
        }
    }

    info!("shutting down worker");
    worker.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostConfig, WorkerSpec, WritePolicy};
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc::{self, UnboundedSender};
    use tokio::task::JoinHandle;

    struct Harness {
        _dir: TempDir,
        builds_file: std::path::PathBuf,
        worker_out: DuplexStream,
        worker_in: DuplexStream,
        ui_tx: UnboundedSender<UiCommand>,
        display_rx: UnboundedReceiver<String>,
        host: JoinHandle<Result<()>>,
    }

    fn start() -> Harness {
        start_with(WritePolicy::DropNewest, 16, 1024)
    }

    fn start_with(write_policy: WritePolicy, write_queue: usize, pipe: usize) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = HostConfig {
            data_dir: dir.path().to_path_buf(),
            builds_file: dir.path().join("talent_builds.json"),
            tree_cache_dir: dir.path().join("talent_cache"),
            worker: WorkerSpec {
                program: "fake-worker".into(),
                args: vec![],
            },
            write_policy,
            write_queue,
            preload: true,
        };
        let builds_file = config.builds_file.clone();

        let (worker_out, host_in) = duplex(1024);
        let (worker_in, host_out) = duplex(pipe);
        let (worker, events) =
            WorkerHandle::attach(host_in, host_out, config.write_policy, config.write_queue);
        let (display_tx, display_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let ctx = HostContext::new(config, display_tx);
        let host = tokio::spawn(run_host(ctx, worker, events, ui_rx));

        Harness {
            _dir: dir,
            builds_file,
            worker_out,
            worker_in,
            ui_tx,
            display_rx,
            host,
        }
    }

    impl Harness {
        async fn next_display(&mut self) -> Value {
            let raw = self.display_rx.recv().await.unwrap();
            serde_json::from_str(&raw).unwrap()
        }

        /// Quit the host and return everything the worker received on its input.
        async fn finish(mut self) -> String {
            self.ui_tx.send(UiCommand::Quit).unwrap();
            self.host.await.unwrap().unwrap();
            let mut received = String::new();
            self.worker_in.read_to_string(&mut received).await.unwrap();
            received
        }
    }

    #[tokio::test]
    async fn test_ready_triggers_single_request() {
        let mut h = start();
        h.worker_out
            .write_all(b"{\"status\":\"ready\"}\n{\"status\":\"re")
            .await
            .unwrap();
        h.worker_out.write_all(b"ady\"}\n").await.unwrap();

        assert_eq!(h.next_display().await, json!({"status": "ready"}));
        assert_eq!(h.next_display().await, json!({"status": "ready"}));
        assert_eq!(h.finish().await, "GET_CHARACTERS\nEXIT\n");
    }

    #[tokio::test]
    async fn test_malformed_lines_are_not_forwarded() {
        let mut h = start();
        h.worker_out
            .write_all(b"not json\n\n   \n[{\"name\":\"Jaina\"}]\n")
            .await
            .unwrap();

        assert_eq!(h.next_display().await, json!([{"name": "Jaina"}]));
        assert!(h.display_rx.try_recv().is_err());
        assert_eq!(h.finish().await, "EXIT\n");
    }

    #[tokio::test]
    async fn test_build_saves_stay_on_host() {
        let mut h = start();
        h.ui_tx
            .send(UiCommand::Submit("SAVE_BUILD_STRING:warrior:fury:pve:1A2B3C".into()))
            .unwrap();
        h.ui_tx
            .send(UiCommand::Submit("SAVE_BUILD_STRING:too:short".into()))
            .unwrap();
        h.ui_tx
            .send(UiCommand::Submit("DELETE_CHARACTER:Jaina:Silvermoon".into()))
            .unwrap();

        assert_eq!(
            h.next_display().await,
            json!({
                "status": "build_string_saved",
                "class": "warrior",
                "spec": "fury",
                "build_type": "pve"
            })
        );
        let stored: Value =
            serde_json::from_str(&fs::read_to_string(&h.builds_file).unwrap()).unwrap();
        assert_eq!(stored, json!({"warrior": {"fury": {"pve": "1A2B3C"}}}));
        assert_eq!(h.finish().await, "DELETE_CHARACTER:Jaina:Silvermoon\nEXIT\n");
    }

    #[tokio::test]
    async fn test_preload_emits_builds_then_trees() {
        let mut h = start();
        let cache = h.builds_file.parent().unwrap().join("talent_cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(
            &h.builds_file,
            r#"{"_README": "example", "mage": {"frost": {"pve": "AAA"}}}"#,
        )
        .unwrap();
        fs::write(
            cache.join("mage_frost.json"),
            r#"{"class_nodes": [], "spec_nodes": []}"#,
        )
        .unwrap();
        fs::write(cache.join("mage_fire.json"), r#"{"spec_nodes": []}"#).unwrap();

        h.ui_tx.send(UiCommand::DisplayLoaded).unwrap();

        assert_eq!(
            h.next_display().await,
            json!({"status": "talent_builds_loaded", "builds": {"mage": {"frost": {"pve": "AAA"}}}})
        );
        let tree = h.next_display().await;
        assert_eq!(tree["status"], "talent_tree");
        assert_eq!(tree["class"], "mage");
        assert_eq!(tree["spec"], "frost");
        assert_eq!(tree["tree"]["class_nodes"], json!([]));
        assert_eq!(h.finish().await, "EXIT\n");
    }

    #[tokio::test]
    async fn test_worker_exit_keeps_host_alive() {
        let mut h = start();
        h.worker_out.write_all(b"{\"status\":\"ready\"}\n").await.unwrap();
        assert_eq!(h.next_display().await["status"], "ready");
        h.worker_out.shutdown().await.unwrap();

        // Host-side commands still work after the worker side went away.
        h.ui_tx
            .send(UiCommand::Submit("SAVE_BUILD_STRING:rogue:outlaw:pve:Q".into()))
            .unwrap();
        assert_eq!(h.next_display().await["status"], "build_string_saved");
        assert_eq!(h.finish().await, "GET_CHARACTERS\nEXIT\n");
    }

    #[tokio::test]
    async fn test_preload_precedes_early_ready() {
        let mut h = start();
        h.worker_out.write_all(b"{\"status\":\"ready\"}\n").await.unwrap();
        h.ui_tx.send(UiCommand::DisplayLoaded).unwrap();

        assert_eq!(
            h.next_display().await,
            json!({"status": "talent_builds_loaded", "builds": {}})
        );
        assert_eq!(h.next_display().await, json!({"status": "ready"}));
        assert_eq!(h.finish().await, "GET_CHARACTERS\nEXIT\n");
    }

    #[tokio::test]
    async fn test_quit_reaches_host_while_worker_input_stalls() {
        let h = start_with(WritePolicy::Wait, 1, 1);
        for i in 0..4 {
            h.ui_tx.send(UiCommand::Submit(format!("PING:{i}"))).unwrap();
        }
        h.ui_tx.send(UiCommand::Quit).unwrap();

        let done = tokio::time::timeout(std::time::Duration::from_secs(20), h.host).await;
        assert!(matches!(done, Ok(Ok(Ok(())))));
    }
}
