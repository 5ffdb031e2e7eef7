//! Local backend worker.
//!
//! Speaks the worker side of the line protocol: announces readiness, then answers one
//! command per input line with one JSON document per output line. Only the roster kept
//! on disk is served; lookups against the remote game-data service are not available
//! here.

mod reset;

use crate::model::{default_activities, ActivityStatus, Character};
use crate::protocol::Request;
use crate::storage;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use time::OffsetDateTime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Reply<'a> {
    Ready,
    Error {
        message: String,
    },
    Added {
        character: &'a Character,
    },
    Deleted {
        name: &'a str,
        realm: &'a str,
    },
    Toggled {
        name: &'a str,
        activity: &'a str,
        new_status: Option<ActivityStatus>,
    },
}

/// Roster state owned by the worker for its whole lifetime.
pub struct Backend {
    roster_path: PathBuf,
    characters: Vec<Character>,
}

impl Backend {
    pub fn open(data_dir: PathBuf) -> Self {
        let roster_path = data_dir.join(storage::ROSTER_FILE);
        let mut characters = storage::load_roster(&roster_path);
        let now = OffsetDateTime::now_utc();
        for c in characters.iter_mut() {
            reset::apply_resets(c, now);
        }
        Self {
            roster_path,
            characters,
        }
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    fn persist(&self) {
        if let Err(e) = storage::save_roster(&self.roster_path, &self.characters) {
            warn!("failed to save roster: {e:#}");
        }
    }

    fn find(&self, name: &str, realm: &str) -> Option<usize> {
        self.characters.iter().position(|c| c.is(name, realm))
    }

    /// Handle one request, writing any reply to `out`. Returns false on `EXIT`.
    async fn handle<W: AsyncWrite + Unpin>(&mut self, req: Request, out: &mut W) -> Result<bool> {
        match req {
            Request::GetCharacters => emit(out, &self.characters).await?,
            Request::AddCharacter {
                region,
                realm,
                name,
            } => {
                let idx = match self.find(&name, &realm) {
                    Some(i) => i,
                    None => {
                        self.characters.push(Character {
                            name,
                            level: serde_json::Value::String("?".into()),
                            realm,
                            region,
                            portrait_url: None,
                            activities: default_activities(),
                            last_reset_check: reset::format_timestamp(
                                OffsetDateTime::now_utc(),
                            ),
                        });
                        self.persist();
                        self.characters.len() - 1
                    }
                };
                emit(
                    out,
                    &Reply::Added {
                        character: &self.characters[idx],
                    },
                )
                .await?;
            }
            Request::AutoAdd { region, name } => {
                warn!(%region, %name, "realm search needs the remote data service");
                emit(
                    out,
                    &Reply::Error {
                        message: format!(
                            "Cannot search realms for {name} in {region}: remote lookups are unavailable"
                        ),
                    },
                )
                .await?;
            }
            Request::DeleteCharacter { name, realm } => {
                if let Some(i) = self.find(&name, &realm) {
                    self.characters.remove(i);
                    self.persist();
                    emit(
                        out,
                        &Reply::Deleted {
                            name: &name,
                            realm: &realm,
                        },
                    )
                    .await?;
                }
            }
            Request::ToggleActivity {
                name,
                realm,
                activity,
            } => {
                if let Some(i) = self.find(&name, &realm) {
                    let c = &mut self.characters[i];
                    if let Some(a) = c.activities.get_mut(&activity) {
                        a.status = a.status.toggled();
                    }
                    let new_status = c.activities.get(&activity).map(|a| a.status);
                    self.persist();
                    emit(
                        out,
                        &Reply::Toggled {
                            name: &name,
                            activity: &activity,
                            new_status,
                        },
                    )
                    .await?;
                }
            }
            Request::Exit => {
                self.persist();
                return Ok(false);
            }
            Request::Other(cmd) => warn!(%cmd, "unknown command"),
        }
        Ok(true)
    }
}

async fn emit<W: AsyncWrite + Unpin, T: Serialize + ?Sized>(out: &mut W, payload: &T) -> Result<()> {
    let mut line = serde_json::to_string(payload)?;
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

/// Run the worker loop until `EXIT` or end of input.
pub async fn serve<R, W>(backend: &mut Backend, input: R, mut out: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    emit(&mut out, &Reply::Ready).await?;
    backend.persist();

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("read command")? {
        if line.trim().is_empty() {
            continue;
        }
        let req = match Request::parse(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("ignoring command: {e}");
                continue;
            }
        };
        if !backend.handle(req, &mut out).await? {
            info!("exit requested");
            return Ok(());
        }
    }
    info!("input closed");
    Ok(())
}

/// Entry point for the `worker` subcommand: serve over this process's stdio.
pub async fn run(data_dir: PathBuf) -> Result<()> {
    let mut backend = Backend::open(data_dir);
    info!(
        characters = backend.characters().len(),
        "worker started"
    );
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(&mut backend, stdin, tokio::io::stdout()).await
}
