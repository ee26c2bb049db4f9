//! Newline-delimited JSON transport for the sync channel.
//!
//! Requests, one per line:
//!
//! ```json
//! {"type":"watch-dir","path":"/abs/project"}
//! {"type":"watch-dir-clear","path":"/abs/project"}
//! ```
//!
//! Every request is answered with `{"type":"ack",...}` or
//! `{"type":"error",...}`. Trees arrive as
//! `{"type":"watch-dir-update","path":...,"tree":{...}}` at any time after the
//! matching `watch-dir`, the first one before its ack.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ChannelHandle, TreeUpdate};
use crate::node::PathNode;

/// A request read from the transport.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireRequest {
    WatchDir { path: PathBuf },
    WatchDirClear { path: PathBuf },
}

impl WireRequest {
    fn name(&self) -> &'static str {
        match self {
            Self::WatchDir { .. } => super::WATCH_DIR,
            Self::WatchDirClear { .. } => super::WATCH_DIR_CLEAR,
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::WatchDir { path } | Self::WatchDirClear { path } => path,
        }
    }
}

/// A message written to the transport.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WireMessage<'a> {
    Ack {
        request: &'static str,
        path: &'a Path,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<&'a Path>,
        message: String,
    },
    WatchDirUpdate {
        path: &'a Path,
        tree: &'a PathNode,
    },
}

/// Serve one connection over a line-oriented byte stream until the reader
/// hits EOF. Watches opened by this connection are cleared when it ends.
pub async fn serve<R, W>(handle: ChannelHandle, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut connection = handle.connect();
    let mut lines = BufReader::new(reader).lines();
    tracing::info!(connection = connection.id(), "serving sync channel");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let request = match serde_json::from_str::<WireRequest>(&line) {
                    Ok(r) => r,
                    Err(err) => {
                        let message = WireMessage::Error {
                            request: None,
                            path: None,
                            message: format!("invalid request: {err}"),
                        };
                        write_message(&mut writer, &message).await?;
                        continue;
                    }
                };

                let result = match &request {
                    WireRequest::WatchDir { path } => connection.watch_dir(path).await,
                    WireRequest::WatchDirClear { path } => connection.watch_dir_clear(path).await,
                };
                // The initial tree is already queued; write it before the ack.
                while let Some(update) = connection.try_next_update() {
                    write_update(&mut writer, &update).await?;
                }
                let message = match result {
                    Ok(()) => WireMessage::Ack {
                        request: request.name(),
                        path: request.path(),
                    },
                    Err(err) => WireMessage::Error {
                        request: Some(request.name()),
                        path: Some(request.path()),
                        message: err.to_string(),
                    },
                };
                write_message(&mut writer, &message).await?;
            }
            update = connection.next_update() => {
                match update {
                    Some(update) => write_update(&mut writer, &update).await?,
                    None => break,
                }
            }
        }
    }

    tracing::info!(connection = connection.id(), "sync channel closed");
    Ok(())
}

async fn write_update<W: AsyncWrite + Unpin>(writer: &mut W, update: &TreeUpdate) -> anyhow::Result<()> {
    tracing::trace!(kind = super::WATCH_DIR_UPDATE, path = %update.path.display(), "push");
    let message = WireMessage::WatchDirUpdate {
        path: &update.path,
        tree: &update.tree,
    };
    write_message(writer, &message).await
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &WireMessage<'_>,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
