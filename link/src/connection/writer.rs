//! Outbound writer task.
//!
//! Exactly one writer runs per transport. It drains the outbound queue in
//! FIFO order, so frames reach the wire in the order they were submitted.
//! A write failure or the disconnect sentinel terminates the session.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::engine::{Inner, Session, SessionEnd};
use super::{CLOSE_CODE_ABNORMAL, CLOSE_CODE_NORMAL};
use crate::{
    codec,
    error::{RelayLinkError, Result},
    timeouts::within,
};

/// One unit of work for the writer.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Write `text`. `completes` names a pending entry whose completion is
    /// the write itself (operations sent without QoS).
    Frame { text: String, completes: Option<u64> },
    /// Send DISCONNECT, close the transport and end the session.
    Disconnect,
}

pub(crate) fn spawn_writer(
    inner: Arc<Inner>,
    session: Arc<Session>,
    rx: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    let runtime = inner.runtime().clone();
    runtime.spawn(run_writer(inner, session, rx))
}

async fn run_writer(
    inner: Arc<Inner>,
    session: Arc<Session>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame { text, completes } => {
                if let Err(e) = write_frame(&inner, &session, &text).await {
                    log::warn!("[relay-link] Write to {} failed: {}", session.url(), e);
                    session.terminate(SessionEnd::Closed {
                        code: Some(CLOSE_CODE_ABNORMAL),
                        reason: e.to_string(),
                    });
                    return;
                }
                if let Some(seq) = completes {
                    inner.complete_written(seq);
                }
            },
            Outbound::Disconnect => {
                log::debug!("[relay-link] Writer reached disconnect sentinel");
                match codec::encode(&codec::disconnect()) {
                    Ok(text) => {
                        if let Err(e) = write_frame(&inner, &session, &text).await {
                            log::debug!("[relay-link] DISCONNECT not delivered: {}", e);
                        }
                    },
                    Err(e) => log::warn!("[relay-link] {}", e),
                }
                let close = session.sink().lock().await.close(CLOSE_CODE_NORMAL, "client disconnect").await;
                if let Err(e) = close {
                    log::debug!("[relay-link] Close after DISCONNECT failed: {}", e);
                }
                session.terminate(SessionEnd::Shutdown);
                return;
            },
        }
    }
}

async fn write_frame(inner: &Inner, session: &Session, text: &str) -> Result<()> {
    let limit = inner.timeouts.send_timeout;
    let written = {
        let mut sink = session.sink().lock().await;
        within(limit, sink.send_text(text)).await
    };
    match written {
        Some(Ok(())) => {
            inner.handlers.emit_send(text);
            Ok(())
        },
        Some(Err(e)) => Err(e),
        None => Err(RelayLinkError::TimeoutError(format!("Frame write exceeded {:?}", limit))),
    }
}
