//! Attach stream handler
//!
//! An attached connection receives the bootstrap, the replay text in
//! fixed-size chunks, `bootstrap_done`, and then live events until the
//! session or the stream closes. Live data is only written once the client
//! has granted enough credit through `ack`.

use futures::{Sink, SinkExt, Stream, StreamExt};
use sessiond_protocol::{AttachRequest, BootstrapResponse, CodecError, InboundFrame, StreamMessage};
use sessiond_utils::SessiondError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::HandlerContext;
use crate::session::{Attachment, StreamEvent, Subscriber};

/// Why the live loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Session closed or subscriber dropped; tell the client
    Closed,
    /// Client stopped granting credit
    CreditTimeout,
    /// Client hung up or the socket failed
    Disconnected,
}

impl HandlerContext {
    /// Serve an attach request on `framed` until the stream ends
    pub async fn handle_attach<F>(&self, framed: &mut F, req: AttachRequest)
    where
        F: Sink<StreamMessage, Error = CodecError>
            + Stream<Item = std::result::Result<InboundFrame, CodecError>>
            + Unpin,
    {
        let session_id = req.session_id.clone();
        let attached = self.check_version(req.protocol_version).and_then(|()| {
            let session = self
                .registry
                .get(&session_id)
                .ok_or_else(|| SessiondError::session_not_found(&session_id))?;
            if !session.is_running() {
                return Err(SessiondError::session_not_running(&session_id));
            }
            let attachment = session.attach(req.stream_id.trim(), req.since)?;
            Ok((session, attachment))
        });
        let (session, attachment) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "attach rejected");
                let _ = framed.send(StreamMessage::error(&session_id, "", e.to_string())).await;
                return;
            }
        };

        let Attachment {
            bootstrap,
            subscriber,
            events,
        } = attachment;
        let stream_id = subscriber.stream_id().to_string();
        info!(session_id = %session_id, stream_id = %stream_id, "stream attached");

        let end = match self
            .send_bootstrap(framed, &session_id, &stream_id, bootstrap, req.with_buffer)
            .await
        {
            Ok(()) => self.stream_live(framed, &session_id, &subscriber, events).await,
            Err(_) => StreamEnd::Disconnected,
        };

        session.unsubscribe(&subscriber);
        match end {
            StreamEnd::Closed => {
                let _ = framed.send(StreamMessage::closed(&session_id, &stream_id)).await;
            }
            StreamEnd::CreditTimeout => {
                warn!(session_id = %session_id, stream_id = %stream_id, "credit timeout, dropping stream");
                let _ = framed
                    .send(StreamMessage::error(&session_id, &stream_id, "credit timeout"))
                    .await;
            }
            StreamEnd::Disconnected => {}
        }
        info!(session_id = %session_id, stream_id = %stream_id, end = ?end, "stream ended");
    }

    async fn send_bootstrap<F>(
        &self,
        framed: &mut F,
        session_id: &str,
        stream_id: &str,
        bootstrap: BootstrapResponse,
        with_buffer: bool,
    ) -> std::result::Result<(), CodecError>
    where
        F: Sink<StreamMessage, Error = CodecError> + Unpin,
    {
        let replay = bootstrap.replay_text().as_bytes().to_vec();
        framed
            .send(StreamMessage::bootstrap(session_id, stream_id, bootstrap))
            .await?;

        if with_buffer {
            let chunk_size = self.options().bootstrap_chunk_size.max(1);
            for chunk in replay.chunks(chunk_size) {
                framed
                    .send(StreamMessage::data(session_id, stream_id, chunk, "bootstrap"))
                    .await?;
            }
        }

        framed
            .send(StreamMessage::bootstrap_done(session_id, stream_id))
            .await
    }

    async fn stream_live<F>(
        &self,
        framed: &mut F,
        session_id: &str,
        subscriber: &Subscriber,
        mut events: mpsc::Receiver<StreamEvent>,
    ) -> StreamEnd
    where
        F: Sink<StreamMessage, Error = CodecError>
            + Stream<Item = std::result::Result<InboundFrame, CodecError>>
            + Unpin,
    {
        let stream_id = subscriber.stream_id().to_string();
        let credit_timeout = self.options().credit_timeout;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                inbound = framed.next() => match inbound {
                    // Stream connections carry no requests; ignore stray lines
                    Some(Ok(_)) => continue,
                    _ => return StreamEnd::Disconnected,
                },
                _ = self.shutdown.cancelled() => return StreamEnd::Closed,
            };

            let msg = match event {
                None => return StreamEnd::Closed,
                Some(StreamEvent::Data(data)) => {
                    let granted = tokio::select! {
                        granted = subscriber.wait_for_credit(data.len() as i64, credit_timeout) => granted,
                        _ = self.shutdown.cancelled() => return StreamEnd::Closed,
                    };
                    if !granted {
                        if subscriber.is_closed() {
                            continue;
                        }
                        return StreamEnd::CreditTimeout;
                    }
                    StreamMessage::data(session_id, &stream_id, &data, "")
                }
                Some(StreamEvent::Kitty(event)) => StreamMessage::kitty(session_id, &stream_id, event),
                Some(StreamEvent::Modes(modes)) => StreamMessage::modes(session_id, &stream_id, modes),
            };

            if let Err(e) = framed.send(msg).await {
                debug!(session_id = %session_id, stream_id = %stream_id, error = %e, "stream write failed");
                return StreamEnd::Disconnected;
            }
        }
    }
}
