//! Connection handler
//!
//! One task per client session. Reads an action, answers it, and repeats
//! until the client shuts down, the transport fails, the session's email
//! report succeeds, or the server shuts down. On exit it always tries to
//! send the terminal shutdown code.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::ShutdownSignal;
use super::Services;
use super::dispatcher::{Dispatcher, Reply};
use super::state::HandlerState;
use crate::core_types::SessionId;
use crate::error::QarsError;
use crate::logging::WIRE_TARGET;
use crate::protocol::{ActionCode, Frame, Payload, ResultCode, read_frame, write_frame, write_shutdown};

pub struct ConnectionHandler<S> {
    session: SessionId,
    stream: S,
    dispatcher: Arc<Dispatcher>,
    services: Services,
    shutdown: ShutdownSignal,
    max_frame_bytes: usize,
    state: HandlerState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        session: SessionId,
        stream: S,
        dispatcher: Arc<Dispatcher>,
        services: Services,
        shutdown: ShutdownSignal,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            session,
            stream,
            dispatcher,
            services,
            shutdown,
            max_frame_bytes,
            state: HandlerState::Active,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Serve the session to completion
    pub async fn run(mut self) -> HandlerState {
        let session = self.session;
        info!(session, "Session started");

        while self.state.is_active() {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!(session, "Server shutting down, closing session");
                    self.transition(HandlerState::Closing);
                    break;
                }
                frame = read_frame(&mut self.stream, self.max_frame_bytes) => frame,
            };

            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    self.on_read_failure(&e);
                    break;
                }
            };

            let (action, reply) = self.answer(frame).await;
            debug!(
                target: WIRE_TARGET,
                session,
                action = ?action,
                result = %reply.code,
                payload = reply.payload.kind(),
                "Reply"
            );

            if reply.code == ResultCode::Shutdown {
                self.transition(HandlerState::Closing);
                break;
            }

            if let Err(e) = write_frame(&mut self.stream, reply.code.id(), &reply.payload, self.max_frame_bytes).await {
                warn!(session, code = e.code(), error = %e, "Reply not delivered");
                self.dispatcher.close_session(session, "Could not write");
                self.transition(HandlerState::Closing);
                break;
            }

            // a successful report ends the agent's session
            if action == Some(ActionCode::SendEmail) && reply.code == ResultCode::Success {
                self.transition(HandlerState::Closing);
            }
        }

        self.close().await;
        self.state
    }

    async fn answer(&self, frame: Frame) -> (Option<ActionCode>, Reply) {
        let Some(action) = ActionCode::from_id(frame.code) else {
            warn!(session = self.session, code = frame.code, "Unknown action code");
            return (None, Reply::error());
        };
        debug!(target: WIRE_TARGET, session = self.session, action = %action, payload = frame.payload.kind(), "Request");

        let reply = if action.is_local() {
            self.answer_locally(action, frame.payload).await
        } else {
            self.dispatcher.dispatch(self.session, action, frame.payload).await
        };
        (Some(action), reply)
    }

    /// Filesystem questions answered without touching shared state
    async fn answer_locally(&self, action: ActionCode, payload: Payload) -> Reply {
        let Payload::Str(path) = payload else {
            warn!(session = self.session, action = %action, payload = payload.kind(), "Expected a path");
            return Reply::error();
        };
        match action {
            ActionCode::ListDirectory => match self.services.fs.list_directory(&path).await {
                Some(entries) => Reply::success(entries),
                None => Reply::error(),
            },
            ActionCode::DirectoryExists => Reply::success(self.services.fs.directory_exists(&path).await),
            ActionCode::GetImpactedFiles => {
                if !path.ends_with(".i") {
                    return Reply::error();
                }
                match self.services.impact.impacted_files(self.session, &path).await {
                    Ok(files) => Reply::success(files),
                    Err(e) => {
                        warn!(session = self.session, file = %path, error = %e, "Impact analysis failed");
                        Reply::error()
                    }
                }
            }
            _ => Reply::error(),
        }
    }

    fn on_read_failure(&mut self, e: &QarsError) {
        if e.is_transport() {
            info!(session = self.session, code = e.code(), error = %e, "Session read failed");
        } else {
            warn!(session = self.session, code = e.code(), error = %e, "Session read failed");
        }
        self.dispatcher.close_session(self.session, "Could not read");
        self.transition(HandlerState::Closing);
    }

    fn transition(&mut self, next: HandlerState) {
        if self.state.can_transition_to(next) {
            debug!(session = self.session, from = %self.state, to = %next, "Handler state");
            self.state = next;
        }
    }

    /// Best-effort terminal signal and transport release
    async fn close(&mut self) {
        if let Err(e) = write_shutdown(&mut self.stream).await {
            debug!(session = self.session, error = %e, "Shutdown code not delivered");
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(session = self.session, error = %e, "Transport shutdown failed");
        }
        self.dispatcher.close_session(self.session, "Connection closed");
        self.transition(HandlerState::Closed);
        info!(session = self.session, "Session ended");
    }
}
