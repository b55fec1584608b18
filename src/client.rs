//! Release client
//!
//! Async client for the QARS protocol, used by the transfer agent and the
//! end-to-end tests. One request is in flight at a time; every request gets
//! exactly one reply frame, or the terminal shutdown code when the server
//! closes the session.

use std::io;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::core_types::SessionId;
use crate::entity::{ChangeRecord, TransferRequest, User};
use crate::error::QarsError;
use crate::logging::WIRE_TARGET;
use crate::protocol::{
    ActionCode, CLAIM_SENTINEL, DEFAULT_MAX_FRAME_BYTES, Payload, RemoteFile, ResultCode, SHUTDOWN_CODE,
    read_frame, write_frame,
};

/// One reply as received. `code` stays raw so unexpected codes are visible.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: i32,
    pub payload: Payload,
}

impl Response {
    pub fn result(&self) -> Option<ResultCode> {
        ResultCode::from_id(self.code)
    }

    pub fn is_success(&self) -> bool {
        self.result() == Some(ResultCode::Success)
    }

    pub fn is_shutdown(&self) -> bool {
        self.code == SHUTDOWN_CODE
    }
}

pub struct ReleaseClient {
    stream: TcpStream,
    max_frame_bytes: usize,
    closed: bool,
}

impl ReleaseClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, QarsError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            closed: false,
        })
    }

    /// True once the server has sent the terminal shutdown code
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a raw action code. Unknown codes are allowed so servers can be probed.
    pub async fn send_raw(&mut self, code: i32, payload: Payload) -> Result<Response, QarsError> {
        if self.closed {
            return Err(QarsError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "session closed by server",
            )));
        }
        write_frame(&mut self.stream, code, &payload, self.max_frame_bytes).await?;
        self.recv().await
    }

    pub async fn request(&mut self, action: ActionCode, payload: impl Into<Payload>) -> Result<Response, QarsError> {
        self.send_raw(action.id(), payload.into()).await
    }

    /// Read the next frame without sending anything
    pub async fn recv(&mut self) -> Result<Response, QarsError> {
        let frame = read_frame(&mut self.stream, self.max_frame_bytes).await?;
        if frame.is_shutdown() {
            self.closed = true;
        }
        debug!(target: WIRE_TARGET, code = frame.code, payload = frame.payload.kind(), "Client received");
        Ok(Response {
            code: frame.code,
            payload: frame.payload,
        })
    }

    pub async fn tracking_number(&mut self) -> Result<SessionId, QarsError> {
        let response = self.request(ActionCode::GetTrackingNumber, Payload::Null).await?;
        response
            .payload
            .as_int()
            .filter(|_| response.is_success())
            .ok_or_else(|| unexpected("tracking number", &response))
    }

    pub async fn login(&mut self, login: &str) -> Result<User, QarsError> {
        let response = self.request(ActionCode::LoginName, login).await?;
        match response.payload {
            Payload::User(user) if response.code == ResultCode::Success.id() => Ok(user),
            _ => Err(unexpected("login", &response)),
        }
    }

    /// Empty when the server answers `NoOp`
    pub async fn list_change_records(&mut self) -> Result<Vec<ChangeRecord>, QarsError> {
        let response = self.request(ActionCode::ListChangeRecords, Payload::Null).await?;
        match response.result() {
            Some(ResultCode::NoOp) => Ok(Vec::new()),
            Some(ResultCode::Success) => response
                .payload
                .clone()
                .into_change_records()
                .ok_or_else(|| unexpected("change record list", &response)),
            _ => Err(unexpected("change record list", &response)),
        }
    }

    pub async fn list_pending(&mut self) -> Result<Vec<TransferRequest>, QarsError> {
        let response = self.request(ActionCode::ListPendingRequests, Payload::Null).await?;
        match response.result() {
            Some(ResultCode::NoOp) => Ok(Vec::new()),
            Some(ResultCode::Success) => response
                .payload
                .clone()
                .into_requests()
                .ok_or_else(|| unexpected("request list", &response)),
            _ => Err(unexpected("request list", &response)),
        }
    }

    pub async fn add(&mut self, item: impl Into<Payload>) -> Result<Response, QarsError> {
        self.request(ActionCode::Add, item).await
    }

    pub async fn delete(&mut self, item: impl Into<Payload>) -> Result<Response, QarsError> {
        self.request(ActionCode::Delete, item).await
    }

    pub async fn log(&mut self, message: &str) -> Result<Response, QarsError> {
        self.request(ActionCode::Log, message).await
    }

    pub async fn check_web_compile_flag(&mut self, flag_file: &str) -> Result<Response, QarsError> {
        self.request(ActionCode::CheckWebCompileFlag, flag_file).await
    }

    pub async fn begin_transfer(&mut self, requests: Vec<TransferRequest>) -> Result<Response, QarsError> {
        self.request(ActionCode::BeginOrClaimTransfer, requests).await
    }

    pub async fn claim_transfer(&mut self) -> Result<Response, QarsError> {
        self.request(ActionCode::BeginOrClaimTransfer, CLAIM_SENTINEL).await
    }

    pub async fn send_email(&mut self) -> Result<Response, QarsError> {
        self.request(ActionCode::SendEmail, Payload::Null).await
    }

    pub async fn reload_users(&mut self) -> Result<Response, QarsError> {
        self.request(ActionCode::ReloadUsers, Payload::Null).await
    }

    /// `None` when the server could not read the directory
    pub async fn list_directory(&mut self, path: &str) -> Result<Option<Vec<RemoteFile>>, QarsError> {
        let response = self.request(ActionCode::ListDirectory, path).await?;
        if !response.is_success() {
            return Ok(None);
        }
        let entries = response
            .payload
            .as_list()
            .ok_or_else(|| unexpected("directory listing", &response))?;
        entries
            .iter()
            .map(|entry| RemoteFile::from_payload(entry).ok_or_else(|| unexpected("directory entry", &response)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub async fn directory_exists(&mut self, path: &str) -> Result<bool, QarsError> {
        let response = self.request(ActionCode::DirectoryExists, path).await?;
        Ok(response.is_success() && response.payload.as_bool() == Some(true))
    }

    pub async fn impacted_files(&mut self, include: &str) -> Result<Response, QarsError> {
        self.request(ActionCode::GetImpactedFiles, include).await
    }

    /// End the session; the server answers with the shutdown code
    pub async fn shutdown(mut self) -> Result<Response, QarsError> {
        self.request(ActionCode::Shutdown, Payload::Null).await
    }
}

fn unexpected(what: &str, response: &Response) -> QarsError {
    QarsError::Validation(format!(
        "unexpected {} reply: code {} with {} payload",
        what,
        response.code,
        response.payload.kind()
    ))
}
