//! Action and result codes
//!
//! Both enumerations are closed. Values are fixed by deployed clients and
//! agents and must not change.

use std::fmt;

/// Operation selector sent by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCode {
    Shutdown,
    GetTrackingNumber,
    ListChangeRecords,
    ListPendingRequests,
    Add,
    Delete,
    LoginName,
    BeginOrClaimTransfer,
    Log,
    CheckWebCompileFlag,
    ListDirectory,
    DirectoryExists,
    GetImpactedFiles,
    ReloadUsers,
    SendEmail,
}

impl ActionCode {
    pub fn id(&self) -> i32 {
        match self {
            ActionCode::Shutdown => -1,
            ActionCode::GetTrackingNumber => 1,
            ActionCode::ListChangeRecords => 2,
            ActionCode::ListPendingRequests => 3,
            ActionCode::Add => 4,
            ActionCode::Delete => 5,
            ActionCode::LoginName => 6,
            ActionCode::BeginOrClaimTransfer => 7,
            ActionCode::Log => 8,
            ActionCode::CheckWebCompileFlag => 9,
            ActionCode::ListDirectory => 17,
            ActionCode::DirectoryExists => 18,
            ActionCode::GetImpactedFiles => 19,
            ActionCode::ReloadUsers => 22,
            ActionCode::SendEmail => 98,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            -1 => Some(ActionCode::Shutdown),
            1 => Some(ActionCode::GetTrackingNumber),
            2 => Some(ActionCode::ListChangeRecords),
            3 => Some(ActionCode::ListPendingRequests),
            4 => Some(ActionCode::Add),
            5 => Some(ActionCode::Delete),
            6 => Some(ActionCode::LoginName),
            7 => Some(ActionCode::BeginOrClaimTransfer),
            8 => Some(ActionCode::Log),
            9 => Some(ActionCode::CheckWebCompileFlag),
            17 => Some(ActionCode::ListDirectory),
            18 => Some(ActionCode::DirectoryExists),
            19 => Some(ActionCode::GetImpactedFiles),
            22 => Some(ActionCode::ReloadUsers),
            98 => Some(ActionCode::SendEmail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCode::Shutdown => "shutdown",
            ActionCode::GetTrackingNumber => "get_tracking_number",
            ActionCode::ListChangeRecords => "list_change_records",
            ActionCode::ListPendingRequests => "list_pending_requests",
            ActionCode::Add => "add",
            ActionCode::Delete => "delete",
            ActionCode::LoginName => "login_name",
            ActionCode::BeginOrClaimTransfer => "begin_or_claim_transfer",
            ActionCode::Log => "log",
            ActionCode::CheckWebCompileFlag => "check_web_compile_flag",
            ActionCode::ListDirectory => "list_directory",
            ActionCode::DirectoryExists => "directory_exists",
            ActionCode::GetImpactedFiles => "get_impacted_files",
            ActionCode::ReloadUsers => "reload_users",
            ActionCode::SendEmail => "send_email",
        }
    }

    /// Actions answered by the connection handler without touching shared state
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ActionCode::ListDirectory | ActionCode::DirectoryExists | ActionCode::GetImpactedFiles
        )
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i32> for ActionCode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        ActionCode::from_id(value).ok_or(value)
    }
}

/// Outcome selector sent back by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    NoOp,
    Error,
    Shutdown,
}

impl ResultCode {
    pub fn id(&self) -> i32 {
        match self {
            ResultCode::Success => 99,
            ResultCode::NoOp => 0,
            ResultCode::Error => -2,
            ResultCode::Shutdown => -1,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            99 => Some(ResultCode::Success),
            0 => Some(ResultCode::NoOp),
            -2 => Some(ResultCode::Error),
            -1 => Some(ResultCode::Shutdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::NoOp => "noop",
            ResultCode::Error => "error",
            ResultCode::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i32> for ResultCode {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, i32> {
        ResultCode::from_id(value).ok_or(value)
    }
}

/// Code of the out-of-band terminal signal (same value in both directions)
pub const SHUTDOWN_CODE: i32 = -1;

/// Integer payload that turns `BeginOrClaimTransfer` into a claim
pub const CLAIM_SENTINEL: i32 = 7;
