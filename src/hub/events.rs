//! Notifications a hub session emits to its owner

use std::fmt;

/// Why the hub refused our nick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NickError {
    /// `$ValidateDenide`
    Taken,
    /// `$BadNick`
    Rejected,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Socket closed or failed
    Transport(String),
    /// `$ForceMove`
    Redirect,
    NickError(NickError),
    /// Local `disconnect()` call
    UserRequested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Transport(msg) => write!(f, "connection lost: {}", msg),
            DisconnectReason::Redirect => f.write_str("redirected"),
            DisconnectReason::NickError(NickError::Taken) => f.write_str("nick taken"),
            DisconnectReason::NickError(NickError::Rejected) => f.write_str("nick rejected"),
            DisconnectReason::UserRequested => f.write_str("disconnected"),
        }
    }
}

/// A chat line, public or private
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub from: String,
    pub text: String,
    /// `* nick text` or `/me`
    pub third_person: bool,
    /// Set for `$To:` messages: the nick replies go to
    pub reply_to: Option<String>,
    /// Sender is not in the user list
    pub from_hub: bool,
}

/// `$UserCommand` kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommandKind {
    Separator,
    Raw,
    RawOnce,
    Clear,
}

impl UserCommandKind {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Separator),
            1 => Some(Self::Raw),
            2 => Some(Self::RawOnce),
            255 => Some(Self::Clear),
            _ => None,
        }
    }
}

/// A hub-supplied menu command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCommand {
    pub kind: UserCommandKind,
    /// Context bitmask (hub menu, user menu, search, file list)
    pub context: i32,
    /// Menu path with `/` as separator
    pub name: String,
    pub command: String,
}

/// Events delivered on the session's event channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Connected,
    /// Fired once per login
    LoggedIn,
    Disconnected(DisconnectReason),
    NickError(NickError),
    /// Hub asked for a password and none is stored
    GetPassword,
    BadPassword,
    Redirect(String),
    HubFull,
    HubUpdated { name: String, description: String },
    HubTopic(String),
    /// `$LogedIn`: the hub confirmed operator rights
    OperatorLogin,
    UserUpdated(String),
    UserRemoved(String),
    Message(ChatMessage),
    StatusMessage { text: String, spam: bool },
    UserCommand(UserCommand),
    /// One notice per newly detected flooder
    FloodDetected(String),
}
