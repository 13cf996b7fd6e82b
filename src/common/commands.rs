use crate::session::media::MediaFile;

/// Commands the UI sends to the session loop.
#[derive(Debug)]
pub enum SessionCommand {
    /// Claim a username on the peer network.
    RegisterIdentity(String),
    /// Open a channel to another username.
    Connect(String),
    SendText(String),
    SendFile(MediaFile),
    Logout,
}
