use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message key: {0}")]
    MalformedKey(String),

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),
}
