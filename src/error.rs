use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key length {0} exceeds the maximum key size")]
    KeyTooLarge(usize),

    #[error("value length {0} exceeds the maximum value size")]
    ValueTooLarge(usize),

    #[error("page store corrupted: {0}")]
    Corrupted(&'static str),

    #[error("backing region exhausted")]
    RegionFull,

    #[error("transaction {version} read keys written by a newer commit")]
    Conflict { version: u64 },

    #[error("invalid record: {0}")]
    InvalidRecord(&'static str),
}
