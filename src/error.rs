use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to write {value} to register {address}")]
    Write {
        address: u16,
        value: u16,
        #[source]
        source: anyhow::Error,
    },

    #[error("value {value} for register {address} does not fit in 16 bits")]
    ValueOutOfRange { address: u16, value: i64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
