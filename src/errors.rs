use thiserror::Error;

/// Malformed operand handed to balance arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("input error: {0}")]
pub struct InputError(pub String);

impl InputError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Two asset-tagged balances of different assets were combined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tried to combine balances of different assets: {left} and {right}")]
pub struct AssetMismatch {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    AssetMismatch(#[from] AssetMismatch),
}

/// A persisted or external record could not be turned into a domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("deserialization error: {0}")]
pub struct DeserializationError(pub String);

impl DeserializationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("unable to find a historical price for {from} to {to} at {timestamp}")]
    NoPriceForGivenTimestamp {
        from: String,
        to: String,
        timestamp: i64,
    },
    #[error("price query failed: {0}")]
    Remote(String),
}

/// A balance or history source failed to answer.
#[derive(Debug, Error)]
#[error("{source_name}: {message}")]
pub struct RemoteError {
    pub source_name: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AccountingError {
    #[error("attempted to set unsupported \"{0}\" as profit currency")]
    UnsupportedProfitCurrency(String),
    #[error("corrupt data: {0}")]
    CorruptData(String),
    #[error(transparent)]
    Price(#[from] PriceError),
}
