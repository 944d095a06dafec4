use beacon_domain::identifier::IdentifierError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Invalid configuration: {}", .errors.join(" "))]
	InvalidConfig { errors: Vec<String> },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<beacon_storage::Error> for Error {
	fn from(err: beacon_storage::Error) -> Self {
		match err {
			beacon_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			beacon_storage::Error::Identifier(inner) => inner.into(),
			beacon_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			beacon_storage::Error::NotFound(message) => Self::NotFound { message },
			beacon_storage::Error::Conflict(message) => Self::Conflict { message },
		}
	}
}

impl From<IdentifierError> for Error {
	fn from(err: IdentifierError) -> Self {
		Self::InvalidRequest { message: err.to_string() }
	}
}

impl From<beacon_providers::Error> for Error {
	fn from(err: beacon_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<beacon_config::Error> for Error {
	fn from(err: beacon_config::Error) -> Self {
		match err {
			beacon_config::Error::Validation { errors } => Self::InvalidConfig { errors },
			other => Self::InvalidConfig { errors: vec![other.to_string()] },
		}
	}
}
