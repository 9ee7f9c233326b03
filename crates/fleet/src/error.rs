use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown slave or agent: {0}")]
    NotFound(String),

    /// The id is already bound to a different endpoint or descriptor.
    #[error("conflict: {0}")]
    Conflict(String),

    /// No eligible slave can take another agent right now.
    #[error("no capacity for placement")]
    NoCapacity,

    /// Dispatch refused: the slave runs a different commit than the master.
    #[error("version mismatch on {slave_id}: master {master_commit}, slave {slave_commit}")]
    VersionMismatch {
        slave_id: String,
        master_commit: String,
        slave_commit: String,
    },

    #[error(transparent)]
    Persistence(#[from] drover_common::Error),
}

impl Error {
    /// Stable kind string for `{error, kind}` HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::NoCapacity => "no_capacity",
            Error::VersionMismatch { .. } => "version_mismatch",
            Error::Persistence(_) => "persistence",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
