use std::io;

use thiserror::Error;

use crate::VertexId;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("vertex {vertex} is out of range (vertex count {count})")]
    OutOfRange { vertex: VertexId, count: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GraphError {
    pub fn out_of_range(vertex: VertexId, count: u32) -> Self {
        Self::OutOfRange { vertex, count }
    }
}
