use thiserror::Error;

use crate::dictionary::VarWidth;

/// Broad classes of failure. Every [`ExecError`] belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected before any case is read.
    Configuration,
    /// Same-named variables that cannot be reconciled.
    SchemaConflict,
    /// Temporary storage allocation or I/O.
    Resource,
    /// An input that holds no cases at all.
    EmptyInput,
    /// Bad data observed while cases are flowing.
    Data,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0} is not a valid variable name")]
    InvalidName(String),

    #[error("variable {0} is already defined")]
    DuplicateVariable(String),

    #[error(
        "cannot rename {from} as {to} because there already exists a variable named {to}"
    )]
    RenameConflict { from: String, to: String },

    #[error("cannot DROP all variables from the dictionary")]
    DropAll,

    #[error("unknown variable {0}")]
    UnknownVariable(String),

    #[error(
        "variable name {name} specified on {subcommand} subcommand duplicates an existing variable name"
    )]
    FlagNameCollision { subcommand: &'static str, name: String },

    #[error("file {source_name} lacks BY variable {variable}")]
    MissingByVariable { source_name: String, variable: String },

    #[error("BY is required when {0} is specified")]
    KeyRequired(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("variable {name} has different types in different files ({})", describe_types(.sources))]
    TypeConflict {
        name: String,
        sources: Vec<(String, VarWidth)>,
    },

    #[error("{source_name} is not sorted on the BY variables: case {case_number} is out of order")]
    UnsortedSource {
        source_name: String,
        case_number: u64,
    },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("all data missing: {0} contains no cases")]
    EmptyInput(String),

    #[error("temporary storage failure: {0}")]
    Resource(#[from] std::io::Error),

    #[error("run record encoding failure: {0}")]
    Codec(#[from] bincode::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::InvalidName(_)
            | ExecError::DuplicateVariable(_)
            | ExecError::RenameConflict { .. }
            | ExecError::DropAll
            | ExecError::UnknownVariable(_)
            | ExecError::FlagNameCollision { .. }
            | ExecError::MissingByVariable { .. }
            | ExecError::KeyRequired(_)
            | ExecError::Config(_) => ErrorKind::Configuration,
            ExecError::TypeConflict { .. } => ErrorKind::SchemaConflict,
            ExecError::Resource(_) | ExecError::Codec(_) => ErrorKind::Resource,
            ExecError::Csv(e) if e.is_io_error() => ErrorKind::Resource,
            ExecError::Csv(_) => ErrorKind::Data,
            ExecError::EmptyInput(_) => ErrorKind::EmptyInput,
            ExecError::UnsortedSource { .. } | ExecError::Malformed(_) | ExecError::Other(_) => {
                ErrorKind::Data
            }
        }
    }
}

fn describe_types(sources: &[(String, VarWidth)]) -> String {
    sources
        .iter()
        .map(|(source, width)| match width {
            VarWidth::Numeric => format!("numeric in {source}"),
            VarWidth::String(_) => format!("string in {source}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
