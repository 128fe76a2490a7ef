#[macro_use]
mod logger;

pub mod case;
pub mod combine;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod executor;
pub mod io;
pub mod key;

pub mod prelude {
    pub use crate::case::{Case, Value};
    pub use crate::combine::{
        Combine, CombineMode, CombinedReader, DatasetOpener, SourceHandle, SourceRole,
        SourceSpec, Warning,
    };
    pub use crate::config::{MemoryPolicy, SortConfig};
    pub use crate::dictionary::{Dictionary, Format, MissingValues, VarWidth, Variable};
    pub use crate::error::{ErrorKind, ExecError};
    pub use crate::executor::{CaseReader, CaseWriter, Dataset, MemCaseReader, MemCaseWriter};
    pub use crate::executor::sort::{sort, ExternalSort};
    pub use crate::key::{SortDirection, SortKey};
}

pub type ColumnId = usize;
