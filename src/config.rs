use std::env;
use std::path::PathBuf;

use crate::error::ExecError;

/// Smallest buffer count a workspace-derived policy may settle on.
pub const MIN_BUFFERS: usize = 64;

/// Default number of runs merged in a single pass.
pub const DEFAULT_MERGE_ORDER: usize = 7;

pub const ENV_SORT_BUFFERS: &str = "CASEMERGE_SORT_BUFFERS";
pub const ENV_WORKSPACE: &str = "CASEMERGE_WORKSPACE";
pub const ENV_MERGE_ORDER: &str = "CASEMERGE_MERGE_ORDER";
pub const ENV_TMPDIR: &str = "CASEMERGE_TMPDIR";

/// Bound on the number of cases the partition phase keeps in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// At most this many cases per run.
    FixedSizeLimit(usize),
    /// A byte budget, converted into a case count from the encoded case size.
    WorkspaceBytes(usize),
}

impl MemoryPolicy {
    /// Number of cases a run may hold when each case occupies `case_size`
    /// bytes in the sort buffer.
    pub fn max_cases(&self, case_size: usize) -> usize {
        match *self {
            MemoryPolicy::FixedSizeLimit(n) => n.max(1),
            MemoryPolicy::WorkspaceBytes(bytes) => (bytes / case_size.max(1)).max(MIN_BUFFERS),
        }
    }
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        MemoryPolicy::WorkspaceBytes(64 * 1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortConfig {
    pub policy: MemoryPolicy,
    pub max_merge_order: usize,
    /// Where spilled runs go. `None` means the system temporary directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            policy: MemoryPolicy::default(),
            max_merge_order: DEFAULT_MERGE_ORDER,
            temp_dir: None,
        }
    }
}

impl SortConfig {
    pub fn with_buffers(buffers: usize) -> Self {
        Self {
            policy: MemoryPolicy::FixedSizeLimit(buffers),
            ..Self::default()
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Defaults overridden by the `CASEMERGE_*` environment variables.
    /// A buffer count takes precedence over a workspace size.
    pub fn from_env() -> Result<Self, ExecError> {
        let mut config = Self::default();
        if let Some(bytes) = parse_env(ENV_WORKSPACE)? {
            config.policy = MemoryPolicy::WorkspaceBytes(bytes);
        }
        if let Some(buffers) = parse_env(ENV_SORT_BUFFERS)? {
            config.policy = MemoryPolicy::FixedSizeLimit(buffers);
        }
        if let Some(order) = parse_env(ENV_MERGE_ORDER)? {
            if order < 2 {
                return Err(ExecError::Config(format!(
                    "{ENV_MERGE_ORDER} must be at least 2, got {order}"
                )));
            }
            config.max_merge_order = order;
        }
        if let Ok(dir) = env::var(ENV_TMPDIR) {
            if !dir.is_empty() {
                config.temp_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(config)
    }

    pub(crate) fn merge_order(&self) -> usize {
        self.max_merge_order.max(2)
    }
}

fn parse_env(name: &str) -> Result<Option<usize>, ExecError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ExecError::Config(format!("{name} must be a number, got {value:?}"))),
        Err(_) => Ok(None),
    }
}
