use crate::case::{Case, Value};
use crate::dictionary::Dictionary;
use crate::ColumnId;

/// Builds output cases from a template and stamps FIRST and LAST on them.
pub(crate) struct CaseEmitter {
    template: Case,
    first: Option<ColumnId>,
    last: Option<ColumnId>,
    emitted: u64,
}

impl CaseEmitter {
    /// With `compute_flags` the template carries 0 in every IN column;
    /// otherwise IN, FIRST and LAST stay system-missing.
    pub fn new(
        dict: &Dictionary,
        in_cols: Vec<ColumnId>,
        first: Option<ColumnId>,
        last: Option<ColumnId>,
        compute_flags: bool,
    ) -> Self {
        let mut template = dict.missing_case();
        if compute_flags {
            for col in in_cols {
                template.set(col, Value::from(0));
            }
            Self {
                template,
                first,
                last,
                emitted: 0,
            }
        } else {
            Self {
                template,
                first: None,
                last: None,
                emitted: 0,
            }
        }
    }

    pub fn create_output_case(&self) -> Case {
        self.template.clone()
    }

    pub fn emit(&mut self, mut case: Case, first: bool, last: bool) -> Case {
        if let Some(col) = self.first {
            case.set(col, Value::from(first as i32));
        }
        if let Some(col) = self.last {
            case.set(col, Value::from(last as i32));
        }
        self.emitted += 1;
        case
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}
