use std::collections::HashMap;

use crate::dictionary::{names_equal, Dictionary, MissingValues, VarWidth, Variable};
use crate::error::ExecError;
use crate::key::{SortDirection, SortField, SortKey};
use crate::ColumnId;

use super::{SourceRole, SourceSpec, Warning};

/// Where one source column lands in the output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnMap {
    pub src: ColumnId,
    pub dst: ColumnId,
    pub width: VarWidth,
    /// User-missing values as the source itself declares them.
    pub missing: MissingValues,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceLayout {
    pub map: Vec<ColumnMap>,
    pub in_col: Option<ColumnId>,
    /// Source columns of the BY variables, in key order.
    pub by_cols: Vec<ColumnId>,
}

#[derive(Debug)]
pub(crate) struct MergedSchema {
    pub dict: Dictionary,
    pub sources: Vec<SourceLayout>,
    pub in_cols: Vec<ColumnId>,
    pub first: Option<ColumnId>,
    pub last: Option<ColumnId>,
    /// The BY key over extracted key tuples: field `i` reads position `i`.
    /// BY variables need not survive into the output.
    pub key: SortKey,
    pub warnings: Vec<Warning>,
}

pub(crate) struct SchemaMerger<'a> {
    pub specs: &'a [SourceSpec],
    pub dicts: &'a [Dictionary],
    pub by: &'a [(String, SortDirection)],
    pub first: Option<&'a str>,
    pub last: Option<&'a str>,
    pub drop: &'a [String],
    pub keep: &'a [String],
}

struct TypeConflict {
    name: String,
    sources: Vec<(String, VarWidth)>,
}

impl SchemaMerger<'_> {
    pub fn merge(&self) -> Result<MergedSchema, ExecError> {
        let mut warnings = Vec::new();
        let encoding = self.output_encoding(&mut warnings);
        let mut out = Dictionary::new(&encoding);

        // (source column, output name, source missing values), resolved to
        // output columns at the end once global DROP and KEEP have run.
        let mut pending: Vec<Vec<(ColumnId, String, MissingValues)>> =
            Vec::with_capacity(self.specs.len());
        let mut by_cols = Vec::with_capacity(self.specs.len());
        let mut origin: HashMap<String, String> = HashMap::new();
        let mut conflicts: Vec<TypeConflict> = Vec::new();

        for (spec, dict) in self.specs.iter().zip(self.dicts) {
            let source_name = spec.handle.to_string();
            let view = source_view(spec, dict)?;

            let mut cols = Vec::with_capacity(self.by.len());
            for (name, _) in self.by {
                let (col, _) = view
                    .iter()
                    .find(|(_, v)| names_equal(v.name(), name))
                    .ok_or_else(|| ExecError::MissingByVariable {
                        source_name: source_name.clone(),
                        variable: name.clone(),
                    })?;
                cols.push(*col);
            }
            by_cols.push(cols);

            let mut mapped = Vec::with_capacity(view.len());
            for (col, var) in view {
                let Some(idx) = out.lookup(var.name()) else {
                    origin.insert(var.name().to_lowercase(), source_name.clone());
                    mapped.push((col, var.name().to_string(), var.missing_values().clone()));
                    out.add_var(var)?;
                    continue;
                };

                let existing = out.var(idx).width();
                if !existing.same_type(&var.width()) {
                    let key = var.name().to_lowercase();
                    match conflicts.iter_mut().find(|c| c.name.to_lowercase() == key) {
                        Some(conflict) => conflict.sources.push((source_name.clone(), var.width())),
                        None => conflicts.push(TypeConflict {
                            name: out.var(idx).name().to_string(),
                            sources: vec![
                                (origin.get(&key).cloned().unwrap_or_default(), existing),
                                (source_name.clone(), var.width()),
                            ],
                        }),
                    }
                    continue;
                }

                let target = out.var_mut(idx);
                if let (VarWidth::String(have), VarWidth::String(want)) = (existing, var.width()) {
                    if want > have {
                        target.set_width(var.width());
                    }
                }
                if target.label().is_none() && var.label().is_some() {
                    target.set_label(var.label().map(str::to_string));
                }
                if target.missing_values().is_empty() && !var.missing_values().is_empty() {
                    target.set_missing_values(var.missing_values().clone());
                }
                mapped.push((col, var.name().to_string(), var.missing_values().clone()));
            }
            pending.push(mapped);

            if out.label().is_none() {
                out.set_label(dict.label().map(str::to_string));
            }
            out.add_documents(dict.documents());
        }

        for conflict in &conflicts {
            if self.by.iter().any(|(n, _)| names_equal(n, &conflict.name)) {
                return Err(type_conflict(conflict));
            }
        }

        let key = tuple_key(&SortKey::from_names(&out, self.by)?);

        if !self.drop.is_empty() {
            out.drop_vars(self.drop)?;
        }
        if !self.keep.is_empty() {
            out.keep_vars(self.keep)?;
        }
        if let Some(conflict) = conflicts.iter().find(|c| out.lookup(&c.name).is_some()) {
            return Err(type_conflict(conflict));
        }

        let mut sources = Vec::with_capacity(self.specs.len());
        for ((spec, mapped), by_cols) in self.specs.iter().zip(pending).zip(by_cols) {
            let map = mapped
                .into_iter()
                .filter_map(|(src, name, missing)| {
                    out.lookup(&name).map(|dst| ColumnMap {
                        src,
                        dst,
                        width: out.var(dst).width(),
                        missing,
                    })
                })
                .collect();
            let in_col = match &spec.in_var {
                Some(name) => Some(out.create_flag_var("IN", name)?),
                None => None,
            };
            sources.push(SourceLayout {
                map,
                in_col,
                by_cols,
            });
        }
        let in_cols = sources.iter().filter_map(|s| s.in_col).collect();
        let first = match self.first {
            Some(name) => Some(out.create_flag_var("FIRST", name)?),
            None => None,
        };
        let last = match self.last {
            Some(name) => Some(out.create_flag_var("LAST", name)?),
            None => None,
        };

        Ok(MergedSchema {
            dict: out,
            sources,
            in_cols,
            first,
            last,
            key,
            warnings,
        })
    }

    /// The first RECORD source's encoding. Warns if any source differs.
    fn output_encoding(&self, warnings: &mut Vec<Warning>) -> String {
        let chosen = self
            .specs
            .iter()
            .zip(self.dicts)
            .find(|(spec, _)| spec.role == SourceRole::Record)
            .or_else(|| self.specs.iter().zip(self.dicts).next())
            .map(|(_, dict)| dict.encoding().to_string())
            .unwrap_or_default();

        if self
            .dicts
            .iter()
            .any(|d| !d.encoding().eq_ignore_ascii_case(&chosen))
        {
            let warning = Warning::EncodingMismatch {
                sources: self
                    .specs
                    .iter()
                    .zip(self.dicts)
                    .map(|(spec, dict)| (spec.handle.to_string(), dict.encoding().to_string()))
                    .collect(),
                chosen: chosen.clone(),
            };
            log_warn!("{}", warning);
            warnings.push(warning);
        }
        chosen
    }
}

fn tuple_key(key: &SortKey) -> SortKey {
    SortKey::new(
        key.fields()
            .iter()
            .enumerate()
            .map(|(column, field)| SortField {
                column,
                ..field.clone()
            })
            .collect(),
    )
}

fn type_conflict(conflict: &TypeConflict) -> ExecError {
    ExecError::TypeConflict {
        name: conflict.name.clone(),
        sources: conflict.sources.clone(),
    }
}

/// The source's variables after its own RENAME, DROP and KEEP, each paired
/// with its column in the source dictionary. Scratch variables are left out.
fn source_view(spec: &SourceSpec, dict: &Dictionary) -> Result<Vec<(ColumnId, Variable)>, ExecError> {
    let mut working = dict.clone();
    if !spec.rename.is_empty() {
        working.rename_vars(&spec.rename)?;
    }
    let renamed: Vec<String> = working.vars().iter().map(|v| v.name().to_string()).collect();
    if !spec.drop.is_empty() {
        working.drop_vars(&spec.drop)?;
    }
    if !spec.keep.is_empty() {
        working.keep_vars(&spec.keep)?;
    }
    working.delete_scratch_vars();

    working
        .vars()
        .iter()
        .map(|var| {
            let col = renamed
                .iter()
                .position(|n| names_equal(n, var.name()))
                .ok_or_else(|| ExecError::UnknownVariable(var.name().to_string()))?;
            Ok((col, var.clone()))
        })
        .collect()
}
