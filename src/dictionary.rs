use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::case::{Case, Value};
use crate::error::ExecError;

pub const MAX_STRING_WIDTH: u16 = 32767;
pub const ID_MAX_LEN: usize = 64;
pub const DEFAULT_ENCODING: &str = "UTF-8";

const RESERVED_WORDS: [&str; 13] = [
    "ALL", "AND", "BY", "EQ", "GE", "GT", "LE", "LT", "NE", "NOT", "OR", "TO", "WITH",
];

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[\p{L}@#$][\p{L}\p{N}._$#@]*$").expect("identifier pattern is valid")
    })
}

/// Checks `name` against the variable-naming rules.
pub fn check_name(name: &str) -> Result<(), ExecError> {
    let reserved = RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(name));
    if name.len() > ID_MAX_LEN || reserved || !identifier_regex().is_match(name) {
        return Err(ExecError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarWidth {
    Numeric,
    String(u16),
}

impl VarWidth {
    pub fn is_numeric(&self) -> bool {
        matches!(self, VarWidth::Numeric)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, VarWidth::String(_))
    }

    pub fn same_type(&self, other: &VarWidth) -> bool {
        self.is_numeric() == other.is_numeric()
    }
}

impl fmt::Display for VarWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarWidth::Numeric => write!(f, "numeric"),
            VarWidth::String(w) => write!(f, "string({w})"),
        }
    }
}

/// Print/write format. Only the two basic families are modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    F { width: u16, decimals: u8 },
    A { width: u16 },
}

impl Format {
    pub fn default_for(width: VarWidth) -> Self {
        match width {
            VarWidth::Numeric => Format::F {
                width: 8,
                decimals: 2,
            },
            VarWidth::String(w) => Format::A { width: w },
        }
    }

    /// Format used for IN, FIRST and LAST flag variables.
    pub fn flag() -> Self {
        Format::F {
            width: 1,
            decimals: 0,
        }
    }

    pub fn var_width(&self) -> VarWidth {
        match *self {
            Format::F { .. } => VarWidth::Numeric,
            Format::A { width } => VarWidth::String(width),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::F { width, decimals } => write!(f, "F{width}.{decimals}"),
            Format::A { width } => write!(f, "A{width}"),
        }
    }
}

impl FromStr for Format {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ExecError::Config(format!("invalid format {s:?}"));
        let upper = s.trim().to_ascii_uppercase();
        if let Some(rest) = upper.strip_prefix('A') {
            let width: u16 = rest.parse().map_err(|_| bad())?;
            if width == 0 || width > MAX_STRING_WIDTH {
                return Err(bad());
            }
            Ok(Format::A { width })
        } else if let Some(rest) = upper.strip_prefix('F') {
            let (w, d) = rest.split_once('.').unwrap_or((rest, "0"));
            let width: u16 = w.parse().map_err(|_| bad())?;
            let decimals: u8 = d.parse().map_err(|_| bad())?;
            if width == 0 || width > 40 || decimals as u16 >= width {
                return Err(bad());
            }
            Ok(Format::F { width, decimals })
        } else {
            Err(bad())
        }
    }
}

/// User-missing values: up to three discrete values and, for numeric
/// variables, an optional inclusive range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingValues {
    values: Vec<Value>,
    range: Option<(f64, f64)>,
}

impl MissingValues {
    pub const MAX_DISCRETE: usize = 3;

    pub fn new(values: Vec<Value>, range: Option<(f64, f64)>) -> Result<Self, ExecError> {
        let limit = if range.is_some() { 1 } else { Self::MAX_DISCRETE };
        if values.len() > limit {
            return Err(ExecError::Config(format!(
                "at most {limit} discrete missing values are allowed here"
            )));
        }
        if let Some((lo, hi)) = range {
            if lo > hi || values.iter().any(|v| v.as_number().is_none()) {
                return Err(ExecError::Config(
                    "a missing-value range requires numeric bounds in order".to_string(),
                ));
            }
        }
        Ok(Self { values, range })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.range.is_none()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        self.range
    }

    /// True for system-missing and for any user-missing value.
    pub fn is_missing(&self, value: &Value) -> bool {
        if value.is_sysmis() {
            return true;
        }
        if self.values.iter().any(|m| m.compare(value).is_eq()) {
            return true;
        }
        match (self.range, value.as_number()) {
            (Some((lo, hi)), Some(x)) => lo <= x && x <= hi,
            _ => false,
        }
    }

    fn resize(&mut self, width: VarWidth) {
        for v in &mut self.values {
            v.resize(width);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    name: String,
    width: VarWidth,
    print_format: Format,
    write_format: Format,
    #[serde(default)]
    missing_values: MissingValues,
    #[serde(default)]
    label: Option<String>,
}

impl Variable {
    pub fn new(name: &str, width: VarWidth) -> Result<Self, ExecError> {
        check_name(name)?;
        if let VarWidth::String(w) = width {
            if w == 0 || w > MAX_STRING_WIDTH {
                return Err(ExecError::Config(format!(
                    "string width {w} of {name} is out of range"
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            width,
            print_format: Format::default_for(width),
            write_format: Format::default_for(width),
            missing_values: MissingValues::default(),
            label: None,
        })
    }

    pub fn numeric(name: &str) -> Result<Self, ExecError> {
        Self::new(name, VarWidth::Numeric)
    }

    pub fn string(name: &str, width: u16) -> Result<Self, ExecError> {
        Self::new(name, VarWidth::String(width))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> VarWidth {
        self.width
    }

    pub fn print_format(&self) -> Format {
        self.print_format
    }

    pub fn write_format(&self) -> Format {
        self.write_format
    }

    pub fn set_formats(&mut self, format: Format) -> Result<(), ExecError> {
        if !format.var_width().same_type(&self.width) {
            return Err(ExecError::Config(format!(
                "format {format} does not fit {} variable {}",
                self.width, self.name
            )));
        }
        self.print_format = format;
        self.write_format = format;
        Ok(())
    }

    pub fn missing_values(&self) -> &MissingValues {
        &self.missing_values
    }

    pub fn set_missing_values(&mut self, missing_values: MissingValues) {
        self.missing_values = missing_values;
        self.missing_values.resize(self.width);
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    pub fn is_scratch(&self) -> bool {
        self.name.starts_with('#')
    }

    /// Widens or narrows a string variable, keeping its formats in step.
    /// Changing between numeric and string is not allowed.
    pub fn set_width(&mut self, width: VarWidth) {
        debug_assert!(self.width.same_type(&width));
        if let VarWidth::String(w) = width {
            self.print_format = Format::A { width: w };
            self.write_format = Format::A { width: w };
        }
        self.width = width;
        self.missing_values.resize(width);
    }

    fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

/// Ordered variable list. Positions are stable; names are unique without
/// regard to case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dictionary {
    variables: Vec<Variable>,
    encoding: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    documents: Vec<String>,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODING)
    }
}

impl Dictionary {
    pub fn new(encoding: &str) -> Self {
        Self {
            variables: Vec::new(),
            encoding: encoding.to_string(),
            label: None,
            documents: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn set_encoding(&mut self, encoding: &str) {
        self.encoding = encoding.to_string();
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn set_label(&mut self, label: Option<String>) {
        self.label = label;
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn add_documents(&mut self, lines: &[String]) {
        self.documents.extend_from_slice(lines);
    }

    pub fn vars(&self) -> &[Variable] {
        &self.variables
    }

    pub fn var(&self, idx: usize) -> &Variable {
        &self.variables[idx]
    }

    pub fn var_mut(&mut self, idx: usize) -> &mut Variable {
        &mut self.variables[idx]
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| names_equal(&v.name, name))
    }

    pub fn lookup_var(&self, name: &str) -> Option<&Variable> {
        self.lookup(name).map(|idx| &self.variables[idx])
    }

    pub fn add_var(&mut self, var: Variable) -> Result<usize, ExecError> {
        if self.lookup(&var.name).is_some() {
            return Err(ExecError::DuplicateVariable(var.name));
        }
        self.variables.push(var);
        Ok(self.variables.len() - 1)
    }

    pub fn widths(&self) -> Vec<VarWidth> {
        self.variables.iter().map(|v| v.width).collect()
    }

    /// A case with every value missing.
    pub fn missing_case(&self) -> Case {
        Case::from_fields(self.variables.iter().map(|v| Value::missing(v.width)).collect())
    }

    fn resolve(&self, names: &[String]) -> Result<Vec<usize>, ExecError> {
        names
            .iter()
            .map(|n| {
                self.lookup(n)
                    .ok_or_else(|| ExecError::UnknownVariable(n.clone()))
            })
            .collect()
    }

    /// Renames all `(old, new)` pairs at once, so `(A=B)(B=A)` swaps.
    pub fn rename_vars(&mut self, pairs: &[(String, String)]) -> Result<(), ExecError> {
        let olds: Vec<String> = pairs.iter().map(|(o, _)| o.clone()).collect();
        let indexes = self.resolve(&olds)?;

        let mut seen_old = HashSet::new();
        let mut seen_new = HashSet::new();
        for ((old, new), &idx) in pairs.iter().zip(&indexes) {
            check_name(new)?;
            if !seen_old.insert(idx) {
                return Err(ExecError::DuplicateVariable(old.clone()));
            }
            if !seen_new.insert(new.to_lowercase()) {
                return Err(ExecError::DuplicateVariable(new.clone()));
            }
        }
        for (old, new) in pairs {
            if let Some(existing) = self.lookup(new) {
                if !seen_old.contains(&existing) {
                    return Err(ExecError::RenameConflict {
                        from: old.clone(),
                        to: new.clone(),
                    });
                }
            }
        }

        for ((_, new), idx) in pairs.iter().zip(indexes) {
            self.variables[idx].rename(new);
        }
        Ok(())
    }

    pub fn drop_vars(&mut self, names: &[String]) -> Result<(), ExecError> {
        let doomed: HashSet<usize> = self.resolve(names)?.into_iter().collect();
        if doomed.len() == self.variables.len() {
            return Err(ExecError::DropAll);
        }
        let mut idx = 0;
        self.variables.retain(|_| {
            let keep = !doomed.contains(&idx);
            idx += 1;
            keep
        });
        Ok(())
    }

    /// Keeps only `names`, moved to the front in the order given.
    pub fn keep_vars(&mut self, names: &[String]) -> Result<(), ExecError> {
        let indexes = self.resolve(names)?;
        if indexes.is_empty() {
            return Err(ExecError::DropAll);
        }
        let mut kept = Vec::with_capacity(indexes.len());
        let mut seen = HashSet::new();
        for idx in indexes {
            if seen.insert(idx) {
                kept.push(self.variables[idx].clone());
            }
        }
        self.variables = kept;
        Ok(())
    }

    pub fn delete_scratch_vars(&mut self) {
        self.variables.retain(|v| !v.is_scratch());
    }

    /// Adds a numeric `F1.0` flag variable, as used for IN, FIRST and LAST.
    pub fn create_flag_var(
        &mut self,
        subcommand: &'static str,
        name: &str,
    ) -> Result<usize, ExecError> {
        if self.lookup(name).is_some() {
            return Err(ExecError::FlagNameCollision {
                subcommand,
                name: name.to_string(),
            });
        }
        let mut var = Variable::numeric(name)?;
        var.set_formats(Format::flag())?;
        self.add_var(var)
    }
}
