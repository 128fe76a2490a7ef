use std::cmp::Ordering;

use crate::case::{Case, Value};
use crate::dictionary::{Dictionary, VarWidth};
use crate::error::ExecError;
use crate::ColumnId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Parses the `A`/`D` suffix used in BY lists.
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A" | "UP" => Some(SortDirection::Ascending),
            "D" | "DOWN" => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub column: ColumnId,
    pub width: VarWidth,
    pub direction: SortDirection,
}

/// An ordered list of (variable, direction) pairs, compared
/// lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortKey {
    fields: Vec<SortField>,
}

impl SortKey {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Resolves `(name, direction)` pairs against `dict`.
    pub fn from_names<S: AsRef<str>>(
        dict: &Dictionary,
        names: &[(S, SortDirection)],
    ) -> Result<Self, ExecError> {
        let mut fields = Vec::with_capacity(names.len());
        for (name, direction) in names {
            let name = name.as_ref();
            let column = dict
                .lookup(name)
                .ok_or_else(|| ExecError::UnknownVariable(name.to_string()))?;
            if fields.iter().any(|f: &SortField| f.column == column) {
                return Err(ExecError::Config(format!(
                    "variable {name} appears more than once in the sort key"
                )));
            }
            fields.push(SortField {
                column,
                width: dict.var(column).width(),
                direction: *direction,
            });
        }
        Ok(Self { fields })
    }

    /// True if `case` has every key column, holding a value of the
    /// column's type.
    pub fn fits(&self, case: &Case) -> bool {
        self.fields.iter().all(|f| {
            f.column < case.len()
                && matches!(
                    (case.get(f.column), f.width),
                    (Value::Number(_), VarWidth::Numeric) | (Value::String(_), VarWidth::String(_))
                )
        })
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn compare(&self, a: &Case, b: &Case) -> Ordering {
        for field in &self.fields {
            let ord = a.get(field.column).compare(b.get(field.column));
            let ord = match field.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// The key values of `case`, in key order.
    pub fn extract(&self, case: &Case) -> Vec<Value> {
        self.fields
            .iter()
            .map(|f| case.get(f.column).clone())
            .collect()
    }

    /// Compares a case against previously extracted key values.
    pub fn compare_extracted(&self, case: &Case, by: &[Value]) -> Ordering {
        for (field, value) in self.fields.iter().zip(by) {
            let ord = case.get(field.column).compare(value);
            let ord = match field.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub fn equal_extracted(&self, case: &Case, by: &[Value]) -> bool {
        self.compare_extracted(case, by).is_eq()
    }

    /// Compares two extracted key value lists.
    pub fn compare_values(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((field, a), b) in self.fields.iter().zip(a).zip(b) {
            let ord = a.compare(b);
            let ord = match field.direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord.is_ne() {
                return ord;
            }
        }
        Ordering::Equal
    }

    pub(crate) fn normalized_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| match f.width {
                VarWidth::Numeric => 9,
                VarWidth::String(w) => w as usize,
            })
            .sum()
    }

    // Numbers: one tag byte (0 present, 1 system-missing) and eight bytes of
    // sign-adjusted IEEE bits. Strings: the value padded to the field width.
    // Descending fields have every byte inverted.
    pub(crate) fn normalize_into(&self, case: &Case, out: &mut Vec<u8>) {
        for field in &self.fields {
            let start = out.len();
            match case.get(field.column) {
                Value::Number(Some(x)) => {
                    out.push(0);
                    out.extend_from_slice(&order_preserving_bits(*x).to_be_bytes());
                }
                Value::Number(None) => {
                    out.push(1);
                    out.extend_from_slice(&[0; 8]);
                }
                Value::String(s) => {
                    let w = match field.width {
                        VarWidth::String(w) => w as usize,
                        VarWidth::Numeric => s.len(),
                    };
                    let n = s.len().min(w);
                    out.extend_from_slice(&s[..n]);
                    out.resize(start + w, b' ');
                }
            }
            if field.direction == SortDirection::Descending {
                for b in &mut out[start..] {
                    *b = !*b;
                }
            }
        }
    }
}

fn order_preserving_bits(x: f64) -> u64 {
    // -0.0 and 0.0 compare equal, so they must encode identically.
    let x = if x == 0.0 { 0.0 } else { x };
    let bits = x.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}
