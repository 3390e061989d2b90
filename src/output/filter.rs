use log::warn;

use crate::probe::fields::{self, FieldDesc, FieldValue};
use crate::probe::result::ProbeResult;

/// Reduces a result to the fields the user asked for.
#[derive(Clone)]
pub struct MetricFilter {
    fields: Vec<&'static FieldDesc>,
}

impl MetricFilter {
    /// Splits a `"Rtt;SndCwnd"` style list into names.
    pub fn split(raw: &str) -> Vec<String> {
        raw.split(';')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// An empty `names` selects every exportable field. Unknown names are
    /// dropped with a warning.
    pub fn new(names: &[String]) -> Self {
        if names.is_empty() {
            return MetricFilter {
                fields: fields::exportable().collect(),
            };
        }

        let mut selected: Vec<&'static FieldDesc> = Vec::with_capacity(names.len());
        for name in names {
            match fields::find(name) {
                Some(field) if !selected.iter().any(|f| f.name == field.name) => selected.push(field),
                Some(_) => {}
                None => warn!("Ignoring unknown field {name:?} in filter"),
            }
        }
        // Table order, regardless of the order they were asked for in.
        selected.sort_by_key(|f| fields::FIELDS.iter().position(|t| t.name == f.name));

        MetricFilter { fields: selected }
    }

    pub fn fields(&self) -> &[&'static FieldDesc] {
        &self.fields
    }

    pub fn apply(&self, result: &ProbeResult) -> Vec<(&'static str, FieldValue)> {
        self.fields
            .iter()
            .map(|field| (field.name, (field.get)(result)))
            .collect()
    }
}
