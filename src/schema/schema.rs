//! Schema: the ordered set of fields known to an index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::schema::field::FieldConfig;

/// Ordered mapping from field name to [`FieldConfig`].
///
/// A schema is immutable once published in a generation; writers work on a
/// copy and readers hold `Arc<Schema>` snapshots.
///
/// Every added field gets a fresh epoch. Segments record the epochs they
/// were written under, so data of a removed field stays hidden even after
/// a field of the same name is added again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: HashMap<String, FieldConfig>,
    field_names: Vec<String>,
    #[serde(default)]
    epochs: HashMap<String, u64>,
    #[serde(default)]
    next_epoch: u64,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Schema::add_field`].
    pub fn with_field(mut self, name: &str, config: FieldConfig) -> Result<Self> {
        self.add_field(name, config)?;
        Ok(self)
    }

    /// Add a field. Names must be non-empty, unique and free of NUL bytes,
    /// since NUL separates field and term in dictionary keys.
    pub fn add_field(&mut self, name: &str, config: FieldConfig) -> Result<()> {
        validate_field_name(name)?;
        if self.fields.contains_key(name) {
            return Err(StrataError::schema(format!("Field '{name}' already exists")));
        }
        self.fields.insert(name.to_string(), config);
        self.field_names.push(name.to_string());
        self.epochs.insert(name.to_string(), self.next_epoch);
        self.next_epoch += 1;
        Ok(())
    }

    pub fn remove_field(&mut self, name: &str) -> Result<FieldConfig> {
        let config = self
            .fields
            .remove(name)
            .ok_or_else(|| StrataError::schema(format!("Unknown field '{name}'")))?;
        self.field_names.retain(|n| n != name);
        self.epochs.remove(name);
        Ok(config)
    }

    /// Epoch the field was added under.
    pub fn epoch(&self, name: &str) -> Option<u64> {
        self.epochs.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&FieldConfig> {
        self.fields.get(name)
    }

    /// Like [`Schema::get`], but an unknown field is a schema error.
    pub fn field(&self, name: &str) -> Result<&FieldConfig> {
        self.get(name)
            .ok_or_else(|| StrataError::schema(format!("Unknown field '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in definition order.
    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    /// Fields in definition order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldConfig)> {
        self.field_names
            .iter()
            .filter_map(|name| self.fields.get(name).map(|config| (name.as_str(), config)))
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.fields()
            .filter(|(_, config)| config.unique)
            .map(|(name, _)| name)
    }

    pub fn len(&self) -> usize {
        self.field_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field_names.is_empty()
    }
}

fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StrataError::schema("Field name cannot be empty"));
    }
    if name.as_bytes().contains(&0) {
        return Err(StrataError::schema(format!(
            "Field name {name:?} contains a NUL byte"
        )));
    }
    Ok(())
}
