//! Record schema definitions
//!
//! A schema names the attributes a record carries and the kind of each.
//! Spaces and filters are validated against it before any record is touched.

use serde::{Deserialize, Serialize};

/// Kind of a record attribute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// Free text, compared through embeddings or substring filters
    Text,
    /// Floating point number; integers and flags are stored as numbers too
    Number,
    /// Value from a closed set of labels
    Category,
    /// Point in time (UTC)
    Timestamp,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Text => "text",
            AttributeKind::Number => "number",
            AttributeKind::Category => "category",
            AttributeKind::Timestamp => "timestamp",
        }
    }
}

/// A single attribute declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: AttributeKind,
}

/// Ordered attribute declarations plus the id attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub name: String,
    pub id_field: String,
    pub fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: "id".to_string(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Declare an attribute; redeclaring a name replaces its kind
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        let name = name.into();
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == name) {
            existing.kind = kind;
        } else {
            self.fields.push(FieldDef { name, kind });
        }
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<AttributeKind> {
        self.field(name).map(|f| f.kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}
