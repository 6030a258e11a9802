//! Named query templates
//!
//! A template declares which request parameters feed which space weights,
//! similarity clauses and filters. Templates are plain data built once at
//! startup and checked against the index before they serve requests.

use serde::Serialize;
use staysearch_core::{AttributeKind, CompositeIndex, Comparator, Error, Result, Space};
use std::collections::BTreeMap;

pub const LIMIT_PARAM: &str = "limit";

/// Type of value a parameter carries
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Number,
}

/// Description of one parameter as offered to the translator
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeightParam {
    pub space: String,
    pub param: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClauseParam {
    pub space: String,
    pub value_param: String,
    pub weight_param: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterParam {
    pub attribute: String,
    pub comparator: Comparator,
    pub param: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryTemplate {
    pub name: String,
    pub weights: Vec<WeightParam>,
    pub clauses: Vec<ClauseParam>,
    pub filters: Vec<FilterParam>,
    pub natural_query: Option<String>,
    pub limit: usize,
    pub descriptions: BTreeMap<String, String>,
}

impl QueryTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weights: Vec::new(),
            clauses: Vec::new(),
            filters: Vec::new(),
            natural_query: None,
            limit: staysearch_core::DEFAULT_LIMIT,
            descriptions: BTreeMap::new(),
        }
    }

    /// Copy of this template under another name, for layering variants
    pub fn derive(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn weight(mut self, space: impl Into<String>, param: impl Into<String>) -> Self {
        self.weights.push(WeightParam {
            space: space.into(),
            param: param.into(),
        });
        self
    }

    #[must_use]
    pub fn similar(
        mut self,
        space: impl Into<String>,
        value_param: impl Into<String>,
        weight_param: Option<&str>,
    ) -> Self {
        self.clauses.push(ClauseParam {
            space: space.into(),
            value_param: value_param.into(),
            weight_param: weight_param.map(str::to_string),
        });
        self
    }

    /// Add a filter; an existing filter bound to the same parameter is replaced
    #[must_use]
    pub fn filter(
        mut self,
        attribute: impl Into<String>,
        comparator: Comparator,
        param: impl Into<String>,
    ) -> Self {
        let param = param.into();
        self.filters.retain(|f| f.param != param);
        self.filters.push(FilterParam {
            attribute: attribute.into(),
            comparator,
            param,
            options: Vec::new(),
        });
        self
    }

    /// Restrict the most recently added filter to a closed set of values
    #[must_use]
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Some(last) = self.filters.last_mut() {
            last.options = options.into_iter().map(Into::into).collect();
        }
        self
    }

    #[must_use]
    pub fn natural_query(mut self, param: impl Into<String>) -> Self {
        self.natural_query = Some(param.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn describe(mut self, param: impl Into<String>, description: impl Into<String>) -> Self {
        self.descriptions.insert(param.into(), description.into());
        self
    }

    /// Whether `param` sets a space weight or a clause weight
    pub fn is_weight_param(&self, param: &str) -> bool {
        self.weights.iter().any(|w| w.param == param)
            || self
                .clauses
                .iter()
                .any(|c| c.weight_param.as_deref() == Some(param))
    }

    /// Every parameter this template reads, including `limit`
    pub fn param_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        names.extend(self.weights.iter().map(|w| w.param.as_str()));
        for clause in &self.clauses {
            names.push(&clause.value_param);
            if let Some(weight) = &clause.weight_param {
                names.push(weight);
            }
        }
        names.extend(self.filters.iter().map(|f| f.param.as_str()));
        if let Some(nq) = &self.natural_query {
            names.push(nq);
        }
        names.push(LIMIT_PARAM);
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn declares(&self, param: &str) -> bool {
        self.param_names().contains(&param)
    }

    /// Parameters a translator may fill from natural language
    pub fn translatable_params(&self, index: &CompositeIndex) -> Vec<ParamSpec> {
        let mut specs: Vec<ParamSpec> = Vec::new();
        let mut push = |name: &str, kind: ParamKind, options: &[String]| {
            if specs.iter().any(|s| s.name == name) {
                return;
            }
            specs.push(ParamSpec {
                name: name.to_string(),
                kind,
                description: self.descriptions.get(name).cloned(),
                options: options.to_vec(),
            });
        };

        for weight in &self.weights {
            push(&weight.param, ParamKind::Number, &[]);
        }
        for clause in &self.clauses {
            let kind = match index.space(&clause.space) {
                Some(Space::Number(_)) => ParamKind::Number,
                _ => ParamKind::Text,
            };
            push(&clause.value_param, kind, &[]);
            if let Some(weight) = &clause.weight_param {
                push(weight, ParamKind::Number, &[]);
            }
        }
        for filter in &self.filters {
            push(&filter.param, self.filter_kind(filter, index), &filter.options);
        }
        specs
    }

    /// Number filters take numeric thresholds; everything else, including
    /// timestamps given as dates, is passed as text
    pub(crate) fn filter_kind(&self, filter: &FilterParam, index: &CompositeIndex) -> ParamKind {
        match index.schema().kind_of(&filter.attribute) {
            Some(AttributeKind::Number) => ParamKind::Number,
            _ => ParamKind::Text,
        }
    }

    /// Check every referenced space and attribute against the index
    pub fn validate(&self, index: &CompositeIndex) -> Result<()> {
        for weight in &self.weights {
            if index.space(&weight.space).is_none() {
                return Err(Error::SchemaMismatch(format!(
                    "query '{}' weights unknown space '{}'",
                    self.name, weight.space
                )));
            }
        }
        for clause in &self.clauses {
            if index.space(&clause.space).is_none() {
                return Err(Error::SchemaMismatch(format!(
                    "query '{}' has a similarity clause on unknown space '{}'",
                    self.name, clause.space
                )));
            }
        }
        for filter in &self.filters {
            let kind = index.schema().kind_of(&filter.attribute).ok_or_else(|| {
                Error::InvalidFilter(format!(
                    "query '{}' filters unknown attribute '{}'",
                    self.name, filter.attribute
                ))
            })?;
            if filter.comparator.is_ordering()
                && !matches!(kind, AttributeKind::Number | AttributeKind::Timestamp)
            {
                return Err(Error::InvalidFilter(format!(
                    "query '{}' range-compares {} attribute '{}'",
                    self.name,
                    kind.as_str(),
                    filter.attribute
                )));
            }
        }
        if self.limit == 0 {
            return Err(Error::InvalidConfig(format!(
                "query '{}' has a zero default limit",
                self.name
            )));
        }
        Ok(())
    }
}
