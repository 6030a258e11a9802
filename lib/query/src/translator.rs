//! Natural-language translation seam
//!
//! A translator turns free text into values for declared parameters. It may
//! omit parameters it cannot extract; the compiler decides what to keep.

use crate::params::Params;
use crate::template::ParamSpec;
use async_trait::async_trait;
use staysearch_core::Result;
use std::sync::Arc;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, params: &[ParamSpec]) -> Result<Params>;
}

#[async_trait]
impl<T: Translator + ?Sized> Translator for Arc<T> {
    async fn translate(&self, text: &str, params: &[ParamSpec]) -> Result<Params> {
        (**self).translate(text, params).await
    }
}

/// Render the parameter list the way it is shown to a language model
pub fn describe_params(params: &[ParamSpec]) -> String {
    let mut out = String::new();
    for spec in params {
        out.push_str(&format!("- {} ({})", spec.name, kind_label(spec)));
        if let Some(description) = &spec.description {
            out.push_str(": ");
            out.push_str(description);
        }
        if !spec.options.is_empty() {
            out.push_str(&format!(" One of: {}.", spec.options.join(", ")));
        }
        out.push('\n');
    }
    out
}

fn kind_label(spec: &ParamSpec) -> &'static str {
    match spec.kind {
        crate::template::ParamKind::Text => "string",
        crate::template::ParamKind::Number => "number",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParamKind;

    #[test]
    fn test_describe_params() {
        let specs = vec![
            ParamSpec {
                name: "price_smaller_than".to_string(),
                kind: ParamKind::Number,
                description: Some("Maximum nightly price.".to_string()),
                options: Vec::new(),
            },
            ParamSpec {
                name: "filter_by_type".to_string(),
                kind: ParamKind::Text,
                description: None,
                options: vec!["Private room".to_string(), "Shared room".to_string()],
            },
        ];
        let text = describe_params(&specs);
        assert!(text.contains("- price_smaller_than (number): Maximum nightly price."));
        assert!(text.contains("- filter_by_type (string) One of: Private room, Shared room."));
    }
}
