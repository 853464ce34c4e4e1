//! Narrow rendering capability handlers can plug any engine into.

use crate::error::{ServerError, ServerResult};
use serde_json::Value;
use std::path::Path;

pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, model: &Value) -> ServerResult<String>;

    /// Loads a UTF-8 template from disk and renders it.
    fn render_file(&self, path: &Path, model: &Value) -> ServerResult<String> {
        let template = std::fs::read_to_string(path).map_err(|err| {
            ServerError::Template(format!("cannot read template {}: {err}", path.display()))
        })?;
        self.render(&template, model)
    }
}

/// Replaces `{{key}}` with the top-level field `key` of an object model.
///
/// Placeholders without a matching field are left untouched. Strings are
/// inserted verbatim and every other value in its JSON form.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTemplateEngine;

impl TemplateEngine for SimpleTemplateEngine {
    fn render(&self, template: &str, model: &Value) -> ServerResult<String> {
        let fields = match model {
            Value::Object(fields) => fields,
            Value::Null => return Ok(template.to_string()),
            other => {
                return Err(ServerError::Template(format!(
                    "model must be a JSON object, got {other}"
                )))
            }
        };

        let mut out = template.to_string();
        for (key, value) in fields {
            let placeholder = format!("{{{{{key}}}}}");
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &replacement);
        }
        Ok(out)
    }
}
