//! Template rendering and conditional evaluation.
//!
//! The engine treats templating as a black box behind the [`Templar`] trait.
//! [`JinjaTemplar`] implements it with `minijinja`, configured for
//! Jinja2/Ansible compatibility.

use std::fmt;

use indexmap::IndexMap;
use minijinja::{Environment, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Variables handed to the template engine
pub type Vars = IndexMap<String, JsonValue>;

static BARE_EXPRESSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\{\{\s*((?s:.)*?)\s*\}\}\s*$").expect("Invalid bare expression regex")
});

/// Renders strings and evaluates conditionals against a variable mapping
pub trait Templar: Send + Sync + fmt::Debug {
    /// Render a template string
    fn render(&self, template: &str, vars: &Vars) -> Result<String>;

    /// Evaluate a bare conditional expression (`when:` style); empty is true
    fn evaluate_conditional(&self, conditional: &str, vars: &Vars) -> Result<bool>;

    /// Render every string inside a structured value.
    ///
    /// A string that is exactly one `{{ expr }}` keeps the native type of
    /// the expression result.
    fn render_value(&self, value: &JsonValue, vars: &Vars) -> Result<JsonValue>;

    /// Whether a string contains template markup
    fn is_template(&self, s: &str) -> bool {
        s.contains("{{") || s.contains("{%") || s.contains("{#")
    }

    /// Evaluate every conditional; all must hold
    fn evaluate_all(&self, conditionals: &[String], vars: &Vars) -> Result<bool> {
        for conditional in conditionals {
            if !self.evaluate_conditional(conditional, vars)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `minijinja` backed [`Templar`]
pub struct JinjaTemplar {
    env: Environment<'static>,
}

impl fmt::Debug for JinjaTemplar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JinjaTemplar").finish_non_exhaustive()
    }
}

impl Default for JinjaTemplar {
    fn default() -> Self {
        Self::new()
    }
}

impl JinjaTemplar {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        env.add_filter("bool", |value: Value| -> bool {
            match value.as_str() {
                Some(s) => matches!(s.trim().to_lowercase().as_str(), "yes" | "true" | "1" | "on"),
                None => value.is_true(),
            }
        });
        env.add_filter("mandatory", |value: Value| -> std::result::Result<Value, minijinja::Error> {
            if value.is_undefined() {
                Err(minijinja::Error::new(
                    minijinja::ErrorKind::UndefinedError,
                    "mandatory variable is not defined",
                ))
            } else {
                Ok(value)
            }
        });

        Self { env }
    }

    fn eval_expression(&self, expr: &str, vars: &Vars) -> Result<Value> {
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| Error::template(expr, e.to_string()))?;
        compiled
            .eval(vars)
            .map_err(|e| Error::template(expr, e.to_string()))
    }
}

impl Templar for JinjaTemplar {
    fn render(&self, template: &str, vars: &Vars) -> Result<String> {
        if !self.is_template(template) {
            return Ok(template.to_string());
        }
        self.env
            .render_str(template, vars)
            .map_err(|e| Error::template(template, e.to_string()))
    }

    fn evaluate_conditional(&self, conditional: &str, vars: &Vars) -> Result<bool> {
        let conditional = conditional.trim();
        if conditional.is_empty() {
            return Ok(true);
        }
        if self.is_template(conditional) {
            let rendered = self.render(conditional, vars)?;
            return Ok(matches!(
                rendered.trim().to_lowercase().as_str(),
                "true" | "yes" | "1" | "on"
            ));
        }
        Ok(self.eval_expression(conditional, vars)?.is_true())
    }

    fn render_value(&self, value: &JsonValue, vars: &Vars) -> Result<JsonValue> {
        match value {
            JsonValue::String(s) if self.is_template(s) => {
                if let Some(caps) = BARE_EXPRESSION.captures(s) {
                    let inner = &caps[1];
                    if !inner.contains("{{") && !inner.contains("}}") {
                        let result = self.eval_expression(inner, vars)?;
                        if result.is_undefined() {
                            return Err(Error::template(s.as_str(), format!("'{inner}' is undefined")));
                        }
                        return serde_json::to_value(&result)
                            .map_err(|e| Error::template(s.as_str(), e.to_string()));
                    }
                }
                Ok(JsonValue::String(self.render(s, vars)?))
            }
            JsonValue::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, vars))
                .collect::<Result<Vec<_>>>()
                .map(JsonValue::Array),
            JsonValue::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    rendered.insert(self.render(k, vars)?, self.render_value(v, vars)?);
                }
                Ok(JsonValue::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }
}
