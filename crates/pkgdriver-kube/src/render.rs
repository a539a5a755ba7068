//! Chart rendering with MiniJinja
//!
//! Every file under `templates/` is loaded so partials can be included;
//! files whose name starts with `_` are not rendered on their own. The
//! rendered documents are joined into a single multi-document manifest.

use base64::Engine as _;
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use pkgdriver_core::{Chart, ReleaseInfo, Values};

use crate::error::Result;

/// Renders chart templates into a manifest
#[derive(Debug, Clone, Default)]
pub struct ChartRenderer {
    strict: bool,
}

impl ChartRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on undefined variables instead of rendering them empty
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        env.set_undefined_behavior(if self.strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });

        env.add_filter("toyaml", toyaml);
        env.add_filter("tojson", tojson);
        env.add_filter("b64encode", b64encode);
        env.add_filter("quote", quote);
        env.add_filter("nindent", nindent);
        env.add_filter("indent", indent);
        env.add_filter("required", required);
        env
    }

    /// Render `chart` for a release applying `config`
    pub fn render(&self, chart: &Chart, release: &ReleaseInfo, config: &Values) -> Result<String> {
        let mut env = self.create_environment();
        for (name, source) in &chart.templates {
            env.add_template_owned(name.clone(), source.clone())?;
        }

        let values = effective_values(chart, config);
        let ctx = minijinja::context! {
            values => values.inner(),
            release => release,
            chart => &chart.metadata,
        };

        let mut documents = Vec::new();
        for name in chart.templates.keys() {
            if is_partial(name) || !is_manifest(name) {
                continue;
            }

            let rendered = env.get_template(name)?.render(&ctx)?;
            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == "---" {
                continue;
            }

            documents.push(format!(
                "---\n# Source: {}/templates/{}\n{}\n",
                chart.name(),
                name,
                trimmed.trim_start_matches("---").trim_start()
            ));
        }

        tracing::debug!(
            chart = chart.name(),
            release = %release.name,
            documents = documents.len(),
            "rendered chart"
        );
        Ok(documents.concat())
    }
}

/// Chart defaults deep-merged with the release configuration
pub fn effective_values(chart: &Chart, config: &Values) -> Values {
    let mut values = chart.values.clone();
    values.merge(config);
    values
}

fn is_partial(name: &str) -> bool {
    name.rsplit('/').next().is_some_and(|file| file.starts_with('_'))
}

fn is_manifest(name: &str) -> bool {
    name.ends_with(".yaml") || name.ends_with(".yml") || name.ends_with(".json")
}

fn toyaml(value: Value) -> std::result::Result<String, Error> {
    let json: serde_json::Value = serde_json::to_value(&value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    let yaml = serde_yaml::to_string(&json)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(yaml.trim_start_matches("---\n").trim_end().to_string())
}

fn tojson(value: Value) -> std::result::Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn b64encode(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn quote(value: Value) -> String {
    let s = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn indent(value: String, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    value
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn nindent(value: String, spaces: usize) -> String {
    format!("\n{}", indent(value, spaces))
}

fn required(value: Value, message: Option<String>) -> std::result::Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);
    if missing {
        let msg = message.unwrap_or_else(|| "required value is missing".to_string());
        return Err(Error::new(ErrorKind::InvalidOperation, msg));
    }
    Ok(value)
}
