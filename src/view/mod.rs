//! HTML view engine
//!
//! Templates are compiled into the binary with `rust-embed` and rendered
//! with Tera. Two helpers are registered on top of Tera's builtins:
//! - `t(key, lang)` looks a message up in the interface catalog
//! - `markdown_excerpt(length)` turns story markdown into a plain excerpt

use rust_embed::RustEmbed;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, RwLock};
use tera::{Context as TeraContext, Tera, Value};

use crate::services::markdown::MarkdownRenderer;

mod error;

pub use error::ViewError;

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
struct Templates;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct StaticAssets;

const DEFAULT_EXCERPT_LENGTH: usize = 200;

type Catalogs = Arc<RwLock<HashMap<String, Arc<HashMap<String, String>>>>>;

/// Tera `t` function, reads the catalogs handed to the engine
struct Translate {
    catalogs: Catalogs,
}

impl tera::Function for Translate {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let key = args
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("t() requires a `key` argument"))?;
        let language = args.get("lang").and_then(Value::as_str).unwrap_or_default();

        let catalogs = self
            .catalogs
            .read()
            .map_err(|_| tera::Error::msg("translation catalogs are poisoned"))?;
        let value = catalogs
            .get(language)
            .and_then(|catalog| catalog.get(key))
            .cloned()
            .unwrap_or_else(|| key.to_string());
        Ok(Value::String(value))
    }

    fn is_safe(&self) -> bool {
        false
    }
}

pub struct ViewEngine {
    tera: Tera,
    catalogs: Catalogs,
}

impl ViewEngine {
    /// Load every embedded template
    pub fn new() -> Result<Self, ViewError> {
        let mut templates = Vec::new();
        for name in Templates::iter() {
            let Some(file) = Templates::get(&name) else {
                continue;
            };
            let source = String::from_utf8(file.data.into_owned()).map_err(|e| ViewError::InvalidTemplate {
                name: name.to_string(),
                message: e.to_string(),
            })?;
            templates.push((name.to_string(), source));
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(templates)
            .map_err(|e| ViewError::InvalidTemplate {
                name: "templates".into(),
                message: error_chain(&e),
            })?;

        let catalogs: Catalogs = Arc::new(RwLock::new(HashMap::new()));
        tera.register_function(
            "t",
            Translate {
                catalogs: catalogs.clone(),
            },
        );
        let markdown = MarkdownRenderer::new();
        tera.register_filter(
            "markdown_excerpt",
            move |value: &Value, args: &HashMap<String, Value>| -> tera::Result<Value> {
                let text = value
                    .as_str()
                    .ok_or_else(|| tera::Error::msg("markdown_excerpt expects a string"))?;
                let length = args
                    .get("length")
                    .and_then(Value::as_u64)
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_EXCERPT_LENGTH);
                Ok(Value::String(markdown.excerpt(text, length)))
            },
        );

        tracing::debug!("Loaded {} templates", tera.get_template_names().count());
        Ok(Self { tera, catalogs })
    }

    /// Make `catalog` available to `t(lang=language)`
    pub fn set_catalog(&self, language: &str, catalog: Arc<HashMap<String, String>>) {
        match self.catalogs.write() {
            Ok(mut catalogs) => {
                let stale = catalogs
                    .get(language)
                    .map_or(true, |current| !Arc::ptr_eq(current, &catalog));
                if stale {
                    catalogs.insert(language.to_string(), catalog);
                }
            }
            Err(_) => tracing::error!("Translation catalogs lock is poisoned"),
        }
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|t| t == name)
    }

    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String, ViewError> {
        self.tera
            .render(template, context)
            .map_err(|e| ViewError::TemplateError(format!("Failed to render '{}': {}", template, error_chain(&e))))
    }

    /// Render `template`, then `error.html`, then a bare error page
    pub fn render_with_fallback(&self, template: &str, context: &TeraContext) -> String {
        match self.render(template, context) {
            Ok(html) => html,
            Err(e) => {
                tracing::error!("{}", e);
                let mut error_context = context.clone();
                error_context.insert("status", &500);
                error_context.insert("error_message", "Something went wrong while showing this page.");
                match self.render("error.html", &error_context) {
                    Ok(html) => html,
                    Err(error_template_err) => {
                        tracing::error!("Error template failed too: {}", error_template_err);
                        simple_error_page(template)
                    }
                }
            }
        }
    }
}

fn error_chain(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        message.push_str(&format!("\n  Caused by: {}", s));
        source = s.source();
    }
    message
}

fn simple_error_page(template: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Error</title>
</head>
<body>
    <h1>Something went wrong</h1>
    <p>The page <code>{}</code> could not be shown.</p>
</body>
</html>"#,
        tera::escape_html(template)
    )
}
