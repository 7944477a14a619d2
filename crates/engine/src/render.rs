//! Email template rendering.
//!
//! A template is a named triple of Handlebars sources: subject, HTML body and
//! an optional plain-text body. On disk they live side by side as
//! `<name>.subject.hbs`, `<name>.html.hbs` and `<name>.txt.hbs`.

use std::collections::BTreeSet;
use std::path::Path;

use handlebars::Handlebars;
use thiserror::Error;

/// Rendered email content.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("Template error in '{name}': {message}")]
    Template { name: String, message: String },

    #[error("Failed to load templates: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a template name and its variables into email content.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, vars: &serde_json::Value) -> Result<RenderedEmail, RenderError>;
}

const SUBJECT_SUFFIX: &str = ".subject.hbs";
const HTML_SUFFIX: &str = ".html.hbs";
const TEXT_SUFFIX: &str = ".txt.hbs";

/// Templates compiled into the binary, overridable from a directory.
const BUILTIN: &[(&str, &str, &str, &str)] = &[
    (
        "welcome",
        include_str!("../../../templates/welcome.subject.hbs"),
        include_str!("../../../templates/welcome.html.hbs"),
        include_str!("../../../templates/welcome.txt.hbs"),
    ),
    (
        "low_credit",
        include_str!("../../../templates/low_credit.subject.hbs"),
        include_str!("../../../templates/low_credit.html.hbs"),
        include_str!("../../../templates/low_credit.txt.hbs"),
    ),
    (
        "payment_failed",
        include_str!("../../../templates/payment_failed.subject.hbs"),
        include_str!("../../../templates/payment_failed.html.hbs"),
        include_str!("../../../templates/payment_failed.txt.hbs"),
    ),
    (
        "topup_receipt",
        include_str!("../../../templates/topup_receipt.subject.hbs"),
        include_str!("../../../templates/topup_receipt.html.hbs"),
        include_str!("../../../templates/topup_receipt.txt.hbs"),
    ),
];

/// Handlebars-backed renderer.
///
/// HTML bodies are escaped; subjects and text bodies are not.
pub struct HandlebarsRenderer {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
    names: BTreeSet<String>,
}

impl HandlebarsRenderer {
    /// An empty renderer.
    pub fn new() -> Self {
        let mut plain = Handlebars::new();
        plain.register_escape_fn(handlebars::no_escape);

        Self {
            html: Handlebars::new(),
            plain,
            names: BTreeSet::new(),
        }
    }

    /// A renderer with the built-in notification templates registered.
    pub fn builtin() -> Result<Self, RenderError> {
        let mut renderer = Self::new();
        for (name, subject, html, text) in BUILTIN {
            renderer.register(name, subject, html, Some(text))?;
        }
        Ok(renderer)
    }

    /// Built-in templates, overridden by whatever `dir` contains.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, RenderError> {
        let mut renderer = Self::builtin()?;
        renderer.load_dir(dir)?;
        Ok(renderer)
    }

    pub fn register(
        &mut self,
        name: &str,
        subject: &str,
        html: &str,
        text: Option<&str>,
    ) -> Result<(), RenderError> {
        let compile_error = |e: handlebars::TemplateError| RenderError::Template {
            name: name.to_string(),
            message: e.to_string(),
        };

        self.plain
            .register_template_string(&subject_key(name), subject)
            .map_err(compile_error)?;
        self.html
            .register_template_string(name, html)
            .map_err(compile_error)?;
        match text {
            Some(text) => self
                .plain
                .register_template_string(&text_key(name), text)
                .map_err(compile_error)?,
            None => {
                self.plain.unregister_template(&text_key(name));
            }
        }

        self.names.insert(name.to_string());
        Ok(())
    }

    /// Register every complete template found in `dir`. A template needs at
    /// least a subject and an HTML body; the text body is optional.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize, RenderError> {
        let dir = dir.as_ref();
        let mut loaded = 0;

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(HTML_SUFFIX) else {
                continue;
            };

            let subject_path = dir.join(format!("{}{}", name, SUBJECT_SUFFIX));
            if !subject_path.exists() {
                tracing::warn!(template = name, "Template has no subject file, skipping");
                continue;
            }

            let html = std::fs::read_to_string(&path)?;
            let subject = std::fs::read_to_string(&subject_path)?;
            let text_path = dir.join(format!("{}{}", name, TEXT_SUFFIX));
            let text = if text_path.exists() {
                Some(std::fs::read_to_string(&text_path)?)
            } else {
                None
            };

            self.register(name, &subject, &html, text.as_deref())?;
            loaded += 1;
        }

        tracing::info!(dir = %dir.display(), loaded, "Email templates loaded");
        Ok(loaded)
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, vars: &serde_json::Value) -> Result<RenderedEmail, RenderError> {
        if !self.names.contains(template) {
            return Err(RenderError::UnknownTemplate(template.to_string()));
        }

        let render_error = |e: handlebars::RenderError| RenderError::Template {
            name: template.to_string(),
            message: e.to_string(),
        };

        let subject = self
            .plain
            .render(&subject_key(template), vars)
            .map_err(render_error)?;
        let html = self.html.render(template, vars).map_err(render_error)?;
        let text = if self.plain.has_template(&text_key(template)) {
            Some(
                self.plain
                    .render(&text_key(template), vars)
                    .map_err(render_error)?,
            )
        } else {
            None
        };

        Ok(RenderedEmail {
            subject: subject.trim().to_string(),
            html,
            text,
        })
    }
}

fn subject_key(name: &str) -> String {
    format!("{}::subject", name)
}

fn text_key(name: &str) -> String {
    format!("{}::text", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_registered_template() {
        let mut renderer = HandlebarsRenderer::new();
        renderer
            .register(
                "hello",
                "Hi {{name}}\n",
                "<p>Hi {{name}}</p>",
                Some("Hi {{name}}"),
            )
            .unwrap();

        let rendered = renderer.render("hello", &json!({ "name": "Ada & Co" })).unwrap();
        assert_eq!(rendered.subject, "Hi Ada & Co");
        assert_eq!(rendered.html, "<p>Hi Ada &amp; Co</p>");
        assert_eq!(rendered.text.as_deref(), Some("Hi Ada & Co"));
    }

    #[test]
    fn test_unknown_template() {
        let renderer = HandlebarsRenderer::new();
        assert!(matches!(
            renderer.render("missing", &json!({})),
            Err(RenderError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_invalid_template_source_rejected() {
        let mut renderer = HandlebarsRenderer::new();
        let result = renderer.register("broken", "ok", "{{#if ready}}unclosed", None);
        assert!(matches!(result, Err(RenderError::Template { .. })));
    }

    #[test]
    fn test_builtin_templates_render() {
        let renderer = HandlebarsRenderer::builtin().unwrap();
        let names: Vec<&str> = renderer.template_names().collect();
        assert_eq!(names, vec!["low_credit", "payment_failed", "topup_receipt", "welcome"]);

        let vars = json!({
            "language": "en",
            "balance": 3,
            "amount": "10.00",
            "currency": "EUR",
            "credits": 100,
            "stripe_object_id": "pi_1",
            "unsubscribe_url": "https://studio.example/api/unsubscribe?token=t"
        });
        for name in names {
            let rendered = renderer.render(name, &vars).unwrap();
            assert!(!rendered.subject.is_empty(), "{} has empty subject", name);
            assert!(rendered.text.is_some(), "{} has no text body", name);
        }
    }

    #[test]
    fn test_load_dir_overrides_and_skips_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("welcome.subject.hbs"), "Custom welcome").unwrap();
        std::fs::write(dir.path().join("welcome.html.hbs"), "<h1>Custom</h1>").unwrap();
        std::fs::write(dir.path().join("promo.html.hbs"), "<p>No subject</p>").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let renderer = HandlebarsRenderer::from_dir(dir.path()).unwrap();
        let rendered = renderer.render("welcome", &json!({})).unwrap();
        assert_eq!(rendered.subject, "Custom welcome");
        assert_eq!(rendered.html, "<h1>Custom</h1>");
        assert_eq!(rendered.text, None);
        assert!(renderer.render("promo", &json!({})).is_err());
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            HandlebarsRenderer::from_dir(&missing),
            Err(RenderError::Io(_))
        ));
    }
}
