//! Email template rendering with Tera (`{{ variable }}` syntax)
//!
//! Autoescaping is off: templates produce plain-text mail, not HTML pages.

use serde::Serialize;
use std::error::Error as StdError;
use tera::{Context, Tera};
use thiserror::Error;

use crate::db::email_templates::EmailTemplate;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Invalid template syntax in {part}: {message}")]
    Syntax { part: &'static str, message: String },

    #[error("Template variables must be a JSON object")]
    Variables,

    #[error("Failed to render {part}: {message}")]
    Render { part: &'static str, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Tera's top-level messages are generic; the cause chain says what went wrong
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn engine(subject: &str, body: &str) -> Result<Tera, TemplateError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_template("subject", subject)
        .map_err(|e| TemplateError::Syntax {
            part: "subject",
            message: describe(&e),
        })?;
    tera.add_raw_template("body", body)
        .map_err(|e| TemplateError::Syntax {
            part: "body",
            message: describe(&e),
        })?;
    Ok(tera)
}

/// Parse subject and body without rendering
pub fn check_syntax(subject: &str, body: &str) -> Result<(), TemplateError> {
    engine(subject, body).map(|_| ())
}

/// Render a stored template with caller-supplied variables
///
/// Undefined variables are an error rather than an empty string.
pub fn render(
    template: &EmailTemplate,
    variables: &serde_json::Value,
) -> Result<RenderedEmail, TemplateError> {
    let tera = engine(&template.subject, &template.body)?;
    let context = match variables {
        serde_json::Value::Null => Context::new(),
        serde_json::Value::Object(_) => {
            Context::from_serialize(variables).map_err(|_| TemplateError::Variables)?
        }
        _ => return Err(TemplateError::Variables),
    };

    let render_part = |part: &'static str| {
        tera.render(part, &context).map_err(|e| TemplateError::Render {
            part,
            message: describe(&e),
        })
    };

    Ok(RenderedEmail {
        subject: render_part("subject")?,
        body: render_part("body")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template(subject: &str, body: &str) -> EmailTemplate {
        let now = qms_common::time::now();
        EmailTemplate {
            id: 1,
            name: "ncr_assigned".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            description: None,
            category: Some("ncr".to_string()),
            active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_renders_variables() {
        let t = template(
            "NCR {{ ncr_number }} assigned",
            "Hello {{ name }},\n{{ ncr_number }} is due {{ due }}.",
        );
        let out = render(
            &t,
            &json!({"ncr_number": "NCR-2026-0001", "name": "Dana", "due": "2026-11-01"}),
        )
        .unwrap();
        assert_eq!(out.subject, "NCR NCR-2026-0001 assigned");
        assert_eq!(out.body, "Hello Dana,\nNCR-2026-0001 is due 2026-11-01.");
    }

    #[test]
    fn test_no_html_escaping() {
        let t = template("{{ s }}", "{{ b }}");
        let out = render(&t, &json!({"s": "A & B", "b": "<ok>"})).unwrap();
        assert_eq!(out.subject, "A & B");
        assert_eq!(out.body, "<ok>");
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let t = template("Hi {{ name }}", "body");
        let err = render(&t, &json!({})).unwrap_err();
        assert!(matches!(err, TemplateError::Render { part: "subject", .. }));
    }

    #[test]
    fn test_non_object_variables_rejected() {
        let t = template("Hi", "body");
        assert!(matches!(render(&t, &json!([1, 2])), Err(TemplateError::Variables)));
        assert!(render(&t, &serde_json::Value::Null).is_ok());
    }

    #[test]
    fn test_syntax_errors_detected() {
        assert!(check_syntax("{{ open", "body").is_err());
        assert!(check_syntax("fine", "{% if x %}unterminated").is_err());
        assert!(check_syntax("{{ a }}", "{% if a %}yes{% endif %}").is_ok());
    }
}
