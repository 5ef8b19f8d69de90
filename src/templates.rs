//! HTML pages shown to browser callers.
//!
//! Templates are compiled into the binary and rendered with autoescape on, so
//! any interpolated message is HTML-escaped.

use std::sync::LazyLock;

use tera::{Context, Tera};

const ERROR_TEMPLATE: &str = "error.html";
const DENIED_TEMPLATE: &str = "denied.html";

/// Compiled once on first use; `None` if the embedded templates fail to parse
static TEMPLATES: LazyLock<Option<Tera>> = LazyLock::new(|| {
    let mut tera = Tera::default();
    // Names ending in .html get autoescaping
    let added = tera.add_raw_templates([
        (ERROR_TEMPLATE, include_str!("../templates/error.html")),
        (DENIED_TEMPLATE, include_str!("../templates/denied.html")),
    ]);
    match added {
        Ok(()) => Some(tera),
        Err(e) => {
            tracing::error!(error = %e, "Failed to compile page templates");
            None
        }
    }
});

/// Served when a template itself fails to render
const FALLBACK_PAGE: &str = "<!DOCTYPE html><html><head><title>Error</title></head>\
<body><h1>Error</h1><p>Something went wrong.</p><a href=\"/\">Return to homepage</a></body></html>";

/// Render the generic error page.
///
/// `retry_url` adds a "Sign in again" link for failures that end a login.
pub fn render_error_page(title: &str, message: &str, retry_url: Option<&str>) -> String {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("message", message);
    context.insert("retry_url", &retry_url);
    render(ERROR_TEMPLATE, &context)
}

/// Render the page for an authenticated user who lacks the required group
pub fn render_access_denied(user: Option<&str>, message: &str) -> String {
    let mut context = Context::new();
    context.insert("user", &user);
    context.insert("message", message);
    render(DENIED_TEMPLATE, &context)
}

fn render(template: &str, context: &Context) -> String {
    let Some(tera) = TEMPLATES.as_ref() else {
        return FALLBACK_PAGE.to_string();
    };
    tera.render(template, context).unwrap_or_else(|e| {
        tracing::error!(error = %e, template, "Template rendering failed");
        FALLBACK_PAGE.to_string()
    })
}
