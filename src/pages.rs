//! Interstitial pages
//!
//! Loading and error pages are compiled once at startup from either a
//! built-in template or an operator supplied override file. Templates use
//! `{{ .Name }}`, `{{ .Timeout }}` and `{{ .Error }}` placeholders; values
//! are HTML-escaped on substitution.

use crate::duration;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const DEFAULT_LOADING_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>Waking up {{ .Name }}</title>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <meta http-equiv="refresh" content="5" />
  <style>
    body { font-family: system-ui, sans-serif; background: #10172a; color: #e2e8f0; display: flex; justify-content: center; align-items: center; min-height: 100vh; margin: 0; }
    .card { background: #1e293b; border-radius: 16px; padding: 32px 48px; max-width: 640px; }
    .label { font-size: 13px; text-transform: uppercase; letter-spacing: .08em; color: #94a3b8; }
    .value { font-size: 22px; font-weight: 600; margin: 4px 0 24px; }
    .spinner { width: 32px; height: 32px; border: 4px solid #334155; border-top-color: #38bdf8; border-radius: 50%; animation: spin 1s linear infinite; }
    @keyframes spin { to { transform: rotate(360deg); } }
  </style>
</head>
<body>
  <div class="card">
    <div class="label">Stack</div>
    <div class="value">{{ .Name }}</div>
    <div class="label">Status</div>
    <div class="value">Waking up, this page refreshes automatically.</div>
    <div class="label">Automatic shutdown</div>
    <div class="value">After {{ .Timeout }} of inactivity.</div>
    <div class="spinner"></div>
  </div>
</body>
</html>
"#;

const DEFAULT_ERROR_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <title>{{ .Name }} failed to wake up</title>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <meta http-equiv="refresh" content="5" />
  <style>
    body { font-family: system-ui, sans-serif; background: #10172a; color: #e2e8f0; display: flex; justify-content: center; align-items: center; min-height: 100vh; margin: 0; }
    .card { background: #1e293b; border-radius: 16px; padding: 32px 48px; max-width: 640px; }
    .label { font-size: 13px; text-transform: uppercase; letter-spacing: .08em; color: #94a3b8; }
    .value { font-size: 22px; font-weight: 600; margin: 4px 0 24px; }
    pre { background: #0f172a; color: #fda4af; padding: 16px; border-radius: 8px; white-space: pre-wrap; word-break: break-word; }
  </style>
</head>
<body>
  <div class="card">
    <div class="label">Stack</div>
    <div class="value">{{ .Name }}</div>
    <div class="label">Error</div>
    <div class="value">Something went wrong while waking up this stack.</div>
    <pre>{{ .Error }}</pre>
  </div>
</body>
</html>
"#;

/// Failure to load or compile an override template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("unknown placeholder '{{{{ {0} }}}}'")]
    UnknownField(String),
}

/// Which page a template renders; decides the placeholders it may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Loading,
    Error,
}

impl PageKind {
    fn default_source(&self) -> &'static str {
        match self {
            PageKind::Loading => DEFAULT_LOADING_PAGE,
            PageKind::Error => DEFAULT_ERROR_PAGE,
        }
    }

    fn field(&self, name: &str) -> Option<Field> {
        match (self, name) {
            (_, ".Name") => Some(Field::Name),
            (PageKind::Loading, ".Timeout") => Some(Field::Detail),
            (PageKind::Error, ".Error") => Some(Field::Detail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    /// `.Timeout` on loading pages, `.Error` on error pages
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
}

/// A compiled page template
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Compile template source for the given page
    pub fn compile(kind: PageKind, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or(TemplateError::Unterminated(offset + start))?;
            let name = after_open[..end].trim();
            let field = kind
                .field(name)
                .ok_or_else(|| TemplateError::UnknownField(name.to_string()))?;
            segments.push(Segment::Field(field));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// The built-in template for a page
    pub fn builtin(kind: PageKind) -> Self {
        Self::compile(kind, kind.default_source()).expect("built-in templates compile")
    }

    /// Load an override template, falling back to the built-in one when the
    /// path is empty or the file cannot be read or compiled
    pub fn load_or_default(kind: PageKind, path: Option<&Path>) -> Self {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return Self::builtin(kind);
        };

        let loaded = std::fs::read_to_string(path)
            .map_err(|source| TemplateError::Io {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|source| Self::compile(kind, &source));

        match loaded {
            Ok(template) => {
                info!(path = %path.display(), page = ?kind, "Loaded page template override");
                template
            }
            Err(e) => {
                warn!(path = %path.display(), page = ?kind, error = %e, "Invalid page template, using built-in page");
                Self::builtin(kind)
            }
        }
    }

    fn render(&self, name: &str, detail: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(Field::Name) => push_escaped(&mut out, name),
                Segment::Field(Field::Detail) => push_escaped(&mut out, detail),
            }
        }
        out
    }
}

/// Renders the loading and error pages of one gate
#[derive(Debug, Clone)]
pub struct PageRenderer {
    loading: Template,
    error: Template,
}

impl PageRenderer {
    pub fn new(loading_page: Option<&Path>, error_page: Option<&Path>) -> Self {
        Self {
            loading: Template::load_or_default(PageKind::Loading, loading_page),
            error: Template::load_or_default(PageKind::Error, error_page),
        }
    }

    pub fn render_loading(&self, group_name: &str, timeout: Duration) -> String {
        self.loading.render(group_name, &duration::humanize(timeout))
    }

    pub fn render_error(&self, group_name: &str, error: &str) -> String {
        self.error.render(group_name, error)
    }
}

impl Default for PageRenderer {
    fn default() -> Self {
        Self {
            loading: Template::builtin(PageKind::Loading),
            error: Template::builtin(PageKind::Error),
        }
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
