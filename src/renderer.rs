use std::{path::Path, sync::OnceLock};

use anyhow::{bail, Context as _};
use handlebars::{handlebars_helper, Handlebars};
use log::debug;
use maud::{html, Markup, PreEscaped};
use pulldown_cmark::{html as cmark_html, Options, Parser};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    context::Context,
    metadata::{self, StoredRenderConfig, FRONT_MATTER_KEY},
    notebook::{json_kind, mime_text, Cell, MimeBundle, Notebook, Output},
};

pub(crate) const OVERRIDE_FILE_NAME: &str = "front-matter.toml";

const PAGE_TEMPLATE: &str = include_str!("../template/notebook.hbs");

const MIME_PREFERENCE: &[&str] = &[
    "text/html",
    "image/svg+xml",
    "image/png",
    "image/jpeg",
    "text/markdown",
    "text/latex",
    "text/plain",
];

handlebars_helper!(join: |items: array, sep: str| {
    items
        .iter()
        .filter_map(|item| item.as_str())
        .collect::<Vec<_>>()
        .join(sep)
});

/// Builds the page renderer, using `template` in place of the built-in page when given.
pub(crate) fn generate_renderer(template: Option<&Path>) -> anyhow::Result<Handlebars<'static>> {
    let mut handlebars = Handlebars::new();
    handlebars.register_helper("join", Box::new(join));
    match template {
        Some(path) => handlebars
            .register_template_file("notebook", path)
            .with_context(|| format!("{path:?}"))?,
        None => handlebars.register_template_string("notebook", PAGE_TEMPLATE)?,
    }

    Ok(handlebars)
}

#[derive(Serialize, Debug)]
struct NotebookPageData<'a> {
    front_matter: &'a Map<String, Value>,
    body: String,
}

/// A rendered notebook ready to be written out.
#[derive(Debug)]
pub(crate) struct RenderedNotebook {
    pub html: String,
    pub front_matter: Map<String, Value>,
    pub slug: String,
    /// Source repository, when the front matter names a non-empty one.
    pub repo: Option<String>,
    /// `front_matter` as indented JSON, ready to sit in a page header.
    pub front_matter_json: String,
    pub render_config: StoredRenderConfig,
}

/// Renders `path` to a standalone HTML page and its merged front matter.
///
/// Fails before producing anything when the notebook carries no front matter.
pub(crate) fn notebook_to_html(ctx: &Context, path: &Path) -> anyhow::Result<RenderedNotebook> {
    let notebook = Notebook::read(path)?;

    let Some(stored) = notebook.metadata.get(FRONT_MATTER_KEY) else {
        bail!("{path:?} has no `{FRONT_MATTER_KEY}` field in its metadata; update its metadata first");
    };
    let Value::Object(fields) = stored else {
        bail!(
            "`{FRONT_MATTER_KEY}` of {path:?} must be a mapping, found {}",
            json_kind(stored)
        );
    };
    let front_matter =
        metadata::overlay_front_matter(fields.clone(), load_front_matter_override(path)?);
    let slug = match front_matter.get("slug") {
        Some(Value::String(slug)) if !slug.is_empty() => slug.clone(),
        Some(other) => bail!(
            "`slug` in the front matter of {path:?} must be a non-empty string, found {}",
            json_kind(other)
        ),
        None => bail!("the front matter of {path:?} has no `slug`"),
    };
    let repo = front_matter
        .get("repo")
        .and_then(Value::as_str)
        .filter(|repo| !repo.is_empty())
        .map(str::to_owned);
    let render_config = metadata::stored_render_config(&notebook.metadata)
        .with_context(|| format!("in {path:?}"))?;

    let data = NotebookPageData {
        front_matter: &front_matter,
        body: render_cells(&notebook),
    };
    let html = ctx
        .handlebars
        .render("notebook", &data)
        .with_context(|| format!("while rendering {path:?}"))?;
    let front_matter_json = serde_json::to_string_pretty(&front_matter)?;

    Ok(RenderedNotebook {
        html,
        front_matter,
        slug,
        repo,
        front_matter_json,
        render_config,
    })
}

/// Reads `front-matter.toml` next to the notebook, if there is one.
fn load_front_matter_override(notebook: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let Some(override_path) = notebook.parent().map(|dir| dir.join(OVERRIDE_FILE_NAME)) else {
        return Ok(None);
    };
    if !override_path.is_file() {
        debug!("no {override_path:?}, keeping the notebook's own front matter");
        return Ok(None);
    }

    let content = std::fs::read_to_string(&override_path)
        .with_context(|| format!("while reading {override_path:?}"))?;
    let table: toml::Table =
        toml::from_str(&content).with_context(|| format!("while parsing {override_path:?}"))?;
    debug!("applying {} keys from {override_path:?}", table.len());

    Ok(Some(
        table
            .into_iter()
            .map(|(k, v)| (k, toml_to_json(v)))
            .collect(),
    ))
}

fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn markdown_to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(source, options);
    let mut out = String::new();
    cmark_html::push_html(&mut out, parser);
    out
}

fn strip_ansi(text: &str) -> String {
    static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();
    ANSI_ESCAPE
        .get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI pattern"))
        .replace_all(text, "")
        .into_owned()
}

fn prompt(label: &str, count: Option<u64>) -> String {
    match count {
        Some(n) => format!("{label} [{n}]:"),
        None => format!("{label} [ ]:"),
    }
}

fn is_html_raw(metadata: &Map<String, Value>) -> bool {
    ["raw_mimetype", "format"]
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .any(|mime| mime == "text/html")
}

fn render_cells(notebook: &Notebook) -> String {
    let language = notebook.language();
    html! {
        @for cell in &notebook.cells {
            (render_cell(cell, language))
        }
    }
    .into_string()
}

fn render_cell(cell: &Cell, language: &str) -> Markup {
    match cell {
        Cell::Markdown { source } => html! {
            div.cell.markdown-cell {
                (PreEscaped(markdown_to_html(&source.to_string())))
            }
        },
        Cell::Code {
            source,
            execution_count,
            outputs,
        } => html! {
            div.cell.code-cell {
                div.input {
                    div.prompt.input-prompt { (prompt("In", *execution_count)) }
                    pre { code.{ "language-" (language) } { (source.to_string()) } }
                }
                @if !outputs.is_empty() {
                    div.outputs {
                        @for output in outputs {
                            (render_output(output))
                        }
                    }
                }
            }
        },
        Cell::Raw { source, metadata } if is_html_raw(metadata) => html! {
            div.cell.raw-cell { (PreEscaped(source.to_string())) }
        },
        Cell::Raw { .. } | Cell::Unknown => html! {},
    }
}

fn render_output(output: &Output) -> Markup {
    match output {
        Output::Stream { name, text } => html! {
            div.output.{ "stream-" (name) } { pre { (text.to_string()) } }
        },
        Output::ExecuteResult {
            data,
            execution_count,
        } => html! {
            div.output.execute-result {
                div.prompt.output-prompt { (prompt("Out", *execution_count)) }
                (render_mime_bundle(data))
            }
        },
        Output::DisplayData { data } => html! {
            div.output.display-data { (render_mime_bundle(data)) }
        },
        Output::Error {
            ename,
            evalue,
            traceback,
        } => {
            let text = if traceback.is_empty() {
                format!("{ename}: {evalue}")
            } else {
                strip_ansi(&traceback.join("\n"))
            };
            html! { div.output.error { pre { (text) } } }
        }
        Output::Unknown => html! {},
    }
}

fn render_mime_bundle(data: &MimeBundle) -> Markup {
    let Some((mime, text)) = MIME_PREFERENCE
        .iter()
        .find_map(|mime| data.get(*mime).and_then(mime_text).map(|text| (*mime, text)))
    else {
        return html! {};
    };

    match mime {
        "text/html" | "image/svg+xml" => html! { div.output-html { (PreEscaped(text)) } },
        "image/png" | "image/jpeg" => {
            let encoded: String = text.split_whitespace().collect();
            html! {
                div.output-image { img src={ "data:" (mime) ";base64," (encoded) }; }
            }
        }
        "text/markdown" => html! { div.output-markdown { (PreEscaped(markdown_to_html(&text))) } },
        "text/latex" => html! { div.output-latex { (text) } },
        _ => html! { pre.output-text { (text) } },
    }
}
