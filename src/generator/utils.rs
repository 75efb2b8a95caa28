use std::path::{Component, Path, PathBuf};

use anyhow::bail;

const BINDER_BASE_URL: &str = "https://mybinder.org/v2";
const BINDER_REF: &str = "master";

/// Hosting providers Binder knows under a short prefix.
const REPO_PROVIDERS: &[(&str, &str)] = &[
    ("https://github.com", "gh"),
    ("https://gitlab.com", "gl"),
];

/// Turns a repository URL into Binder's `<provider>/<owner>/<repo>` form.
/// Unknown hosts pass through untouched.
pub(super) fn binder_repo_spec(repo: &str) -> String {
    let repo = repo.trim_end_matches('/');
    REPO_PROVIDERS
        .iter()
        .find_map(|(prefix, short)| repo.strip_prefix(prefix).map(|rest| format!("{short}{rest}")))
        .unwrap_or_else(|| repo.to_string())
}

pub(super) fn binder_link(repo: &str, notebook_name: &str) -> String {
    format!(
        "{BINDER_BASE_URL}/{}/{BINDER_REF}?filepath={notebook_name}",
        binder_repo_spec(repo)
    )
}

pub(super) fn iframe_shortcode(store_to: &str, slug: &str) -> String {
    let src = Path::new(store_to).join(format!("{slug}.html"));
    format!("{{{{< iframe src = \"{}\">}}}}", src.display())
}

/// A slug names one file inside the output directories, so it must be a single
/// plain path component.
pub(super) fn checked_slug(slug: &str) -> anyhow::Result<&str> {
    let mut components = Path::new(slug).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !slug.contains(['/', '\\']) => Ok(slug),
        _ => bail!("slug {slug:?} is not a single file name"),
    }
}

/// `static/<store_to>/<slug>.html`; `static` keeps the page out of the content index.
pub(super) fn html_output_path(store_to: &str, slug: &str) -> PathBuf {
    PathBuf::from("static")
        .join(store_to.trim_start_matches('/'))
        .join(format!("{slug}.html"))
}

pub(super) fn with_trailing_separator(dir: String) -> String {
    if dir.ends_with('/') {
        dir
    } else {
        dir + "/"
    }
}

pub(super) fn markdown_output_path(render_to: &str, slug: &str) -> PathBuf {
    PathBuf::from(render_to).join(format!("{slug}.md"))
}

/// Whether a path found under the notebooks directory should be rendered.
/// `relative` is taken relative to that directory.
pub(super) fn is_renderable(relative: &Path) -> bool {
    let is_notebook = relative.extension().is_some_and(|ext| ext == "ipynb");
    let hidden = relative.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    let untitled = relative
        .file_name()
        .is_some_and(|name| name.to_string_lossy().to_lowercase().contains("untitled"));

    is_notebook && !hidden && !untitled
}
