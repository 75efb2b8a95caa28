use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use log::info;
use walkdir::WalkDir;

use crate::{
    context::Context,
    metadata::{self, MetadataOverrides, RenderConfig},
    renderer,
};

mod data;
mod utils;

pub(crate) use data::WrittenPage;
use data::StubPage;

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_extra::dir::create_all(parent, false)
            .with_context(|| format!("while creating {parent:?}"))?;
    }
    std::fs::write(path, contents).with_context(|| format!("while writing {path:?}"))
}

/// Renders one notebook and writes its HTML page and Markdown stub.
///
/// `render_to` and `store_to` take precedence over the notebook's stored
/// settings, which take precedence over the defaults.
pub(crate) fn write_hugo_page(
    ctx: &Context,
    notebook: &Path,
    render_to: Option<String>,
    store_to: Option<String>,
) -> anyhow::Result<WrittenPage> {
    let rendered = renderer::notebook_to_html(ctx, notebook)?;
    let config = RenderConfig::resolve(render_to, store_to, rendered.render_config.clone());
    let render_to = utils::with_trailing_separator(config.render_to);
    let slug = utils::checked_slug(&rendered.slug)
        .with_context(|| format!("refusing to write pages for {notebook:?}"))?;
    let notebook_name = notebook
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let html_file = ctx.path(utils::html_output_path(&config.store_to, slug));
    write_file(&html_file, &rendered.html)?;
    info!("{notebook_name} -> {html_file:?}");

    let interactive_link = rendered
        .repo
        .as_deref()
        .map(|repo| utils::binder_link(repo, &notebook_name));
    let page = StubPage {
        front_matter: &rendered.front_matter_json,
        interactive_link,
        embed: utils::iframe_shortcode(&config.store_to, slug),
    };

    let markdown_file = ctx.path(utils::markdown_output_path(&render_to, slug));
    write_file(&markdown_file, &page.render())?;
    info!("{notebook_name} -> {markdown_file:?}");

    Ok(WrittenPage {
        html: html_file,
        markdown: markdown_file,
    })
}

/// Lists every renderable notebook below `dir`, sorted by path.
pub(crate) fn discover_notebooks(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("notebook directory {dir:?} does not exist");
    }

    let mut notebooks = vec![];
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir)?;
        if utils::is_renderable(relative) {
            notebooks.push(entry.into_path());
        }
    }

    Ok(notebooks)
}

/// Refreshes the metadata of every notebook under the notebooks directory and
/// writes its pages, one notebook at a time.
pub(crate) fn render_notebooks(ctx: &Context) -> anyhow::Result<Vec<WrittenPage>> {
    let notebooks = discover_notebooks(&ctx.path(&ctx.notebooks_dir))?;
    info!("found {} notebooks", notebooks.len());

    let mut pages = Vec::with_capacity(notebooks.len());
    for notebook in notebooks.iter() {
        metadata::update_notebook_metadata(ctx, notebook, MetadataOverrides::default())
            .with_context(|| format!("while preparing {notebook:?}"))?;
        let page = write_hugo_page(ctx, notebook, None, None)
            .with_context(|| format!("while rendering {notebook:?}"))?;
        pages.push(page);
    }

    Ok(pages)
}
