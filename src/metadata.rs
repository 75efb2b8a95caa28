use std::path::Path;

use anyhow::{bail, Context as _};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    context::Context,
    notebook::{self, json_kind},
};

pub(crate) const FRONT_MATTER_KEY: &str = "front-matter";
pub(crate) const RENDER_CONFIG_KEY: &str = "hugo-jupyter";

pub(crate) const DEFAULT_SUBTITLE: &str = "Generic subtitle";
pub(crate) const DEFAULT_CATEGORY: &str = "Notebook";
pub(crate) const DEFAULT_RENDER_TO: &str = "content/notebooks/";
pub(crate) const DEFAULT_STORE_TO: &str = "/full_html/";

const CORE_KEYS: &[&str] = &["title", "subtitle", "date", "slug", "categories", "repo"];

/// Page header consumed by the site generator.
///
/// The fixed fields are always present; anything else (typically injected by a
/// `front-matter.toml`) travels in `extra` and is serialized alongside them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct FrontMatter {
    pub title: String,
    pub subtitle: String,
    pub date: String,
    pub slug: String,
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where the generated pages go.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RenderConfig {
    pub render_to: String,
    pub store_to: String,
}

/// Render settings as found in a notebook, either of which may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StoredRenderConfig {
    pub render_to: Option<String>,
    pub store_to: Option<String>,
}

impl RenderConfig {
    pub fn resolve(
        render_to: Option<String>,
        store_to: Option<String>,
        stored: StoredRenderConfig,
    ) -> Self {
        Self {
            render_to: resolve(render_to, stored.render_to, || DEFAULT_RENDER_TO.to_string()),
            store_to: resolve(store_to, stored.store_to, || DEFAULT_STORE_TO.to_string()),
        }
    }
}

/// Values given on the command line; `None` defers to the notebook.
#[derive(Debug, Default, Clone)]
pub(crate) struct MetadataOverrides {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub date: Option<String>,
    pub slug: Option<String>,
    pub categories: Option<Vec<String>>,
    pub render_to: Option<String>,
    pub store_to: Option<String>,
}

/// Values that count as absent: empty strings and empty lists.
pub(crate) trait Unset {
    fn is_unset(&self) -> bool;
}

impl Unset for String {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Unset for Vec<T> {
    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

/// explicit > stored > default
pub(crate) fn resolve<T: Unset>(
    explicit: Option<T>,
    stored: Option<T>,
    default: impl FnOnce() -> T,
) -> T {
    explicit
        .filter(|v| !v.is_unset())
        .or_else(|| stored.filter(|v| !v.is_unset()))
        .unwrap_or_else(default)
}

fn stored_str(fields: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    fields?.get(key)?.as_str().map(str::to_owned)
}

fn stored_list(fields: Option<&Map<String, Value>>, key: &str) -> Option<Vec<String>> {
    match fields?.get(key)? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// A metadata entry that must be a mapping when present.
pub(crate) fn stored_mapping<'a>(
    metadata: &'a Map<String, Value>,
    key: &str,
) -> anyhow::Result<Option<&'a Map<String, Value>>> {
    match metadata.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(fields)) => Ok(Some(fields)),
        Some(other) => bail!("`{key}` metadata must be a mapping, found {}", json_kind(other)),
    }
}

pub(crate) fn stored_render_config(
    metadata: &Map<String, Value>,
) -> anyhow::Result<StoredRenderConfig> {
    Ok(match stored_mapping(metadata, RENDER_CONFIG_KEY)? {
        Some(fields) => StoredRenderConfig {
            render_to: stored_str(Some(fields), "render-to"),
            store_to: stored_str(Some(fields), "store-to"),
        },
        None => StoredRenderConfig::default(),
    })
}

/// Overlays `overrides` onto a stored front-matter mapping key by key, the
/// override winning whatever its type. A lone category string becomes a list.
pub(crate) fn overlay_front_matter(
    mut fields: Map<String, Value>,
    overrides: Option<Map<String, Value>>,
) -> Map<String, Value> {
    if let Some(overrides) = overrides {
        fields.extend(overrides);
    }
    if let Some(Value::String(category)) = fields.get("categories").cloned() {
        fields.insert(
            "categories".to_string(),
            Value::Array(vec![Value::String(category)]),
        );
    }
    fields
}

pub(crate) fn slugify(title: &str) -> String {
    title.to_lowercase().replace(' ', "-")
}

/// Computes the front matter and render settings a notebook should carry.
pub(crate) fn merge_metadata(
    metadata: &Map<String, Value>,
    stem: &str,
    overrides: MetadataOverrides,
    today: &str,
) -> anyhow::Result<(FrontMatter, RenderConfig)> {
    let old = stored_mapping(metadata, FRONT_MATTER_KEY)?;

    let title = resolve(overrides.title, stored_str(old, "title"), || stem.to_string());
    let subtitle = resolve(overrides.subtitle, stored_str(old, "subtitle"), || {
        DEFAULT_SUBTITLE.to_string()
    });
    let date = resolve(overrides.date, stored_str(old, "date"), || today.to_string());
    let slug = resolve(overrides.slug, stored_str(old, "slug"), || slugify(&title));
    let categories = resolve(overrides.categories, stored_list(old, "categories"), || {
        vec![DEFAULT_CATEGORY.to_string()]
    });

    let extra: Map<String, Value> = old
        .map(|fields| {
            fields
                .iter()
                .filter(|(k, _)| !CORE_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let front_matter = FrontMatter {
        title,
        subtitle,
        date,
        slug,
        categories,
        repo: stored_str(old, "repo"),
        extra,
    };
    let render_config = RenderConfig::resolve(
        overrides.render_to,
        overrides.store_to,
        stored_render_config(metadata)?,
    );

    Ok((front_matter, render_config))
}

/// Rewrites the notebook's front matter and render settings in place, then
/// re-signs it.
pub(crate) fn update_notebook_metadata(
    ctx: &Context,
    notebook: &Path,
    overrides: MetadataOverrides,
) -> anyhow::Result<(FrontMatter, RenderConfig)> {
    let mut doc = notebook::read_json(notebook)?;
    let stem = notebook
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();

    let metadata = notebook::metadata_mut(&mut doc).with_context(|| format!("in {notebook:?}"))?;
    let (front_matter, render_config) = merge_metadata(metadata, &stem, overrides, &today)
        .with_context(|| format!("while updating metadata of {notebook:?}"))?;

    metadata.insert(
        FRONT_MATTER_KEY.to_string(),
        serde_json::to_value(&front_matter)?,
    );
    metadata.insert(
        RENDER_CONFIG_KEY.to_string(),
        serde_json::to_value(&render_config)?,
    );

    notebook::write_json(notebook, &doc)?;
    info!("updated metadata of {notebook:?} (slug: {})", front_matter.slug);

    ctx.trust(notebook)?;

    Ok((front_matter, render_config))
}
