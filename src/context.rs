use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use log::debug;

use crate::{renderer, shell};

pub(crate) const DEFAULT_NOTEBOOKS_DIR: &str = "notebooks";
pub(crate) const DEFAULT_TRUST_COMMAND: &str = "jupyter trust";

/// Everything a run needs, handed explicitly to each step.
///
/// Relative paths are resolved against `root`, and every subprocess runs with
/// `root` as its working directory.
#[derive(Debug)]
pub(crate) struct Context {
    pub root: PathBuf,
    pub notebooks_dir: PathBuf,

    /// Program and arguments used to re-sign a notebook after it is rewritten.
    /// `None` skips signing.
    pub trust_command: Option<Vec<String>>,

    pub handlebars: Handlebars<'static>,
}

impl Context {
    pub fn new(root: PathBuf, template: Option<&Path>) -> anyhow::Result<Self> {
        Ok(Self {
            root,
            notebooks_dir: PathBuf::from(DEFAULT_NOTEBOOKS_DIR),
            trust_command: None,
            handlebars: renderer::generate_renderer(template)?,
        })
    }

    pub fn with_notebooks_dir(mut self, notebooks_dir: PathBuf) -> Self {
        self.notebooks_dir = notebooks_dir;
        self
    }

    pub fn with_trust_command(mut self, trust_command: Option<Vec<String>>) -> Self {
        self.trust_command = trust_command;
        self
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Marks `notebook` as trusted so viewers display its stored outputs.
    ///
    /// The command runs inside `root`, so it gets the path relative to it.
    pub fn trust(&self, notebook: &Path) -> anyhow::Result<()> {
        let Some(command) = &self.trust_command else {
            debug!("trust-signing disabled, leaving {notebook:?} as is");
            return Ok(());
        };
        let target = notebook.strip_prefix(&self.root).unwrap_or(notebook);
        shell::run_line(&self.root, command, [target.as_os_str()])
    }
}

pub(crate) fn split_command_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_owned).collect()
}
