use std::path::PathBuf;

/// Keeps the site generator from using the page body as a summary.
pub(super) const SUMMARY_CUT: &str = "<!--more-->";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WrittenPage {
    pub html: PathBuf,
    pub markdown: PathBuf,
}

/// The Markdown stub that embeds a rendered notebook.
#[derive(Debug)]
pub(super) struct StubPage<'a> {
    pub front_matter: &'a str,
    pub interactive_link: Option<String>,
    pub embed: String,
}

impl StubPage<'_> {
    pub fn render(&self) -> String {
        let mut body = String::new();
        if let Some(link) = &self.interactive_link {
            body.push_str(&format!(
                "Click to access <a href=\"{link}\" target=\"_blank\">interactive version</a> \n"
            ));
        }
        body.push_str(&self.embed);

        ["---", self.front_matter, "---", SUMMARY_CUT, body.as_str()].join("\n")
    }
}
