use std::path::PathBuf;

use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use context::{split_command_line, Context, DEFAULT_NOTEBOOKS_DIR, DEFAULT_TRUST_COMMAND};
use metadata::MetadataOverrides;
use publish::PublishOptions;

mod context;
mod generator;
mod metadata;
mod notebook;
mod publish;
mod renderer;
mod shell;

fn notebook_arg() -> Arg {
    Arg::new("notebook")
        .help("Notebook file, relative to the site root")
        .required(true)
        .value_parser(value_parser!(PathBuf))
}

fn destination_args() -> [Arg; 2] {
    [
        Arg::new("render_to")
            .long("render-to")
            .help("Directory for the Markdown page (default: content/notebooks/)"),
        Arg::new("store_to")
            .long("store-to")
            .help("Directory under static/ for the HTML page (default: /full_html/)"),
    ]
}

fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args([
            Arg::new("root")
                .long("root")
                .help("Site root. Every relative path resolves against it.")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .global(true),
            Arg::new("notebooks")
                .long("notebooks")
                .help("Directory of notebooks, relative to the site root")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_NOTEBOOKS_DIR)
                .global(true),
            Arg::new("template")
                .long("template")
                .help("Handlebars template used instead of the built-in notebook page")
                .value_parser(value_parser!(PathBuf))
                .global(true),
            Arg::new("trust_command")
                .long("trust-command")
                .help("Command that re-signs a rewritten notebook. Falls back to NBSITE_TRUST_COMMAND, then `jupyter trust`.")
                .global(true),
            Arg::new("no_trust")
                .long("no-trust")
                .help("Do not re-sign notebooks after rewriting their metadata")
                .action(ArgAction::SetTrue)
                .global(true),
        ])
        .subcommand(
            Command::new("render").about("Render every notebook into an HTML page and a Markdown stub"),
        )
        .subcommand(
            Command::new("publish")
                .about("Render all notebooks, build the site and push it")
                .args([
                    Arg::new("publish_dir")
                        .long("publish-dir")
                        .help("Worktree receiving the built site")
                        .value_parser(value_parser!(PathBuf))
                        .default_value("public"),
                    Arg::new("remote")
                        .long("remote")
                        .default_value("upstream"),
                    Arg::new("branch")
                        .long("branch")
                        .default_value("master"),
                    Arg::new("build_command")
                        .long("build-command")
                        .help("Site build command, run at the site root")
                        .default_value("hugo"),
                    Arg::new("message")
                        .long("message")
                        .help("Commit message for the published site")
                        .default_value("Committing to master"),
                ]),
        )
        .subcommand(
            Command::new("update")
                .about("Write front matter and render settings into a notebook")
                .arg(notebook_arg())
                .args([
                    Arg::new("title").long("title"),
                    Arg::new("subtitle").long("subtitle"),
                    Arg::new("date").long("date").help("Publication date, YYYY-MM-DD"),
                    Arg::new("slug").long("slug"),
                    Arg::new("category")
                        .long("category")
                        .help("Category; repeat for several")
                        .action(ArgAction::Append),
                ])
                .args(destination_args()),
        )
        .subcommand(
            Command::new("convert")
                .about("Render one notebook into an HTML page and a Markdown stub")
                .arg(notebook_arg())
                .args(destination_args()),
        )
}

fn string_arg(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn build_context(matches: &ArgMatches) -> anyhow::Result<Context> {
    let root = matches
        .get_one::<PathBuf>("root")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let notebooks = matches
        .get_one::<PathBuf>("notebooks")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_NOTEBOOKS_DIR));
    let template = matches.get_one::<PathBuf>("template");

    let trust_command = if matches.get_flag("no_trust") {
        None
    } else {
        let line = string_arg(matches, "trust_command")
            .or_else(|| std::env::var("NBSITE_TRUST_COMMAND").ok())
            .unwrap_or_else(|| DEFAULT_TRUST_COMMAND.to_string());
        Some(split_command_line(&line))
    };

    Ok(Context::new(root, template.map(PathBuf::as_path))?
        .with_notebooks_dir(notebooks)
        .with_trust_command(trust_command))
}

fn publish_options(matches: &ArgMatches) -> PublishOptions {
    let defaults = PublishOptions::default();
    PublishOptions {
        publish_dir: matches
            .get_one::<PathBuf>("publish_dir")
            .cloned()
            .unwrap_or(defaults.publish_dir),
        remote: string_arg(matches, "remote").unwrap_or(defaults.remote),
        branch: string_arg(matches, "branch").unwrap_or(defaults.branch),
        build_command: string_arg(matches, "build_command")
            .map(|line| split_command_line(&line))
            .unwrap_or(defaults.build_command),
        message: string_arg(matches, "message").unwrap_or(defaults.message),
    }
}

fn metadata_overrides(matches: &ArgMatches) -> MetadataOverrides {
    MetadataOverrides {
        title: string_arg(matches, "title"),
        subtitle: string_arg(matches, "subtitle"),
        date: string_arg(matches, "date"),
        slug: string_arg(matches, "slug"),
        categories: matches
            .get_many::<String>("category")
            .map(|values| values.cloned().collect()),
        render_to: string_arg(matches, "render_to"),
        store_to: string_arg(matches, "store_to"),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let matches = cli().get_matches();
    let Some((name, sub_matches)) = matches.subcommand() else {
        anyhow::bail!("a subcommand is required");
    };
    let ctx = build_context(sub_matches)?;

    match name {
        "render" => {
            let pages = generator::render_notebooks(&ctx)?;
            log::info!("rendered {} notebooks", pages.len());
        }
        "publish" => publish::publish(&ctx, &publish_options(sub_matches))?,
        "update" => {
            let notebook = ctx.path(sub_matches.get_one::<PathBuf>("notebook").unwrap());
            metadata::update_notebook_metadata(&ctx, &notebook, metadata_overrides(sub_matches))?;
        }
        "convert" => {
            let notebook = ctx.path(sub_matches.get_one::<PathBuf>("notebook").unwrap());
            let page = generator::write_hugo_page(
                &ctx,
                &notebook,
                string_arg(sub_matches, "render_to"),
                string_arg(sub_matches, "store_to"),
            )?;
            println!("{}", page.html.display());
            println!("{}", page.markdown.display());
        }
        _ => unreachable!("unknown subcommand {name}"),
    }

    Ok(())
}
