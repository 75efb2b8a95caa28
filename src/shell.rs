use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::{Command, ExitStatus},
};

use anyhow::{bail, Context};
use log::debug;

fn exec<I, S>(dir: &Path, program: &str, args: I) -> anyhow::Result<(ExitStatus, String)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).current_dir(dir);
    let description = format!("{command:?}");
    debug!("running {description} in {dir:?}");

    let status = command
        .status()
        .with_context(|| format!("failed to start {description} in {dir:?}"))?;
    Ok((status, description))
}

/// Runs `program` in `dir`, failing on a non-zero exit.
pub(crate) fn run<I, S>(dir: &Path, program: &str, args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let (status, description) = exec(dir, program, args)?;
    if !status.success() {
        bail!("{description} exited with {status}");
    }
    Ok(())
}

/// Runs `program` in `dir` and reports whether it exited successfully.
pub(crate) fn succeeds<I, S>(dir: &Path, program: &str, args: I) -> anyhow::Result<bool>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Ok(exec(dir, program, args)?.0.success())
}

/// Runs a pre-split command line followed by `extra` arguments.
pub(crate) fn run_line<I, S>(dir: &Path, line: &[String], extra: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let Some((program, args)) = line.split_first() else {
        bail!("empty command line");
    };
    let args = args
        .iter()
        .map(OsString::from)
        .chain(extra.into_iter().map(|a| a.as_ref().to_os_string()));
    run(dir, program, args)
}
