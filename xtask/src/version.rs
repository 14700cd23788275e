// Licensed under the Apache-2.0 license

use crate::GlobalArgs;
use anyhow::Result;
use std::path::PathBuf;

fn registry_path(args: &GlobalArgs, registry: Option<PathBuf>) -> Result<PathBuf> {
    match registry {
        Some(path) => Ok(path),
        None => Ok(crate::config::load(args)?.version_registry.clone()),
    }
}

pub(crate) fn print(args: &GlobalArgs, registry: Option<PathBuf>) -> Result<()> {
    let path = registry_path(args, registry)?;
    println!("{}", release_builder::version::read_version(&path)?);
    Ok(())
}

pub(crate) fn bump(
    args: &GlobalArgs,
    registry: Option<PathBuf>,
    sources: Option<PathBuf>,
) -> Result<()> {
    let path = registry_path(args, registry)?;
    let today = chrono::Local::now().date_naive();
    let version = release_builder::version::bump_registry(&path, sources.as_deref(), today)?;
    println!("{version}");
    Ok(())
}
