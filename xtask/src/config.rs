// Licensed under the Apache-2.0 license

use crate::GlobalArgs;
use anyhow::{Context, Result};
use release_builder::ReleaseConfig;

/// Configuration file (or defaults) with key material from the command line
/// or environment layered on top.
pub(crate) fn load(args: &GlobalArgs) -> Result<ReleaseConfig> {
    let mut config = ReleaseConfig::load_or_default(args.config.as_deref())
        .context("Unable to load release configuration")?;
    config.keys.apply_overrides(
        args.aes_key.clone(),
        args.aes_iv.clone(),
        args.hmac_key.clone(),
    );
    Ok(config)
}
