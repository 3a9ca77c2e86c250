//! Config command: display the resolved configuration.

use anyhow::{Result, bail};
use hopline_config::ResolvedConfig;

/// Print the resolved configuration in `format`, or the per-field source
/// report when `sources` is set.
pub(crate) fn show_config(resolved: &ResolvedConfig, format: &str, sources: bool) -> Result<()> {
    if sources {
        print!("{}", resolved.sources_report());
        return Ok(());
    }

    let rendered = match format {
        "toml" => resolved.to_toml()?,
        "json" => resolved.to_json()?,
        other => bail!("unknown format '{other}'; expected toml or json"),
    };
    println!("{rendered}");
    Ok(())
}
