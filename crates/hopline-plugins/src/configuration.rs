//! Per-profile plugin configuration: a selected plugin plus stored options
//! for every plugin the user has configured.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::PluginResult;
use crate::options::PluginOptions;

/// Selected plugin id and the options stored per plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginConfiguration {
    /// Id of the selected plugin; empty means no plugin.
    pub selected: String,
    /// Stored options keyed by plugin id.
    pub plugins: BTreeMap<String, PluginOptions>,
}

impl PluginConfiguration {
    /// Parse the line-based form produced by [`fmt::Display`]. The first
    /// non-empty line names the selected plugin through its `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if any line is not a valid options string.
    pub fn parse(text: &str) -> PluginResult<Self> {
        let mut configuration = Self::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let options = PluginOptions::parse(line)?;
            let Some(id) = options.id().map(str::to_owned) else {
                tracing::debug!(line, "skipping plugin options without id");
                continue;
            };
            if configuration.selected.is_empty() {
                configuration.selected.clone_from(&id);
            }
            configuration.plugins.insert(id, options);
        }
        Ok(configuration)
    }

    /// Options for `id`: the stored ones, or `default_config` parsed with
    /// `id` filled in when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the default config is not a valid options string.
    pub fn options_for(
        &self,
        id: &str,
        default_config: impl FnOnce() -> Option<String>,
    ) -> PluginResult<PluginOptions> {
        if id.is_empty() {
            return Ok(PluginOptions::new());
        }
        if let Some(stored) = self.plugins.get(id) {
            return Ok(stored.clone());
        }
        let mut options = match default_config() {
            Some(raw) => PluginOptions::parse(&raw)?,
            None => PluginOptions::new(),
        };
        if options.id().is_none() {
            options.set_id(id);
        }
        Ok(options)
    }

    /// Options for the selected plugin.
    ///
    /// # Errors
    ///
    /// See [`options_for`](Self::options_for).
    pub fn selected_options(
        &self,
        default_config: impl FnOnce() -> Option<String>,
    ) -> PluginResult<PluginOptions> {
        self.options_for(&self.selected, default_config)
    }
}

impl fmt::Display for PluginConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selected = self.plugins.get(&self.selected);
        let rest = self
            .plugins
            .iter()
            .filter(|(id, _)| **id != self.selected)
            .map(|(_, options)| options);
        let mut first = true;
        for options in selected.into_iter().chain(rest) {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            write!(f, "{options}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_line_comes_first() {
        let mut configuration = PluginConfiguration {
            selected: "obfs-local".into(),
            ..Default::default()
        };
        configuration
            .plugins
            .insert("aaa-plugin".into(), PluginOptions::with_id("aaa-plugin"));
        let mut obfs = PluginOptions::with_id("obfs-local");
        obfs.insert("obfs", Some("http".into()));
        configuration.plugins.insert("obfs-local".into(), obfs);

        let text = configuration.to_string();
        assert_eq!(text.lines().next(), Some("id=obfs-local;obfs=http"));

        let parsed = PluginConfiguration::parse(&text).unwrap();
        assert_eq!(parsed, configuration);
    }

    #[test]
    fn options_for_falls_back_to_default_config() {
        let configuration = PluginConfiguration::default();
        let options = configuration
            .options_for("naive-plugin", || Some("padding".into()))
            .unwrap();
        assert_eq!(options.id(), Some("naive-plugin"));
        assert_eq!(options.get("padding"), Some(None));
    }

    #[test]
    fn stored_options_win() {
        let mut configuration = PluginConfiguration::default();
        let mut stored = PluginOptions::with_id("naive-plugin");
        stored.insert("x", Some("1".into()));
        configuration
            .plugins
            .insert("naive-plugin".into(), stored.clone());

        let options = configuration
            .options_for("naive-plugin", || panic!("default must not be consulted"))
            .unwrap();
        assert_eq!(options, stored);
    }

    #[test]
    fn empty_selection_yields_empty_options() {
        let options = PluginConfiguration::default()
            .selected_options(|| Some("ignored".into()))
            .unwrap();
        assert!(options.is_empty());
    }
}
