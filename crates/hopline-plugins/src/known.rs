//! Plugin ids of the proxy engines hopline knows how to configure.

use crate::plugin::PluginId;

/// A proxy engine distributed as a separate plugin package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownPlugin {
    /// Trojan-Go.
    TrojanGo,
    /// NaïveProxy.
    Naive,
    /// Brook.
    Brook,
    /// Hysteria.
    Hysteria,
    /// Hysteria 2.
    Hysteria2,
    /// Mieru.
    Mieru,
    /// TUIC v4.
    Tuic,
    /// TUIC v5.
    Tuic5,
    /// Juicity.
    Juicity,
    /// ShadowQUIC.
    ShadowQuic,
}

impl KnownPlugin {
    /// Every known plugin.
    pub const ALL: [Self; 10] = [
        Self::TrojanGo,
        Self::Naive,
        Self::Brook,
        Self::Hysteria,
        Self::Hysteria2,
        Self::Mieru,
        Self::Tuic,
        Self::Tuic5,
        Self::Juicity,
        Self::ShadowQuic,
    ];

    /// Logical plugin id as declared by provider packages.
    #[must_use]
    pub fn plugin_id_str(self) -> &'static str {
        match self {
            Self::TrojanGo => "trojan-go-plugin",
            Self::Naive => "naive-plugin",
            Self::Brook => "brook-plugin",
            Self::Hysteria => "hysteria-plugin",
            Self::Hysteria2 => "hysteria2-plugin",
            Self::Mieru => "mieru-plugin",
            Self::Tuic => "tuic-plugin",
            Self::Tuic5 => "tuic5-plugin",
            Self::Juicity => "juicity-plugin",
            Self::ShadowQuic => "shadowquic-plugin",
        }
    }

    /// Logical plugin id.
    #[must_use]
    pub fn plugin_id(self) -> PluginId {
        PluginId::from_static(self.plugin_id_str())
    }

    /// Human-readable name.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::TrojanGo => "Trojan-Go",
            Self::Naive => "NaïveProxy",
            Self::Brook => "Brook",
            Self::Hysteria => "Hysteria",
            Self::Hysteria2 => "Hysteria 2",
            Self::Mieru => "Mieru",
            Self::Tuic => "TUIC",
            Self::Tuic5 => "TUIC v5",
            Self::Juicity => "Juicity",
            Self::ShadowQuic => "ShadowQUIC",
        }
    }

    /// Look up a known plugin by its logical id.
    #[must_use]
    pub fn find(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.plugin_id_str() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_valid_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for plugin in KnownPlugin::ALL {
            assert!(PluginId::new(plugin.plugin_id_str()).is_ok());
            assert!(seen.insert(plugin.plugin_id_str()));
        }
    }

    #[test]
    fn find_round_trips() {
        assert_eq!(KnownPlugin::find("tuic5-plugin"), Some(KnownPlugin::Tuic5));
        assert_eq!(KnownPlugin::find("unknown-plugin"), None);
    }
}
