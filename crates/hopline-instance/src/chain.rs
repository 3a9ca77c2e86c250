//! Chain builder boundary.
//!
//! The chain builder composes a profile into the top-level engine config and
//! an ordered list of hops. The orchestrator only consumes its output.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{InstanceError, InstanceResult};
use crate::protocol::ProtocolBean;

/// One hop as produced by the chain builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDefinition {
    /// Local listen port.
    pub port: u16,
    /// Outbound protocol.
    pub bean: ProtocolBean,
}

/// A local port that must be driven through an HTTP client stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequirement {
    /// Short name used in logs, e.g. `ws`.
    pub name: String,
    /// Local port the bridge fetches from.
    pub port: u16,
}

/// Output of a chain builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Top-level config for the primary engine.
    pub config: String,
    /// Hops in launch order.
    #[serde(default)]
    pub hops: Vec<HopDefinition>,
    /// Loopback bridges to start after the primary engine.
    #[serde(default)]
    pub bridges: Vec<BridgeRequirement>,
}

impl BuildResult {
    /// Parse a build result from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Build`] on malformed input.
    pub fn from_toml(text: &str) -> InstanceResult<Self> {
        toml::from_str(text).map_err(|e| InstanceError::Build(e.to_string()))
    }

    /// Read and parse a TOML build result.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`InstanceError::Build`] on malformed input.
    pub fn from_file(path: &Path) -> InstanceResult<Self> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

/// Produces the build result for one instance.
pub trait ChainBuilder: Send + Sync {
    /// Compose the chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be composed.
    fn build(&self) -> InstanceResult<BuildResult>;
}

/// A chain builder returning a fixed, pre-composed result.
#[derive(Debug, Clone)]
pub struct StaticChainBuilder {
    result: BuildResult,
}

impl StaticChainBuilder {
    /// Builder that always yields `result`.
    #[must_use]
    pub fn new(result: BuildResult) -> Self {
        Self { result }
    }
}

impl ChainBuilder for StaticChainBuilder {
    fn build(&self) -> InstanceResult<BuildResult> {
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_HOPS: &str = r#"
config = '{"outbounds": []}'

[[hops]]
port = 10808
[hops.bean]
type = "naive"
server_address = "example.org"

[[hops]]
port = 10809
[hops.bean]
type = "native"
protocol = "vmess"

[[bridges]]
name = "ws"
port = 10810
"#;

    #[test]
    fn parses_hops_in_order() {
        let result = BuildResult::from_toml(TWO_HOPS).unwrap();
        assert_eq!(result.config, r#"{"outbounds": []}"#);
        let ports: Vec<_> = result.hops.iter().map(|h| h.port).collect();
        assert_eq!(ports, vec![10808, 10809]);
        assert!(matches!(result.hops[0].bean, ProtocolBean::Naive(_)));
        assert_eq!(result.bridges[0].port, 10810);
    }

    #[test]
    fn rejects_unknown_bean_type() {
        let text = "config = ''\n[[hops]]\nport = 1\n[hops.bean]\ntype = \"carrier-pigeon\"\n";
        assert!(matches!(
            BuildResult::from_toml(text),
            Err(InstanceError::Build(_))
        ));
    }

    #[test]
    fn static_builder_clones() {
        let builder = StaticChainBuilder::new(BuildResult::from_toml(TWO_HOPS).unwrap());
        assert_eq!(builder.build().unwrap(), builder.build().unwrap());
    }
}
