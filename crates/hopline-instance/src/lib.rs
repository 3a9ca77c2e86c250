//! Multi-hop proxy instances for Hopline.
//!
//! An [`InstanceOrchestrator`] owns one running profile: a primary tunnel
//! engine fed by an ordered chain of hops. Each hop is handled natively by
//! the engine, by a plugin executable supervised in a [`ProcessPool`], or by
//! a [`SubEngine`]. Loopback [`BridgeView`]s run on a dedicated
//! [`UiExecutor`] thread.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod bridge;
pub mod cache;
pub mod chain;
pub mod engine;
pub mod error;
pub mod instance;
pub mod process;
pub mod protocol;
pub mod sub_engine;
pub mod trust;
pub mod ui;

pub use bridge::{BridgeView, BridgeViewFactory, HttpBridgeFactory, HttpBridgeView, bridge_url};
pub use cache::{CacheFileFactory, monotonic_stamp};
pub use chain::{BridgeRequirement, BuildResult, ChainBuilder, HopDefinition, StaticChainBuilder};
pub use engine::{CoreEngineFactory, CoreProcessEngine, TunnelEngine, TunnelEngineFactory};
pub use error::{
    BridgeError, BridgeResult, EngineError, EngineResult, InstanceError, InstanceResult,
    InstanceState, ProcessError, ProcessResult,
};
pub use instance::{HopSpec, InstanceOrchestrator, InstanceServices, InstanceSettings};
pub use process::{
    GuardedPoolFactory, GuardedProcessPool, ProcessHandle, ProcessPool, ProcessPoolFactory,
    ProcessSettings,
};
pub use protocol::{
    ExternalConfigBean, NaiveBean, NativeBean, PluginLaunch, ProtocolBean, ShadowQuicBean,
};
pub use sub_engine::{CommandSubEngineFactory, SubEngine, SubEngineFactory, SubEngineTemplate};
pub use trust::{RootCaProvider, TrustStore};
pub use ui::UiExecutor;
