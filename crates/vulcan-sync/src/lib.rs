//! Vulcan sync - push project routing configuration to a Vulcan control plane
//!
//! The admin API is only reachable from inside the private network, so a
//! run normally discovers a gateway instance behind a load balancer, opens
//! an SSH tunnel to it and upserts every project's backend, frontend and
//! middlewares through that tunnel. With an explicit base URL the tunnel is
//! skipped.

pub mod admin;
pub mod aws;
pub mod driver;
pub mod error;
pub mod executor;
pub mod selector;
pub mod settings;
pub mod spec;
pub mod store;
pub mod tunnel;

pub use admin::{AdminClient, VctlClient, UPSERT_CAPABILITY};
pub use aws::AwsCli;
pub use driver::{fatal_notice, Command, Mode, Orchestrator, RunReport};
pub use error::{Result, SyncError, EXIT_FAILURE};
pub use executor::{SyncExecutor, SyncFailure, SyncResult};
pub use selector::{
    GatewaySelector, Instance, InstanceMetadata, InstancePool, LoadBalancerInventory,
};
pub use settings::{
    ConfigManager, FileConfig, Settings, DEFAULT_READY_TIMEOUT, LOCAL_PORT, POLL_INTERVAL,
    REMOTE_PORT,
};
pub use spec::{ProjectSyncSpec, SpecArg, SpecArgs, TargetKind};
pub use store::SpecStore;
pub use tunnel::{
    PortProbe, SshSpawner, TcpProbe, TunnelHandle, TunnelManager, TunnelProcess, TunnelSpawner,
    TunnelSpec, TunnelState,
};
