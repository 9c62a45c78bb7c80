#![warn(missing_docs)]

//! Halin live subsystem: cluster members, data feeds, diagnostic collection, cluster administration, CLI

pub mod cli;
pub mod cluster_manager;
pub mod collector;
pub mod config;
pub mod context;
pub mod driver;
pub mod events;
pub mod feed;
pub mod member;
pub mod memory;
pub mod probes;
pub mod query;
pub mod ring;
pub mod settle;

pub use cluster_manager::{ClusterManager, ClusterOperationResult, MemberOutcome, RoleDelta};
pub use collector::{collect_snapshot, node_diagnostics};
pub use config::{ConfigError, HalinConfig};
pub use context::{ContextError, HalinContext};
pub use driver::{Connector, Driver, DriverError, Params, Session};
pub use events::{Event, EventKind, EventLog};
pub use feed::{DataFeed, FeedOptions, FeedUpdate, Sample};
pub use member::{ClusterMember, LatencyStats, MemberIdentity, Performance};
pub use memory::{MemoryConnector, MemoryDriver};
pub use probes::check_components;
pub use query::{Dependency, QueryDefinition, QueryDescriptor, QueryError};
pub use ring::RingBuffer;
pub use settle::{settle, settle_all};
