#![forbid(unsafe_code)]

//! Observable state containers for single-threaded, event-loop driven apps.
//!
//! - [`StateContainer`]: a value plus its computation status (idle, waiting,
//!   data, error), mutated synchronously or through futures and streams.
//! - [`ObserverRegistry`]: ordered, tag-filtered notification fan-out.
//! - [`InstanceRegistry`]: one singleton and any number of seeded instances
//!   per key, coupled by a [`JoinPolicy`].
//! - [`Executor`]: the cooperative executor delayed mutations settle on,
//!   with a manual clock for tests.
//!
//! The library emits `tracing` events and never installs a subscriber.

pub mod config;
pub mod container;
pub mod error;
pub mod executor;
pub mod observer;
pub mod registry;
pub mod snapshot;

pub use config::StateConfig;
pub use container::{
    CallJoin, ContainerBuilder, ContainerRole, Injection, MutateOptions, Mutation, Source,
    SourceKind, StateContainer, Watch, WeakContainer,
};
pub use error::{BoxError, CapturedError, Result, StateError};
pub use executor::{Executor, Sleep, SpawnError, Spawner};
pub use observer::{ContainerId, ObserverHandle, ObserverRegistry, Subscription, Tag, TagFilter};
pub use registry::{EntityKey, InstanceRegistry, JoinPolicy, Seed, combine_statuses};
pub use snapshot::{Snapshot, Status, WhenStatus};
