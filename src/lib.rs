//! # nimsforest-core
//!
//! Event-driven orchestration core: Wind, River, Soil, Humus, Tree, Nim, and
//! the Decomposer, riding NATS core pub/sub and JetStream.
//!
//! ## Overview
//!
//! - **Wind** — ephemeral, wildcard pub/sub of Leaves. At-most-once.
//! - **River** — durable ingress stream of raw payloads. At-least-once.
//! - **Humus** — durable, strictly-ordered log of state-change proposals.
//! - **Soil** — key/value store of current state with optimistic concurrency.
//! - **Tree** — stateless parser from River records to Leaves.
//! - **Nim** — business logic consuming Leaves, emitting Leaves and Composts.
//! - **Decomposer** — applies Humus records to Soil in slot order.
//!
//! `Runtime` wires all of these onto one broker connection; `Runtime::in_memory`
//! gives the same contract without one, for tests and embedding.
//!
//! ## Quick Start
//!
//! ```rust
//! use nimsforest_core::Runtime;
//!
//! # async fn example() -> nimsforest_core::Result<()> {
//! let runtime = Runtime::in_memory();
//! runtime.start().await?;
//! runtime.river.flow("river.example", "hello".into()).await?;
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decomposer;
pub mod error;
pub mod humus;
pub mod leaf;
pub mod lifecycle;
pub mod metrics;
pub mod nim;
pub mod river;
pub mod runtime;
pub mod soil;
pub mod subject;
pub mod tree;
pub mod wind;

pub use config::{BrokerConfig, StorageType};
pub use decomposer::Decomposer;
pub use error::{CoreError, Result};
pub use humus::{Compost, CompostAction, Humus};
pub use leaf::Leaf;
pub use lifecycle::{Consumer, Subscription};
pub use metrics::{Metrics, MetricsSnapshot};
pub use nim::{NimContext, NimLogic, NimRuntime};
pub use river::{River, RiverRecord};
pub use runtime::Runtime;
pub use soil::{Soil, SoilChange, SoilEntry, SoilOp};
pub use tree::{TreeLogic, TreeRuntime};
pub use wind::Wind;
