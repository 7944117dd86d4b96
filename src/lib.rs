//! Channel identity and ownership for a clustered time-series platform.
//!
//! Each channel is identified by a 32-bit [`Key`] whose upper bits name the
//! node holding its lease and whose lower bits are a key allocated from that
//! node's persistent [`LocalKeyCounter`]. Calculated channels live in a shared
//! free space served by the bootstrapper node.
//!
//! The [`LeaseProxy`] routes create, delete and rename batches to the owning
//! nodes; [`Service`] wraps it with [`Writer`] and [`Retrieve`] handles.
//!
//! ```ignore
//! let service = Service::open(config).await?;
//! let created = service
//!     .writer()
//!     .create(Channel::data("temperature", DataType::Float64, 0), CreateOptions::default())
//!     .await?;
//! let found = service.retrieve().where_names(["temperature"]).exec_one().await?;
//! assert_eq!(found.key(), created.key());
//! ```

pub mod channel;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod counter;
pub mod error;
pub mod index;
pub mod integer_set;
pub mod key;
pub mod metadata;
pub mod names;
pub mod proxy;
pub mod resource;
pub mod router;
pub mod service;
pub mod storage;
pub mod testing;
pub mod transport;

pub use channel::CalculationAnalyzer;
pub use channel::Channel;
pub use channel::DataType;
pub use cluster::HostResolver;
pub use cluster::NodeAddress;
pub use cluster::NodeKey;
pub use config::ChannelConfig;
pub use config::ServiceConfig;
pub use counter::LocalKeyCounter;
pub use error::ChannelError;
pub use error::ErrorKind;
pub use error::Result;
pub use key::Key;
pub use key::LocalKey;
pub use proxy::LeaseProxy;
pub use service::Retrieve;
pub use service::Service;
pub use service::Writer;
pub use storage::StorageChannel;
pub use storage::TsStore;
pub use transport::CreateOptions;
pub use transport::Transport;
