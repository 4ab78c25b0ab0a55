//! A transport-agnostic caching engine with HTTP-cache-like semantics.
//!
//! `fibre_revalidate` sits in front of expensive producer functions, such as
//! database queries or remote calls, and gives them freshness windows, tiered
//! staleness tolerance, content negotiation over request params ("vary") and
//! background revalidation. Concurrent requests for the same value never cause
//! more than one concurrent producer call.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use fibre_revalidate::{
//!   wrap_producer, Cache, ConsumerRequest, Error, MaxStale, MemoryStore, ProducerResult,
//!   WrapProducerOptions,
//! };
//!
//! # async fn run() -> fibre_revalidate::Result<()> {
//! let producer = wrap_producer(
//!   |request: ConsumerRequest| async move {
//!     let locale = request.params.get("locale").and_then(|v| v.as_str()).unwrap_or("en");
//!     let greeting = if locale == "fr" { "Salut" } else { "Hi" };
//!     Ok::<_, Error>(
//!       ProducerResult::new(greeting.to_string(), Duration::from_secs(1))
//!         .vary_on(["locale"])
//!         .max_stale(MaxStale::while_revalidating(Duration::from_secs(10))),
//!     )
//!   },
//!   WrapProducerOptions::default(),
//! );
//!
//! let cache = Cache::new(MemoryStore::new(), producer);
//! let response = cache.get(ConsumerRequest::new("user:42").param("locale", "fr")).await?;
//! assert_eq!(response.content(), "Salut");
//! cache.close(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The engine requires a tokio runtime: coalesced producer calls, background
//! revalidations and timers all run as tokio tasks.

pub mod builder;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod logger;
mod metrics;
pub mod normalize;
pub mod producer;
pub mod request;
pub mod result;
pub mod store;
pub mod task;
pub mod time;

pub use builder::CacheBuilder;
pub use cache::{Cache, CacheResponse, CacheStatus};
pub use config::{CacheConfig, MemoryStoreConfig};
pub use entry::{Entry, Freshness};
pub use error::{BoxError, BuildError, ConfigError, Error, Result};
pub use logger::{Component, Level, Logger, NoopLogger, TracingLogger};
pub use metrics::MetricsSnapshot;
pub use normalize::{NormalizedParams, NormalizedVary, ParamNormalizer, VaryKeys};
pub use producer::{wrap_producer, RequestPairedProducer, VaryPolicy, WrapProducerOptions};
pub use request::{ConsumerDirectives, ConsumerRequest, Params};
pub use result::{MaxStale, ProducerDirectives, ProducerResult, Validators};
pub use store::{EvictionListener, EvictionReason, MemoryStore, Store};
pub use task::{CollapsedTaskCreator, TimerHandle, TimerSet};
pub use time::{Clock, ManualClock, SystemClock};
