use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{BoxError, Error, Result};
use crate::logger::{default_logger, Component, ComponentLogger, Logger};
use crate::normalize::ParamNormalizer;
use crate::request::ConsumerRequest;
use crate::result::ProducerResult;

/// The future returned by a [`RequestPairedProducer`].
pub type ProducerFuture<C> = BoxFuture<'static, Result<ProducerResult<C>>>;

type ProduceFn<C> = dyn Fn(ConsumerRequest) -> ProducerFuture<C> + Send + Sync;
type CacheablePredicate = dyn Fn(&ConsumerRequest) -> bool + Send + Sync;

/// What to do when a producer varies on params the request did not supply.
///
/// Either way, such params are recorded as missing on the entry, so only
/// requests that also omit them will match it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaryPolicy {
  /// Accept silently.
  Allow,
  /// Accept and log a warning.
  #[default]
  Warn,
  /// Fail the production with [`Error::UndeclaredVary`].
  Reject,
}

/// Options for [`wrap_producer`].
#[derive(Clone)]
pub struct WrapProducerOptions {
  is_cacheable: Option<Arc<CacheablePredicate>>,
  vary_policy: VaryPolicy,
  logger: Arc<dyn Logger>,
}

impl Default for WrapProducerOptions {
  fn default() -> Self {
    Self {
      is_cacheable: None,
      vary_policy: VaryPolicy::default(),
      logger: default_logger(),
    }
  }
}

impl fmt::Debug for WrapProducerOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WrapProducerOptions")
      .field("is_cacheable", &self.is_cacheable.is_some())
      .field("vary_policy", &self.vary_policy)
      .finish_non_exhaustive()
  }
}

impl WrapProducerOptions {
  /// Requests for which `predicate` returns false skip the cache entirely.
  pub fn is_cacheable<F>(mut self, predicate: F) -> Self
  where
    F: Fn(&ConsumerRequest) -> bool + Send + Sync + 'static,
  {
    self.is_cacheable = Some(Arc::new(predicate));
    self
  }

  pub fn vary_policy(mut self, policy: VaryPolicy) -> Self {
    self.vary_policy = policy;
    self
  }

  pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
    self.logger = logger;
    self
  }
}

struct Inner<C> {
  produce: Box<ProduceFn<C>>,
  is_cacheable: Option<Arc<CacheablePredicate>>,
  vary_policy: VaryPolicy,
  logger: ComponentLogger,
}

/// A producer in canonical form: every result it yields carries the id of
/// the request it answered, and a vary list checked against that request.
pub struct RequestPairedProducer<C> {
  inner: Arc<Inner<C>>,
}

impl<C> Clone for RequestPairedProducer<C> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<C> fmt::Debug for RequestPairedProducer<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RequestPairedProducer")
      .field("vary_policy", &self.inner.vary_policy)
      .finish_non_exhaustive()
  }
}

/// Adapts a producer function into a [`RequestPairedProducer`].
///
/// The function's error type only needs to convert into a boxed error; it
/// reaches callers as [`Error::Producer`] with the original as its source.
pub fn wrap_producer<C, F, Fut, E>(produce: F, options: WrapProducerOptions) -> RequestPairedProducer<C>
where
  C: Send + 'static,
  F: Fn(ConsumerRequest) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = std::result::Result<ProducerResult<C>, E>> + Send + 'static,
  E: Into<BoxError>,
{
  let produce = move |request: ConsumerRequest| -> ProducerFuture<C> {
    produce(request).map(|result| result.map_err(Error::producer)).boxed()
  };
  RequestPairedProducer {
    inner: Arc::new(Inner {
      produce: Box::new(produce),
      is_cacheable: options.is_cacheable,
      vary_policy: options.vary_policy,
      logger: ComponentLogger::new(Component::WrapProducer, options.logger),
    }),
  }
}

impl<C> RequestPairedProducer<C>
where
  C: Send + 'static,
{
  /// Whether results for `request` may be cached.
  pub fn is_cacheable(&self, request: &ConsumerRequest) -> bool {
    self.inner.is_cacheable.as_ref().map_or(true, |predicate| predicate(request))
  }

  /// Invokes the producer and completes its result. Vary names are checked
  /// against the request's params as supplied.
  pub fn call(&self, request: ConsumerRequest) -> ProducerFuture<C> {
    self.call_with(request, &ParamNormalizer::default())
  }

  /// Like [`call`](Self::call), but checks vary names against the request's
  /// params after `normalizer` has canonicalized both.
  pub fn call_with(&self, request: ConsumerRequest, normalizer: &ParamNormalizer) -> ProducerFuture<C> {
    let inner = self.inner.clone();
    let id = request.id.clone();
    let supplied = normalizer.normalize(&request.params);
    let normalizer = normalizer.clone();
    let produced = (inner.produce)(request);

    async move {
      let mut result = produced.await?;
      if result.id.is_none() {
        result.id = Some(id.clone());
      }

      let declared = normalizer.normalize_vary(result.vary.as_slice());
      let missing: Vec<String> = declared
        .iter()
        .filter(|name| !supplied.contains(name))
        .map(str::to_owned)
        .collect();
      if !missing.is_empty() {
        match inner.vary_policy {
          VaryPolicy::Allow => {}
          VaryPolicy::Warn => inner.logger.warn(
            "Producer varies on params missing from the request, treating them as missing.",
            json!({ "id": id, "params": missing }),
          ),
          VaryPolicy::Reject => {
            return Err(Error::UndeclaredVary { id, params: missing });
          }
        }
      }
      Ok(result)
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::logger::{Level, NoopLogger};
  use parking_lot::Mutex;
  use std::time::Duration;

  fn producer(policy: VaryPolicy) -> RequestPairedProducer<&'static str> {
    wrap_producer(
      |_request: ConsumerRequest| async {
        Ok::<_, Error>(ProducerResult::new("hi", Duration::from_secs(1)).vary_on(["locale"]))
      },
      WrapProducerOptions::default()
        .vary_policy(policy)
        .logger(Arc::new(NoopLogger)),
    )
  }

  #[tokio::test]
  async fn fills_missing_id_from_request() {
    let result = producer(VaryPolicy::Allow)
      .call(ConsumerRequest::new("user:42").param("locale", "en"))
      .await
      .unwrap();
    assert_eq!(result.id.as_deref(), Some("user:42"));
  }

  #[tokio::test]
  async fn keeps_id_set_by_producer() {
    let producer = wrap_producer(
      |_request: ConsumerRequest| async {
        Ok::<_, Error>(ProducerResult::new(1u8, Duration::from_secs(1)).id("canonical"))
      },
      WrapProducerOptions::default(),
    );
    let result = producer.call(ConsumerRequest::new("alias")).await.unwrap();
    assert_eq!(result.id.as_deref(), Some("canonical"));
  }

  #[tokio::test]
  async fn reject_policy_fails_on_unsupplied_vary() {
    let error = producer(VaryPolicy::Reject)
      .call(ConsumerRequest::new("user:42"))
      .await
      .unwrap_err();
    match error {
      Error::UndeclaredVary { id, params } => {
        assert_eq!(id, "user:42");
        assert_eq!(params, vec!["locale".to_string()]);
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }

  #[tokio::test]
  async fn vary_check_uses_normalized_names() {
    let normalizer = ParamNormalizer::new().with_name_fn(|name| name.to_ascii_lowercase());
    let result = producer(VaryPolicy::Reject)
      .call_with(ConsumerRequest::new("user:42").param("Locale", "en"), &normalizer)
      .await
      .unwrap();
    assert_eq!(result.content, "hi");

    let error = producer(VaryPolicy::Reject)
      .call(ConsumerRequest::new("user:42").param("Locale", "en"))
      .await
      .unwrap_err();
    assert!(matches!(error, Error::UndeclaredVary { .. }));
  }

  #[tokio::test]
  async fn warn_policy_logs_and_keeps_result() {
    let warnings = Arc::new(Mutex::new(Vec::new()));
    let sink = warnings.clone();
    let producer = wrap_producer(
      |_request: ConsumerRequest| async {
        Ok::<_, Error>(ProducerResult::new("hi", Duration::from_secs(1)).vary_on(["locale"]))
      },
      WrapProducerOptions::default().logger(Arc::new(
        move |component: Component, level: Level, message: &str, _: Option<&serde_json::Value>| {
          if level == Level::Warn {
            sink.lock().push((component, message.to_owned()));
          }
        },
      )),
    );

    let result = producer
      .call(ConsumerRequest::new("user:42").param("locale", serde_json::Value::Null))
      .await
      .unwrap();
    assert_eq!(result.vary, vec!["locale".to_string()]);
    let warnings = warnings.lock();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].0, Component::WrapProducer);
  }

  #[tokio::test]
  async fn producer_errors_keep_their_source() {
    let producer = wrap_producer(
      |_request: ConsumerRequest| async {
        Err::<ProducerResult<()>, _>(std::io::Error::new(std::io::ErrorKind::Other, "db down"))
      },
      WrapProducerOptions::default(),
    );
    let error = producer.call(ConsumerRequest::new("x")).await.unwrap_err();
    assert_eq!(error.producer_error().map(ToString::to_string).as_deref(), Some("db down"));
  }

  #[test]
  fn cacheable_predicate_defaults_to_true() {
    let always = producer(VaryPolicy::Allow);
    assert!(always.is_cacheable(&ConsumerRequest::new("x")));

    let never = wrap_producer(
      |_request: ConsumerRequest| async {
        Ok::<_, Error>(ProducerResult::new((), Duration::ZERO))
      },
      WrapProducerOptions::default().is_cacheable(|request| !request.id.starts_with("live:")),
    );
    assert!(never.is_cacheable(&ConsumerRequest::new("user:1")));
    assert!(!never.is_cacheable(&ConsumerRequest::new("live:feed")));
  }
}
