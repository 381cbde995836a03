use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use governor::clock::{QuantaClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub type Throttle = RateLimiter<
    NotKeyed,
    InMemoryState,
    QuantaClock,
    NoOpMiddleware<QuantaInstant>,
>;

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("At least one RPC endpoint is required")]
    NoEndpoints,
}

/// A JSON-RPC client that spreads requests over several endpoints.
///
/// Every request goes to an endpoint picked uniformly at random. An optional
/// throttle caps the combined request rate across all endpoints.
#[derive(Clone, Debug)]
pub struct RotatingClient<P: JsonRpcClient> {
    clients: Arc<[P]>,
    throttle: Option<Arc<Throttle>>,
    jitter: Option<Jitter>,
}

impl<P: JsonRpcClient> RotatingClient<P> {
    pub fn new(clients: Vec<P>) -> Result<Self, RotationError> {
        if clients.is_empty() {
            return Err(RotationError::NoEndpoints);
        }

        Ok(Self {
            clients: clients.into(),
            throttle: None,
            jitter: None,
        })
    }

    /// Limits the combined request rate of all endpoints
    pub fn with_throttle(
        mut self,
        requests_per_second: NonZeroU32,
        jitter: Option<Jitter>,
    ) -> Self {
        self.throttle = Some(Arc::new(RateLimiter::direct(Quota::per_second(
            requests_per_second,
        ))));
        self.jitter = jitter;
        self
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn pick_index(&self) -> usize {
        rand::thread_rng().gen_range(0..self.clients.len())
    }

    fn pick(&self) -> &P {
        &self.clients[self.pick_index()]
    }
}

#[async_trait]
impl<P: JsonRpcClient> JsonRpcClient for RotatingClient<P> {
    type Error = P::Error;

    /// Sends the request to a randomly chosen endpoint, waiting on the
    /// throttle first if one is configured
    async fn request<T, R>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, Self::Error>
    where
        T: std::fmt::Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        if let Some(throttle) = &self.throttle {
            match self.jitter {
                Some(jitter) => throttle.until_ready_with_jitter(jitter).await,
                None => throttle.until_ready().await,
            }
        }

        self.pick().request(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ethers::providers::MockProvider;
    use ethers::types::U64;

    use super::*;

    #[test]
    fn rejects_empty_endpoint_list() {
        let rotation = RotatingClient::<MockProvider>::new(vec![]);

        assert!(matches!(rotation, Err(RotationError::NoEndpoints)));
    }

    #[test]
    fn picks_every_endpoint_eventually() {
        let rotation = RotatingClient::new(vec![
            MockProvider::new(),
            MockProvider::new(),
        ])
        .unwrap();

        let picked: HashSet<usize> =
            (0..256).map(|_| rotation.pick_index()).collect();

        assert_eq!(picked, HashSet::from([0, 1]));
    }

    #[tokio::test]
    async fn forwards_request_to_endpoint() {
        let mock = MockProvider::new();
        mock.push(U64::from(12)).unwrap();

        let rotation = RotatingClient::new(vec![mock.clone()])
            .unwrap()
            .with_throttle(NonZeroU32::new(10).unwrap(), None);

        let block: U64 = rotation.request("eth_blockNumber", ()).await.unwrap();

        assert_eq!(block, U64::from(12));
    }
}
