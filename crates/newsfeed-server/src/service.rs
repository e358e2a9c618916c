//! gRPC Service Facade
//!
//! Accepts each incoming `Talk` stream and hands it to a fresh
//! [`Session`](crate::session::Session). All per-connection state lives in
//! the session; the facade only carries the shared service bundle.

use std::sync::Arc;
use std::time::Duration;

use newsfeed_proto::proto::newsfeed_server::Newsfeed;
use newsfeed_proto::proto::ReqEnvelope;
use newsfeed_store::FeedStore;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::session::Session;

/// Capacity of the per-stream response channel.
const STREAM_BUFFER: usize = 16;

pub struct NewsfeedService {
    store: Arc<FeedStore>,
    polling_interval: Duration,
}

impl NewsfeedService {
    pub fn new(store: Arc<FeedStore>, polling_interval: Duration) -> Self {
        Self {
            store,
            polling_interval,
        }
    }
}

#[tonic::async_trait]
impl Newsfeed for NewsfeedService {
    type TalkStream = ReceiverStream<Result<ReqEnvelope, Status>>;

    #[tracing::instrument(skip(self, request))]
    async fn talk(
        &self,
        request: Request<Streaming<ReqEnvelope>>,
    ) -> Result<Response<Self::TalkStream>, Status> {
        tracing::info!(peer = ?request.remote_addr(), "accepted news feed stream");

        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let session = Session::new(self.store.clone(), self.polling_interval, tx);
        tokio::spawn(session.run(inbound));

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
