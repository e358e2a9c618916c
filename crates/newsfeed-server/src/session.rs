//! Per-stream Session Engine
//!
//! One [`Session`] owns one bidirectional stream. Two tasks cooperate on it:
//!
//! - the **reader loop** (the session driver) reads request envelopes,
//!   walks the registration/subscription state machine, and writes the
//!   matching responses in request order;
//! - the **writer loop**, spawned once after the first successful
//!   registration, polls the durable layer for fresh news in the user's
//!   topic and pushes `news` envelopes until the reader signals the end of
//!   the connection.
//!
//! Both sides write through one mpsc sender; tonic serializes the envelopes
//! on the wire, so responses and pushed news may interleave but never tear.
//!
//! ## Shared session state
//!
//! `current_user_id` transitions empty -> set exactly once, and the writer
//! is only spawned after that transition with its own copy, so the tasks
//! share nothing mutable beyond the `end_of_connection` flag.
//!
//! ## Error discipline
//!
//! Business-rule violations (unregistered action, bad topic/action pairing)
//! travel in the response's `error` field and leave the session open. A
//! protocol violation (response-typed or unknown tag, payload/tag mismatch)
//! or a failed stream write is terminal. Store failures in the reader path
//! map to `internal` responses; in the writer loop they are logged and
//! swallowed so a flaky store cannot tear down a healthy connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use newsfeed_proto::proto::{
    req_envelope::MsgType, GlobalErrorT, News, PostNewsRequest, PostNewsResponse, RegisterRequest,
    RegisterResponse, ReqEnvelope, TopicActionT, TopicRequest, TopicResponse,
};
use newsfeed_store::FeedStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::{Status, Streaming};
use tracing::{debug, error};

pub struct Session {
    store: Arc<FeedStore>,
    polling_interval: Duration,
    tx: mpsc::Sender<Result<ReqEnvelope, Status>>,
    current_user_id: String,
    current_topic: String,
    end_of_connection: Arc<AtomicBool>,
    writer: Option<JoinHandle<Result<(), Status>>>,
}

impl Session {
    pub fn new(
        store: Arc<FeedStore>,
        polling_interval: Duration,
        tx: mpsc::Sender<Result<ReqEnvelope, Status>>,
    ) -> Self {
        Self {
            store,
            polling_interval,
            tx,
            current_user_id: String::new(),
            current_topic: String::new(),
            end_of_connection: Arc::new(AtomicBool::new(false)),
            writer: None,
        }
    }

    /// Drive the session until the client closes its half of the stream or a
    /// terminal error occurs, then wind the writer loop down and surface the
    /// final status.
    pub async fn run(mut self, mut inbound: Streaming<ReqEnvelope>) {
        let reader_status = self.read_loop(&mut inbound).await;

        // No more requests, or the stream broke: ask the writer to finish.
        self.end_of_connection.store(true, Ordering::Release);

        let writer_status = match self.writer.take() {
            Some(handle) => handle.await.unwrap_or_else(|join_err| {
                Err(Status::internal(format!("news writer task failed: {join_err}")))
            }),
            None => Ok(()),
        };

        if let Err(status) = reader_status.and(writer_status) {
            let _ = self.tx.send(Err(status)).await;
        }
    }

    async fn read_loop(&mut self, inbound: &mut Streaming<ReqEnvelope>) -> Result<(), Status> {
        loop {
            let request = match inbound.message().await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(status) => {
                    error!(code = ?status.code(), "failed to read request from stream");
                    return Err(status);
                }
            };

            self.dispatch(request).await?;
        }
    }

    async fn dispatch(&mut self, request: ReqEnvelope) -> Result<(), Status> {
        let tag = MsgType::try_from(request.r#type).map_err(|_| {
            error!(tag = request.r#type, "received a request whose type is unknown");
            Status::unimplemented("unknown message type")
        })?;

        match tag {
            MsgType::RegisterRequestT => {
                let message = request.reg_req.ok_or_else(|| uncompliant_payload(tag))?;
                self.handle_register(message).await
            }
            MsgType::TopicRequestT => {
                let message = request.topic_req.ok_or_else(|| uncompliant_payload(tag))?;
                self.handle_topic(message).await
            }
            MsgType::PostNewsRequestT => {
                let message = request.post_req.ok_or_else(|| uncompliant_payload(tag))?;
                self.handle_post_news(message).await
            }
            MsgType::RegisterResponseT | MsgType::TopicResponseT | MsgType::PostNewsResponseT => {
                error!(?tag, "received a request whose type is unexpected");
                Err(Status::failed_precondition("unexpected message type"))
            }
            MsgType::NewsT => {
                error!(?tag, "received a request whose type is not handled");
                Err(Status::unimplemented("unknown message type"))
            }
        }
    }

    async fn handle_register(&mut self, message: RegisterRequest) -> Result<(), Status> {
        debug!(user_id = %message.user_id, "received register request");

        let mut error = GlobalErrorT::Ok;
        let mut topic = String::new();

        if !self.current_user_id.is_empty() {
            error!("could not register user: only one registration per session is allowed");
            error = GlobalErrorT::Internal;
        } else {
            match self.store.get_or_create_user(&message.user_id).await {
                Ok(current_topic) => {
                    topic = current_topic;
                    self.current_user_id = message.user_id;
                    self.current_topic = topic.clone();
                }
                Err(err) => {
                    error!(error = %err, "failed to register user");
                    error = GlobalErrorT::Internal;
                }
            }
        }

        let envelope = ReqEnvelope {
            r#type: MsgType::RegisterResponseT as i32,
            reg_resp: Some(RegisterResponse {
                error: error as i32,
                topic: topic.clone(),
            }),
            ..Default::default()
        };
        self.send(envelope, "respond registration request").await?;

        // The news pusher starts once, right after the registration that
        // gave the session its user.
        if error == GlobalErrorT::Ok && self.writer.is_none() {
            self.spawn_writer();
        }

        Ok(())
    }

    async fn handle_topic(&mut self, message: TopicRequest) -> Result<(), Status> {
        let action = message.action();
        debug!(?action, topic = %message.topic, "received topic request");

        let mut error = GlobalErrorT::Ok;

        if self.current_user_id.is_empty() {
            error!("failed to change topic: user is not registered");
            error = GlobalErrorT::NotRegistered;
        } else if action == TopicActionT::Subscribe && message.topic.is_empty() {
            error!("failed to change topic: no topic has been specified");
            error = GlobalErrorT::Internal;
        } else if action == TopicActionT::Unsubscribe && !message.topic.is_empty() {
            error!("failed to change topic: must not specify a topic when unsubscribing");
            error = GlobalErrorT::Internal;
        }

        if error == GlobalErrorT::Ok {
            let new_topic = if action == TopicActionT::Subscribe {
                message.topic.clone()
            } else {
                String::new()
            };

            match self.store.set_user_topic(&self.current_user_id, &new_topic).await {
                Ok(()) => self.current_topic = new_topic,
                Err(err) => {
                    error!(error = %err, "failed to change topic");
                    error = GlobalErrorT::Internal;
                }
            }
        }

        let envelope = ReqEnvelope {
            r#type: MsgType::TopicResponseT as i32,
            topic_resp: Some(TopicResponse {
                error: error as i32,
                action: action as i32,
            }),
            ..Default::default()
        };
        self.send(envelope, "respond topic change request").await
    }

    async fn handle_post_news(&mut self, message: PostNewsRequest) -> Result<(), Status> {
        debug!(news = %message.news, "received post news request");

        let mut error = GlobalErrorT::Ok;

        if self.current_user_id.is_empty() {
            error!("failed to post news: user is not registered");
            error = GlobalErrorT::NotRegistered;
        } else if self.current_topic.is_empty() {
            error!("failed to post news: user is not subscribing to any topic");
            error = GlobalErrorT::Internal;
        }

        if error == GlobalErrorT::Ok {
            if let Err(err) = self
                .store
                .post_news(&self.current_topic, &self.current_user_id, &message.news)
                .await
            {
                error!(error = %err, "failed to post news");
                error = GlobalErrorT::Internal;
            }
        }

        let envelope = ReqEnvelope {
            r#type: MsgType::PostNewsResponseT as i32,
            post_resp: Some(PostNewsResponse { error: error as i32 }),
            ..Default::default()
        };
        self.send(envelope, "respond post news request").await
    }

    async fn send(&self, envelope: ReqEnvelope, context: &str) -> Result<(), Status> {
        if self.tx.send(Ok(envelope)).await.is_err() {
            error!(context, "failed to write message on stream");
            return Err(Status::unknown("failed to write message on stream"));
        }
        Ok(())
    }

    fn spawn_writer(&mut self) {
        self.writer = Some(tokio::spawn(send_available_news(
            self.store.clone(),
            self.current_user_id.clone(),
            self.end_of_connection.clone(),
            self.tx.clone(),
            self.polling_interval,
        )));
    }
}

fn uncompliant_payload(tag: MsgType) -> Status {
    error!(?tag, "request payload is uncompliant with its message type");
    Status::invalid_argument("request payload is uncompliant with message type")
}

/// Writer loop: push any available news in the user's subscribed topic back
/// to the client, then sleep, until the reader signals end of connection.
async fn send_available_news(
    store: Arc<FeedStore>,
    user_id: String,
    end_of_connection: Arc<AtomicBool>,
    tx: mpsc::Sender<Result<ReqEnvelope, Status>>,
    polling_interval: Duration,
) -> Result<(), Status> {
    while !end_of_connection.load(Ordering::Acquire) {
        match store.fetch_news_since(&user_id).await {
            Ok(news) => {
                for entry in news {
                    let envelope = ReqEnvelope {
                        r#type: MsgType::NewsT as i32,
                        news_data: Some(News { data: entry }),
                        ..Default::default()
                    };
                    if tx.send(Ok(envelope)).await.is_err() {
                        error!("failed to write message on stream while sending news");
                        return Err(Status::unknown("failed to write message on stream"));
                    }
                }
            }
            // Store trouble is transient; keep the session and keep polling.
            Err(err) => error!(error = %err, user_id = %user_id, "failed to fetch news"),
        }

        tokio::time::sleep(polling_interval).await;
    }

    Ok(())
}
