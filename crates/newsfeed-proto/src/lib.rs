//! News Feed Protocol Buffer Definitions
//!
//! This crate contains the gRPC service definition and message types for the
//! news feed service. The whole protocol is one bidirectional streaming
//! method, `Talk`, carrying `req_envelope` messages in both directions.
//!
//! ## Envelope discipline
//!
//! An envelope holds a `msg_type` tag and exactly one populated payload
//! field. The server only ever accepts request payloads and replies with
//! response payloads; `news` payloads are pushed server to client.
//!
//! ## Usage
//!
//! ### Client-side
//!
//! ```ignore
//! use newsfeed_proto::proto::{
//!     newsfeed_client::NewsfeedClient, req_envelope::MsgType,
//!     RegisterRequest, ReqEnvelope,
//! };
//!
//! let mut client = NewsfeedClient::connect("http://localhost:8080").await?;
//!
//! let register = ReqEnvelope {
//!     r#type: MsgType::RegisterRequestT as i32,
//!     reg_req: Some(RegisterRequest { user_id: "alice".to_string() }),
//!     ..Default::default()
//! };
//! ```
//!
//! ### Server-side
//!
//! ```ignore
//! use newsfeed_proto::proto::{
//!     newsfeed_server::{Newsfeed, NewsfeedServer},
//!     ReqEnvelope,
//! };
//! ```

/// Generated types for the `newsfeed.proto` package.
pub mod proto {
    tonic::include_proto!("newsfeed.proto");

    /// Descriptor set for the gRPC reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("newsfeed_descriptor");
}
