//! These models represent the objects passed around by the proxy
//!
//! There are several different related formats we need to interact with:
//! - openai chat messages, sent from the client to the proxy and on to the LLM
//! - openai completion chunks, streamed from the LLM and re-emitted to the client
//! - image stream events, streamed from the image provider
//!
//! Message content is resolved into explicit enums once, when the request is
//! deserialized, and never re-sniffed afterwards.
pub mod chunk;
pub mod content;
pub mod message;
pub mod tool;
