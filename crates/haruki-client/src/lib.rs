//! # haruki-client
//!
//! Outbound calls towards the game and its satellites: the impersonating
//! inherit client with its data retriever, the sekai-API account check, and
//! the transparent game API forwarder behind the iOS proxy surface.

pub mod error;
pub mod game_proxy;
pub mod http;
pub mod inherit;
pub mod sekai_api;
pub mod retriever;

pub use error::ClientError;
pub use game_proxy::{GameProxy, ProxiedResponse};
pub use http::build_http_client;
pub use inherit::{InheritClient, InheritCredentials, InheritSettings};
pub use sekai_api::{AccountStatus, SekaiApiClient};
pub use retriever::{DataRetriever, RetrievedData};
