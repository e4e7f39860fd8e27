pub mod client;

pub use client::{classify_response, looks_like_html, ApiExecutor, AuthStrategy, EndpointOutcome};
