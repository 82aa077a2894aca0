//! # courier-llm
//!
//! Provider gateway for the Courier agent. One trait per backend
//! ([`Provider`]), one policy layer on top ([`ProviderGateway`]) that owns
//! per-call timeouts, bounded retry with exponential backoff, and error
//! classification: transient failures retry, cancellation propagates as
//! cancellation, everything else surfaces as a recoverable error the agent
//! loop can turn into an error turn.

pub mod gateway;
pub mod http;
pub mod mock;
pub mod provider;

pub use gateway::{GatewayOptions, ProviderGateway};
pub use http::OpenAiCompatProvider;
pub use mock::MockProvider;
pub use provider::{CompletionOutcome, Credentials, Provider, ProviderRequest, ProviderResponse, Usage};
