pub mod converter;
pub mod provider;
pub mod reliable;

pub mod mock;

pub use mock::{MockProvider, MockResponse};
pub use provider::{OpenAiConfig, OpenAiProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
