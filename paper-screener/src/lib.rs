pub mod config;
pub mod criteria;
pub mod digest;
pub mod examples;
pub mod fetcher;
pub mod ledger;
pub mod llm;
pub mod parser;
pub mod profile;
pub mod prompt;
pub mod screener;
pub mod sources;
pub mod types;
pub mod utils;

pub use config::{ScreenerConfig, Provider};
pub use digest::DigestAssembler;
pub use examples::ExampleStore;
pub use fetcher::Fetcher;
pub use ledger::{Ledger, LedgerError, LedgerStats, StoredScreening};
pub use llm::{LlmProvider, MockProvider, RetryPolicy, ScreeningClient, ScreeningError};
pub use parser::FeedParser;
pub use prompt::{PromptBuilder, ScreeningRequest};
pub use screener::{PaperScreener, RunReport};
pub use sources::{HttpFeedSource, StaticFeedSource};
pub use types::*;
