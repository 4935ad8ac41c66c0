pub mod defs;
pub mod digest;
pub mod traits;

pub use defs::{
    ConfiguredFeed, CriteriaResult, EntryId, FeedEntry, FeedGroup, Judgment, LedgerRecord, PaperSummary, Polarity,
    ScreeningExample, ScreeningVerdict,
};
pub use digest::{Digest, DigestItem, DigestSection, DigestStats};
pub use traits::{DigestDelivery, FeedSource};
