pub mod http_feed;
pub mod static_feed;

pub use http_feed::HttpFeedSource;
pub use static_feed::StaticFeedSource;
