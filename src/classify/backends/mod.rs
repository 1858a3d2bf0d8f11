mod http;
mod stub;

pub use http::HttpScorer;
pub use stub::StubScorer;
