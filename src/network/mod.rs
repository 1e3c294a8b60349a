pub mod protocol;

pub use protocol::{ProduceRecord, ProduceRequest, Request, Response};
