pub mod parser;
pub mod worker_client;

pub use parser::*;
pub use worker_client::*;
