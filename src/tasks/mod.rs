pub mod pipeline;
pub mod processor;
pub mod retry;
