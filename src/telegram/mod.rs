mod handler;
pub mod responder;
pub mod types;
pub mod utils;

pub use handler::TelegramService;
pub use responder::TelegramResponder;
