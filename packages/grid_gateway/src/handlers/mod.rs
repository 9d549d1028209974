mod health;
mod messaging;

pub use health::{health_handler, health_live_handler};
pub use messaging::{SENT_MESSAGE, send_handler, streaming_handler};
