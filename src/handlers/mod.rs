mod health;
mod telegram;

pub use health::health_check;
pub use telegram::telegram_callback;
