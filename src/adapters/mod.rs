pub mod game_rest;
pub mod webhook;

pub use game_rest::GameRestClient;
pub use webhook::{format_summary, WebhookNotifier};
