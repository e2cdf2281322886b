// External capabilities: transports and text generation. One trait per
// capability, one implementation per provider, selected at startup.

pub mod email;
pub mod generation;
pub mod sms;

pub use email::{EmailTransport, SmtpMailer};
pub use generation::{ContentGenerator, HttpGenerator};
pub use sms::{HttpSmsGateway, SmsTransport};
