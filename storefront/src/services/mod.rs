// storefront/src/services/mod.rs

pub mod khalti;
pub mod notifier;

pub use khalti::{KhaltiClient, PaymentGateway};
pub use notifier::{LogNotifier, Notifier, SmtpNotifier};
