//! Out-of-band delivery of generated credentials.
//!
//! Delivery is an external collaborator: the daemon hands the clear-text
//! password to a notifier and never returns it to the caller.

pub trait CredentialNotifier {
    fn deliver(&self, recipient_email: &str, full_name: &str, password: &str);
}

/// Stand-in transport until a mail relay is wired up. The password itself is
/// only emitted at debug level.
pub struct LogNotifier;

impl CredentialNotifier for LogNotifier {
    fn deliver(&self, recipient_email: &str, full_name: &str, password: &str) {
        log::info!(
            "delivering generated credentials to {} <{}>",
            full_name,
            recipient_email
        );
        log::debug!("generated password for {}: {}", recipient_email, password);
    }
}
