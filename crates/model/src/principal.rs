use parking_lot::Mutex;

/// The authenticated (or anonymous session) identity a request runs as.
///
/// Carries a pending display message that survives a redirect and is shown
/// on the principal's next request.
#[derive(Debug)]
pub struct Principal {
    id: String,
    message: Mutex<Option<String>>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_message(&self, message: Option<String>) {
        *self.message.lock() = message;
    }

    /// Remove and return the pending message.
    pub fn take_message(&self) -> Option<String> {
        self.message.lock().take()
    }

    /// Put back a message taken by a request that never finished, unless a
    /// newer one arrived meanwhile.
    pub fn restore_message(&self, message: String) {
        let mut pending = self.message.lock();
        if pending.is_none() {
            *pending = Some(message);
        }
    }

    pub fn peek_message(&self) -> Option<String> {
        self.message.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_taken_once() {
        let principal = Principal::new("alice");
        principal.set_message(Some("Saved".into()));
        assert_eq!(principal.peek_message().as_deref(), Some("Saved"));
        assert_eq!(principal.take_message().as_deref(), Some("Saved"));
        assert_eq!(principal.take_message(), None);
    }

    #[test]
    fn restore_keeps_a_newer_message() {
        let principal = Principal::new("alice");
        principal.restore_message("Old".into());
        assert_eq!(principal.peek_message().as_deref(), Some("Old"));
        principal.set_message(Some("New".into()));
        principal.restore_message("Old".into());
        assert_eq!(principal.take_message().as_deref(), Some("New"));
    }
}
