/// Control-flow signal raised by `redirect`, `forward`, or a conditional
/// header match. Ends the current action successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSignal {
    target: Option<String>,
}

impl RedirectSignal {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }

    /// Signal for a client copy that is still current.
    pub fn not_modified() -> Self {
        Self { target: None }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_not_modified(&self) -> bool {
        self.target.is_none()
    }
}

impl std::fmt::Display for RedirectSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(f, "redirect to {}", target),
            None => write!(f, "not modified"),
        }
    }
}

impl std::error::Error for RedirectSignal {}
