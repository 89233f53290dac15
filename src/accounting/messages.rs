use serde::Serialize;

/// Collects problems the user should see in the report instead of a crash.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessagesAggregator {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl MessagesAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!("{}", msg);
        self.warnings.push(msg);
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!("{}", msg);
        self.errors.push(msg);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}
