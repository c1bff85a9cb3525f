use crate::health::HealthCheck;

/// Everything the registry needs to create or overwrite one instance entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check: HealthCheck,
}

impl Registration {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            check: HealthCheck::default(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.check = check;
        self
    }

    /// Local sanity check; returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("service id cannot be empty".into());
        }
        if self.name.trim().is_empty() {
            return Err("service name cannot be empty".into());
        }
        if self.port == 0 {
            return Err(format!("service '{}' has port 0", self.id));
        }
        let addr = self.address.as_str();
        if addr.is_empty() || addr.contains("://") || addr.chars().any(char::is_whitespace) {
            return Err(format!("malformed address '{addr}'"));
        }
        Ok(())
    }
}
