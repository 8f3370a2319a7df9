//! Device descriptors.

/// One hop of a chain.
///
/// Immutable once loaded. Inventory order is hop order: device `i + 1` is
/// reached from device `i`'s shell. Credentials are not part of the
/// descriptor; they come from a [`CredentialProvider`](crate::CredentialProvider).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Unique key, used for archive paths and reporting.
    pub name: String,

    /// Address as seen from the previous hop (or from here for the first).
    pub address: String,

    pub port: u16,

    pub username: String,

    /// Hostname the device's prompt carries, if it differs from `name`.
    pub hostname: Option<String>,
}

impl DeviceSpec {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: 22,
            username: username.into(),
            hostname: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Hostname used to confirm arrival at this device.
    pub fn expected_hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_hostname_defaults_to_name() {
        let device = DeviceSpec::new("EOR1", "10.0.0.2", "admin");
        assert_eq!(device.expected_hostname(), "EOR1");
        assert_eq!(device.port, 22);

        let device = device.with_hostname("eor1.dc1");
        assert_eq!(device.expected_hostname(), "eor1.dc1");
    }
}
