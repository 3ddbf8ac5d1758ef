//! Transport error types.

use dhcpwatch_core::DhcpError;

/// Result type alias for bus transport operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// D-Bus transport errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connection or call failure.
    #[error("D-Bus error: {0}")]
    Zbus(#[from] zbus::Error),

    /// Error reply from the bus daemon.
    #[error("D-Bus daemon error: {0}")]
    Fdo(#[from] zbus::fdo::Error),

    /// Malformed bus, interface or member name.
    #[error("invalid D-Bus name: {0}")]
    Name(#[from] zbus::names::Error),
}

impl From<BusError> for DhcpError {
    fn from(err: BusError) -> Self {
        Self::bus(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcpwatch_core::ErrorKind;

    #[test]
    fn test_converts_to_bus_kind() {
        let err = BusError::Zbus(zbus::Error::Failure("no socket".into()));
        let converted: DhcpError = err.into();
        assert_eq!(converted.kind(), ErrorKind::Bus);
        assert!(converted.to_string().contains("no socket"));
    }

    #[test]
    fn test_name_error_message() {
        let err = BusError::from(
            zbus::names::BusName::try_from("not a bus name").unwrap_err(),
        );
        assert!(err.to_string().contains("invalid D-Bus name"));
    }
}
