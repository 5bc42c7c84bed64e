//! Classification of a downstream delivery attempt (spec §7): every
//! attempt resolves to exactly one of `Success`, `Retryable`, `Permanent`
//! before it is recorded.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Retryable,
    Permanent,
}

impl Classification {
    /// Classifies a downstream HTTP status code: `2xx` succeeds, `429`/`5xx`
    /// retry, any other `4xx` is permanent.
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Classification::Success,
            429 => Classification::Retryable,
            500..=599 => Classification::Retryable,
            400..=499 => Classification::Permanent,
            _ => Classification::Retryable,
        }
    }

    /// Network errors and timeouts are always retryable — there was no
    /// response to classify by status.
    pub fn from_transport_error() -> Self {
        Classification::Retryable
    }

    pub fn error_kind(self, status: Option<u16>) -> Option<String> {
        match self {
            Classification::Success => None,
            Classification::Retryable => Some(
                status
                    .map(|s| format!("RETRYABLE_{}", s))
                    .unwrap_or_else(|| "RETRYABLE_TRANSPORT".into()),
            ),
            Classification::Permanent => Some(
                status
                    .map(|s| format!("PERMANENT_{}", s))
                    .unwrap_or_else(|| "PERMANENT".into()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_xx_is_success() {
        assert_eq!(Classification::from_status(200), Classification::Success);
        assert_eq!(Classification::from_status(204), Classification::Success);
    }

    #[test]
    fn rate_limited_and_server_errors_are_retryable() {
        assert_eq!(Classification::from_status(429), Classification::Retryable);
        assert_eq!(Classification::from_status(500), Classification::Retryable);
        assert_eq!(Classification::from_status(503), Classification::Retryable);
    }

    #[test]
    fn other_four_xx_is_permanent() {
        assert_eq!(Classification::from_status(400), Classification::Permanent);
        assert_eq!(Classification::from_status(404), Classification::Permanent);
        assert_eq!(Classification::from_status(422), Classification::Permanent);
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert_eq!(Classification::from_transport_error(), Classification::Retryable);
    }

    #[test]
    fn error_kind_is_none_on_success() {
        assert_eq!(Classification::Success.error_kind(Some(200)), None);
    }
}
