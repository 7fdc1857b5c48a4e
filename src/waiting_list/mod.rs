//! Capacity-gated registration and the FIFO waiting list behind it.

pub mod capacity;
pub mod handlers;
pub mod promoter;
pub mod service;

pub use capacity::{Admission, AdmissionKind, CapacityGate};
pub use promoter::WaitingListPromoter;
pub use service::{JoinOutcome, Position, WaitingListService};

use url::Url;

use crate::error::AppError;
use crate::Result;

/// `{public_url}/waiting-list/position?email=..&token=..`
pub fn position_link(public_url: &str, email: &str, security_token: &str) -> Result<Url> {
    let mut link = Url::parse(public_url)
        .map_err(|e| AppError::ConfigError(format!("waiting_list.public_url: {e}")))?;
    // Appended, so a base path such as `/app` is kept.
    link.path_segments_mut()
        .map_err(|_| AppError::ConfigError("waiting_list.public_url cannot be a base".into()))?
        .pop_if_empty()
        .extend(["waiting-list", "position"]);
    link.query_pairs_mut()
        .append_pair("email", email)
        .append_pair("token", security_token);
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_link_encodes_query() {
        let link = position_link("https://example.com", "a+b@example.com", "tok_en").unwrap();
        assert_eq!(
            link.as_str(),
            "https://example.com/waiting-list/position?email=a%2Bb%40example.com&token=tok_en"
        );
    }

    #[test]
    fn test_position_link_keeps_base_path() {
        for base in ["https://example.com/app", "https://example.com/app/"] {
            let link = position_link(base, "a@example.com", "t").unwrap();
            assert_eq!(
                link.as_str(),
                "https://example.com/app/waiting-list/position?email=a%40example.com&token=t"
            );
        }
    }

    #[test]
    fn test_position_link_rejects_bad_base() {
        assert!(matches!(
            position_link("not a url", "a@example.com", "t"),
            Err(AppError::ConfigError(_))
        ));
    }
}
