// src/ingest/providers/mod.rs
pub mod eastmoney;
pub mod fundgz;
pub mod news_rss;
pub mod tavily;

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::ProviderFailure;

pub(crate) const USER_AGENT: &str = "fund-pulse/0.1 (+https://github.com/fund-pulse/fund-pulse)";

/// Client shared by HTTP-mode providers. The chain applies its own timeout on
/// top of this one.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Turn a non-2xx status into the matching provider failure.
pub(crate) fn check_status(status: StatusCode) -> Result<(), ProviderFailure> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderFailure::RateLimited);
    }
    if !status.is_success() {
        return Err(ProviderFailure::Http {
            message: format!("status {status}"),
        });
    }
    Ok(())
}

/// Parse a numeric string field; blank or `--` means absent.
pub(crate) fn parse_num(s: &str) -> Option<f64> {
    let t = s.trim().trim_end_matches('%');
    if t.is_empty() || t == "--" {
        return None;
    }
    t.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_num_handles_blanks_and_percent() {
        assert_eq!(parse_num("1.25"), Some(1.25));
        assert_eq!(parse_num("-0.52%"), Some(-0.52));
        assert_eq!(parse_num(""), None);
        assert_eq!(parse_num("--"), None);
        assert_eq!(parse_num("n/a"), None);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(ProviderFailure::RateLimited)
        );
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(ProviderFailure::Http { .. })
        ));
    }
}
