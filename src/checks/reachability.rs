use tracing::debug;

use crate::config::HTTP_TIMEOUT;
use crate::error::{DiagnosticsError, Result};
use crate::report::CheckLog;

/// HTTP client shared by every reachability check.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// Any answer below 500 proves the endpoint is reachable from here; a server
/// error or a transport failure does not.
pub async fn check_url_available(
    http: &reqwest::Client,
    url: &str,
    log: &mut CheckLog,
) -> Result<String> {
    log.log(&format!("requesting {url}"));

    let response = http.get(url).send().await?;
    let status = response.status();
    debug!(url, status = status.as_u16(), "url_probed");

    if status.is_server_error() {
        return Err(DiagnosticsError::check(format!(
            "{url} is not reachable, got status code {}",
            status.as_u16()
        )));
    }

    log.log(&format!("{url} answered with status {}", status.as_u16()));
    Ok(format!("{url} is reachable"))
}
