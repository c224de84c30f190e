use regex::Regex;

use crate::error::VersionError;
use crate::transport::Endpoint;

/// Read the installed version from an endpoint's diagnostic page.
///
/// The page lists product details in a table; the version is the cell next to the one reading
/// `label`.
pub async fn discover_version(
    client: &reqwest::Client,
    endpoint: &Endpoint,
    label: &str,
) -> Result<String, VersionError> {
    let request_error = |error| VersionError::RequestError {
        side: endpoint.side,
        error,
    };

    let page = client
        .get(endpoint.version_url.clone())
        .send()
        .await
        .map_err(request_error)?
        .error_for_status()
        .map_err(request_error)?
        .text()
        .await
        .map_err(request_error)?;

    let version = find_labelled_cell(&page, label).ok_or_else(|| VersionError::NotFoundError {
        side: endpoint.side,
        label: label.to_owned(),
    })?;

    tracing::info!(side = endpoint.side.as_str(), version = %version, "discovered endpoint version");

    Ok(version)
}

/// Text of the table cell that follows a cell whose text is exactly `label`.
fn find_labelled_cell(page: &str, label: &str) -> Option<String> {
    let pattern = format!(
        r"(?is)<td[^>]*>\s*{}\s*</td>\s*<td[^>]*>(.*?)</td>",
        regex::escape(label)
    );
    let cell = Regex::new(&pattern).ok()?.captures(page)?.get(1)?.as_str();

    let markup = Regex::new(r"<[^>]*>").ok()?;
    Some(markup.replace_all(cell, "").trim().to_owned())
}
