//! URL utilities for consistent endpoint construction
//!
//! Normalizes base URLs so configured values with or without trailing
//! slashes produce the same endpoint URLs.

/// Join a base URL and an endpoint path without doubling slashes.
///
/// # Examples
///
/// ```
/// use plausch::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1", "chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// assert_eq!(
///     construct_api_url("https://api.example.com/v1/", "/chat/completions"),
///     "https://api.example.com/v1/chat/completions"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    format!("{base}/{endpoint}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_and_leading_slashes_collapse() {
        assert_eq!(
            construct_api_url("https://api.example.com///", "///chat/completions"),
            "https://api.example.com/chat/completions"
        );
    }

    #[test]
    fn plain_base_urls_join_directly() {
        assert_eq!(
            construct_api_url("http://127.0.0.1:8080", "chat/completions"),
            "http://127.0.0.1:8080/chat/completions"
        );
    }
}
