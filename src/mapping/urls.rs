/// Turns a stored media reference into an absolute URL, or `None` when it
/// cannot be made absolute. Supplied by the hosting application.
pub trait UrlResolver: Sync {
    fn resolve(&self, reference: &str) -> Option<String>;
}

fn is_absolute(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Resolves relative references against a public site root.
#[derive(Debug, Clone, Default)]
pub struct BaseUrl {
    base: Option<String>,
}

impl BaseUrl {
    /// Only absolute http(s) bases are accepted; anything else behaves as no base.
    pub fn new(base: Option<&str>) -> Self {
        let base = base
            .map(|b| b.trim().trim_end_matches('/').to_string())
            .filter(|b| is_absolute(b));
        BaseUrl { base }
    }
}

impl UrlResolver for BaseUrl {
    fn resolve(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if is_absolute(reference) {
            return Some(reference.to_string());
        }
        if let Some(rest) = reference.strip_prefix("//") {
            return Some(format!("https://{rest}"));
        }
        // Non-http schemes.
        if reference.contains("://") || reference.starts_with("data:") {
            return None;
        }
        let base = self.base.as_ref()?;
        Some(format!("{base}/{}", reference.trim_start_matches('/')))
    }
}
