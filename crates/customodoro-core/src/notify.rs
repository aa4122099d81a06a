//! User-facing surfaces the cache controller talks to.
//!
//! Both are optional collaborators: the controller works without a
//! notifier, and the reloader decides what "reload the app" means for the
//! host (navigate a webview, restart a process, ...).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

impl Toast {
    pub fn new(level: ToastLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Info, message)
    }
}

/// Transient notification surface.
pub trait Notifier: Send + Sync {
    fn toast(&self, toast: Toast);

    /// Show the "new version available" affordance.
    fn show_update_prompt(&self) {}

    /// Remove the affordance, whether or not the user acted on it.
    fn hide_update_prompt(&self) {}
}

/// Performs the full app reload at the end of a clear.
pub trait Reloader: Send + Sync {
    fn reload(&self, url: &str);
}

/// Append a cache-busting query parameter to `url`.
pub fn cache_busted_url(url: &str, millis: i64) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let sep = if base.contains('?') { '&' } else { '?' };
    match fragment {
        Some(fragment) => format!("{base}{sep}_cb={millis}#{fragment}"),
        None => format!("{base}{sep}_cb={millis}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_busted_url() {
        assert_eq!(
            cache_busted_url("https://customodoro.app/", 1700000000000),
            "https://customodoro.app/?_cb=1700000000000"
        );
        assert_eq!(
            cache_busted_url("https://customodoro.app/?mode=reverse", 5),
            "https://customodoro.app/?mode=reverse&_cb=5"
        );
        assert_eq!(
            cache_busted_url("https://customodoro.app/#stats", 5),
            "https://customodoro.app/?_cb=5#stats"
        );
    }
}
