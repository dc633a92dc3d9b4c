//! Host platform detection
//!
//! Decides whether the application runs as an installed PWA by querying
//! capability flags reported by the host environment.

use serde::{Deserialize, Serialize};

/// Value of the `display-mode` media feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    #[default]
    Browser,
    MinimalUi,
    Standalone,
    Fullscreen,
}

/// Capability queries answered by the host (browser window, webview, test double).
pub trait HostEnvironment {
    /// Whether the `(display-mode: <mode>)` media query matches.
    fn matches_display_mode(&self, mode: DisplayMode) -> bool;

    /// The vendor-specific `navigator.standalone` flag, `None` where the host
    /// does not expose it.
    fn navigator_standalone(&self) -> Option<bool>;

    /// Whether the host can register a service worker at all.
    fn supports_service_worker(&self) -> bool;
}

/// Standard check: the standalone display mode is active.
pub fn is_standalone_display_mode<H: HostEnvironment + ?Sized>(host: &H) -> bool {
    host.matches_display_mode(DisplayMode::Standalone)
}

/// Vendor check: the host reports `navigator.standalone == true`.
pub fn is_navigator_standalone<H: HostEnvironment + ?Sized>(host: &H) -> bool {
    host.navigator_standalone().unwrap_or(false)
}

/// Whether the application is running as an installed PWA.
pub fn is_pwa<H: HostEnvironment + ?Sized>(host: &H) -> bool {
    is_standalone_display_mode(host) || is_navigator_standalone(host)
}

/// A host whose answers are fixed up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticHost {
    pub display_mode: DisplayMode,
    pub navigator_standalone: Option<bool>,
    pub service_worker: bool,
}

impl StaticHost {
    /// A regular browser tab with service worker support.
    pub fn browser_tab() -> Self {
        Self {
            display_mode: DisplayMode::Browser,
            navigator_standalone: None,
            service_worker: true,
        }
    }

    /// An app launched from the home screen.
    pub fn installed() -> Self {
        Self {
            display_mode: DisplayMode::Standalone,
            ..Self::browser_tab()
        }
    }
}

impl HostEnvironment for StaticHost {
    fn matches_display_mode(&self, mode: DisplayMode) -> bool {
        self.display_mode == mode
    }

    fn navigator_standalone(&self) -> Option<bool> {
        self.navigator_standalone
    }

    fn supports_service_worker(&self) -> bool {
        self.service_worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_tab_is_not_pwa() {
        assert!(!is_pwa(&StaticHost::browser_tab()));
    }

    #[test]
    fn test_standalone_display_mode_is_pwa() {
        let host = StaticHost::installed();
        assert!(is_standalone_display_mode(&host));
        assert!(!is_navigator_standalone(&host));
        assert!(is_pwa(&host));
    }

    #[test]
    fn test_vendor_flag_is_pwa() {
        let host = StaticHost {
            navigator_standalone: Some(true),
            ..StaticHost::browser_tab()
        };
        assert!(!is_standalone_display_mode(&host));
        assert!(is_pwa(&host));
    }

    #[test]
    fn test_vendor_flag_false() {
        let host = StaticHost {
            navigator_standalone: Some(false),
            ..StaticHost::browser_tab()
        };
        assert!(!is_pwa(&host));
    }

    #[test]
    fn test_fullscreen_is_not_standalone() {
        let host = StaticHost {
            display_mode: DisplayMode::Fullscreen,
            ..StaticHost::browser_tab()
        };
        assert!(!is_pwa(&host));
    }

    #[test]
    fn test_trait_object() {
        let host: Box<dyn HostEnvironment> = Box::new(StaticHost::installed());
        assert!(is_pwa(host.as_ref()));
        assert!(host.supports_service_worker());
    }
}
