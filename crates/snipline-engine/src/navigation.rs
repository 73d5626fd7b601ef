#![forbid(unsafe_code)]

//! Same-document navigation detection.
//!
//! Single-page apps change "page" through the history API without a reload.
//! The host reports history calls and `popstate` as events and the session
//! polls the location on a fixed interval as a safety net; both paths land in
//! [`NavigationDetector::observe`], which starts a new epoch whenever the
//! location differs from the last one seen.

use tracing::debug;

/// A detected location change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationChange {
    pub from: String,
    pub to: String,
    /// The epoch that starts with this change.
    pub epoch: u64,
}

/// Tracks the current location and navigation epoch.
#[derive(Debug, Clone)]
pub struct NavigationDetector {
    location: String,
    epoch: u64,
}

impl NavigationDetector {
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            epoch: 0,
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Compare `location` with the last one seen.
    pub fn observe(&mut self, location: &str) -> Option<NavigationChange> {
        if location == self.location {
            return None;
        }
        self.epoch += 1;
        let from = std::mem::replace(&mut self.location, location.to_string());
        debug!(%from, to = location, epoch = self.epoch, "navigation detected");
        Some(NavigationChange {
            from,
            to: location.to_string(),
            epoch: self.epoch,
        })
    }

    /// Start a new epoch without a location change (re-initialization).
    pub fn bump(&mut self, location: &str) -> u64 {
        self.location = location.to_string();
        self.epoch += 1;
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_location_is_not_a_change() {
        let mut nav = NavigationDetector::new("https://a.test/c/1");
        assert_eq!(nav.observe("https://a.test/c/1"), None);
        assert_eq!(nav.epoch(), 0);
    }

    #[test]
    fn each_change_starts_an_epoch() {
        let mut nav = NavigationDetector::new("https://a.test/c/1");
        let change = nav.observe("https://a.test/c/2").unwrap();
        assert_eq!(change.from, "https://a.test/c/1");
        assert_eq!(change.epoch, 1);
        assert_eq!(nav.observe("https://a.test/c/2"), None);
        assert_eq!(nav.observe("https://a.test/c/1").unwrap().epoch, 2);
        assert_eq!(nav.bump("https://a.test/c/1"), 3);
    }
}
