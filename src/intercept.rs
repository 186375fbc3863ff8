//! Process-wide endpoint interception.
//!
//! Hosts point the client at `from` endpoints and have them transparently
//! rewritten to `to`, which funnels traffic to test servers or local
//! proxies without touching call sites.  Translations are single-hop:
//! the result of a translation is never translated again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Endpoint {
        Endpoint {
            host: host.to_owned(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

static INTERCEPTS: OnceLock<Mutex<BTreeMap<Endpoint, Endpoint>>> = OnceLock::new();

fn intercepts() -> &'static Mutex<BTreeMap<Endpoint, Endpoint>> {
    INTERCEPTS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

/// Rewrite connections targeting `from` to go to `to` instead.
pub fn add_intercept(from: Endpoint, to: Endpoint) {
    intercepts().lock().unwrap().insert(from, to);
}

/// Drop every registered interception.
pub fn clear_intercepts() {
    intercepts().lock().unwrap().clear();
}

/// The endpoint to actually connect to when `target` is requested.
pub fn translate(target: &Endpoint) -> Endpoint {
    let map = intercepts().lock().unwrap();
    map.get(target).cloned().unwrap_or_else(|| target.clone())
}
