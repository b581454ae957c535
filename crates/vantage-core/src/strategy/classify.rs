//! Ordered route table: first matching row decides class and strategy.

use regex::Regex;

use crate::error::{DeliveryError, DeliveryResult};
use crate::types::{ResourceClass, Strategy};

/// Path fragments of hot-reload and dev-server sockets. Requests containing
/// any of them are never intercepted.
pub const DEV_TOOLING_MARKERS: &[&str] = &[
    "webpack-hmr",
    "hot-update",
    "/__vite",
    "/@vite/",
    "sockjs-node",
    "__nextjs",
];

/// Class and strategy for paths no row matches.
pub const FALLBACK: Classification = Classification {
    class: ResourceClass::Static,
    strategy: Strategy::StaleWhileRevalidate,
};

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ResourceClass,
    pub strategy: Strategy,
}

/// One `(predicate, class, strategy)` row; the predicate is a path regex.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: Regex,
    class: ResourceClass,
    strategy: Strategy,
}

impl Route {
    pub fn new(pattern: &str, class: ResourceClass, strategy: Strategy) -> DeliveryResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| DeliveryError::Config {
            message: format!("invalid route pattern {pattern}: {e}"),
        })?;
        Ok(Self {
            pattern,
            class,
            strategy,
        })
    }

    fn matches(&self, path: &str) -> Option<Classification> {
        self.pattern.is_match(path).then_some(Classification {
            class: self.class,
            strategy: self.strategy,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Rows evaluated top-down; [`FALLBACK`] is implied after the last one.
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// api, image, font, then build assets.
    pub fn standard() -> DeliveryResult<Self> {
        Ok(Self::new(vec![
            Route::new(r"^/api/", ResourceClass::Api, Strategy::NetworkFirst)?,
            Route::new(
                r"(?i)(\.(png|jpe?g|gif|webp|avif|svg|ico)$|/images/)",
                ResourceClass::Image,
                Strategy::CacheFirst,
            )?,
            Route::new(
                r"(?i)(\.(woff2?|ttf|otf|eot)$|/fonts/)",
                ResourceClass::Font,
                Strategy::CacheFirst,
            )?,
            Route::new(
                r"(?i)(^/_next/static/|^/static/|\.(m?js|css)$)",
                ResourceClass::Static,
                Strategy::CacheFirst,
            )?,
        ]))
    }

    /// Insert a row ahead of every existing one.
    pub fn prepend(&mut self, route: Route) {
        self.routes.insert(0, route);
    }

    pub fn classify(&self, path: &str) -> Classification {
        self.routes
            .iter()
            .find_map(|route| route.matches(path))
            .unwrap_or(FALLBACK)
    }
}

/// Whether a path or query names a dev-tooling endpoint.
pub fn is_dev_tooling(path_and_query: &str) -> bool {
    DEV_TOOLING_MARKERS
        .iter()
        .any(|marker| path_and_query.contains(marker))
}
