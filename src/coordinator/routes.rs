// SPDX-License-Identifier: MPL-2.0

//! Route handling: which routes are polled, and which stream a route shows.

use crate::identity::{CompositeId, Content, Reach, Sort, StreamId};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Timeline filters chosen by the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPreferences {
    pub reach: Reach,
    pub sort: Sort,
    pub content: Content,
}

impl ContentPreferences {
    pub fn timeline(self) -> StreamId {
        StreamId::timeline(self.reach, self.sort, self.content)
    }
}

/// Maps a route to the stream it displays.
pub struct RouteMatcher {
    pattern: Regex,
    build: fn(&Captures<'_>, &ContentPreferences) -> Option<StreamId>,
}

impl RouteMatcher {
    fn matches(&self, route: &str, preferences: &ContentPreferences) -> Option<Option<StreamId>> {
        self.pattern
            .captures(route)
            .map(|caps| (self.build)(&caps, preferences))
    }
}

fn home(_: &Captures<'_>, preferences: &ContentPreferences) -> Option<StreamId> {
    Some(preferences.timeline())
}

fn post_replies(caps: &Captures<'_>, _: &ContentPreferences) -> Option<StreamId> {
    CompositeId::build(&caps["owner"], &caps["post"])
        .ok()
        .map(StreamId::replies)
}

fn profile(caps: &Captures<'_>, _: &ContentPreferences) -> Option<StreamId> {
    StreamId::author(&caps["user"]).ok()
}

/// Evaluated in order; the first matching route decides.
static STREAM_ROUTES: Lazy<Vec<RouteMatcher>> = Lazy::new(|| {
    vec![
        RouteMatcher {
            pattern: Regex::new(r"^/home/?$").expect("valid route regex"),
            build: home,
        },
        RouteMatcher {
            pattern: Regex::new(r"^/post/(?P<owner>[^/]+)/(?P<post>[^/]+)/?$")
                .expect("valid route regex"),
            build: post_replies,
        },
        RouteMatcher {
            pattern: Regex::new(r"^/profile/(?P<user>[^/]+)/?$").expect("valid route regex"),
            build: profile,
        },
    ]
});

/// Stream shown by `route`, or `None` for routes without one (or with
/// malformed path segments).
pub fn resolve_stream_id(route: &str, preferences: &ContentPreferences) -> Option<StreamId> {
    let path = route.split(['?', '#']).next().unwrap_or(route);
    STREAM_ROUTES
        .iter()
        .find_map(|matcher| matcher.matches(path, preferences))
        .flatten()
}

/// Routes on which polling is allowed.
#[derive(Debug, Clone)]
pub struct RouteAllowlist {
    patterns: Vec<Regex>,
}

impl RouteAllowlist {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn allows(&self, route: &str) -> bool {
        let path = route.split(['?', '#']).next().unwrap_or(route);
        self.patterns.iter().any(|p| p.is_match(path))
    }
}
