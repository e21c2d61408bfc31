//! Page automation contract

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ActionError;
use crate::types::{ElementSnapshot, LoadState, Query};

/// Operations the replay core needs from a live page.
///
/// Everything the locator and verifier do reduces to counting, locating,
/// acting and evaluating; implementations wrap a real browser driver or, in
/// tests and dry runs, a [`FixturePage`](crate::FixturePage).
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Current document URL
    async fn url(&self) -> Result<String, ActionError>;

    async fn navigate(&self, url: &str) -> Result<(), ActionError>;

    /// Number of elements currently matching the query
    async fn count(&self, query: &Query) -> Result<usize, ActionError>;

    /// Waits up to `timeout` for a visible match. `Ok(false)` on timeout.
    async fn wait_visible(&self, query: &Query, timeout: Duration) -> Result<bool, ActionError>;

    /// Describes the first match, if any
    async fn locate(&self, query: &Query) -> Result<Option<ElementSnapshot>, ActionError>;

    /// Topmost element rendered at a viewport point
    async fn element_at_point(&self, x: f64, y: f64)
        -> Result<Option<ElementSnapshot>, ActionError>;

    async fn click(&self, query: &Query) -> Result<(), ActionError>;

    async fn click_at(&self, x: f64, y: f64) -> Result<(), ActionError>;

    async fn fill(&self, query: &Query, text: &str) -> Result<(), ActionError>;

    async fn select_option(&self, query: &Query, value: &str) -> Result<(), ActionError>;

    async fn hover(&self, query: &Query) -> Result<(), ActionError>;

    async fn scroll_into_view(&self, query: &Query) -> Result<(), ActionError>;

    async fn wait_for_load(&self, state: LoadState, timeout: Duration)
        -> Result<(), ActionError>;

    /// Evaluates a script in the page and returns plain JSON data
    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value, ActionError>;

    /// Encoded image of the current viewport
    async fn screenshot(&self) -> Result<Vec<u8>, ActionError>;
}
