//! 📜 The rate-limited pager: walks a paginated listing one page at a time, napping
//! politely whenever the API tells us to chill.
//!
//! 🎬 *[a listing endpoint. page one loads. page two returns 429.]*
//! *[the pager does not panic. the pager sleeps. the pager tries again.]*
//! *[five 429s later the pager goes home with what it has. that's called wisdom.]*
//!
//! The loop is an explicit little state machine so the tests (and future-you at 3am)
//! can reason about it without drawing it on a whiteboard:
//!
//! ```text
//!   Fetching ──ok, token──▶ Fetching (next page, retries reset)
//!   Fetching ──ok, no token──▶ Done            → complete listing
//!   Fetching ──429 / transient──▶ Backoff
//!   Backoff  ──retries < max──▶ sleep factor·2^retries ──▶ Fetching (same page)
//!   Backoff  ──retries == max──▶ Exhausted     → partial listing, complete = false
//!   Fetching ──4xx / garbage──▶ Failed         → Err, nothing partial
//! ```
//!
//! Strictly sequential. The next token only exists once the previous page arrived.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::common::{PageToken, RemoteFileDescriptor};
use crate::error::RemoteError;

/// 📄 One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    pub items: Vec<RemoteFileDescriptor>,
    /// 🎟️ `None` or empty both mean "that was the last page"
    pub next_page_token: Option<PageToken>,
}

/// 📡 Anything that can fetch one page given a continuation token.
///
/// Implementors classify their own failures into [`RemoteError`]; the pager only cares
/// whether the answer was "slow down", "try again", or "no".
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, token: Option<&str>) -> Result<ListingPage, RemoteError>;
}

/// ⚙️ Backoff knobs. Defaults: 5 retries per page, 1s factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagerConfig {
    pub max_retries: u32,
    pub backoff_factor: Duration,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: Duration::from_secs(1),
        }
    }
}

/// 📦 Everything the pager managed to collect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<RemoteFileDescriptor>,
    /// ✅ false when we gave up on a page after too many 429s / transient failures
    pub complete: bool,
    /// 🔢 HTTP requests actually issued, retries included
    pub requests: u32,
}

impl Listing {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().filter_map(|f| f.size_bytes).sum()
    }
}

enum PagerState {
    Fetching,
    Backoff(RemoteError),
    Done,
    Exhausted,
    Failed(RemoteError),
}

/// 🚶 Drive `fetcher` until the listing ends, the retry budget for one page runs out,
/// or a page fails for real.
pub async fn list_all(
    fetcher: &dyn PageFetcher,
    config: &PagerConfig,
) -> Result<Listing, RemoteError> {
    let mut listing = Listing::default();
    let mut token: Option<PageToken> = None;
    let mut retries: u32 = 0;
    let mut page_number: u32 = 1;
    let mut state = PagerState::Fetching;

    loop {
        state = match state {
            PagerState::Fetching => {
                listing.requests += 1;
                match fetcher.fetch_page(token.as_deref()).await {
                    Ok(page) => {
                        info!(
                            "📄 page {page_number}: {} files (running total {})",
                            page.items.len(),
                            listing.files.len() + page.items.len()
                        );
                        listing.files.extend(page.items);
                        retries = 0;
                        match page.next_page_token.filter(|t| !t.is_empty()) {
                            Some(next) => {
                                token = Some(next);
                                page_number += 1;
                                PagerState::Fetching
                            }
                            None => PagerState::Done,
                        }
                    }
                    Err(err) if err.is_retryable() => PagerState::Backoff(err),
                    Err(err) => PagerState::Failed(err),
                }
            }
            PagerState::Backoff(err) => {
                retries += 1;
                if retries >= config.max_retries {
                    PagerState::Exhausted
                } else {
                    let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
                    let delay = config.backoff_factor.saturating_mul(factor);
                    let why = if err.is_rate_limited() { "rate limited" } else { "hiccup" };
                    warn!(
                        "🐢 page {page_number} {why}: {err}. backing off {:?} (retry {retries}/{})",
                        delay, config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    PagerState::Fetching
                }
            }
            PagerState::Done => {
                listing.complete = true;
                debug!(
                    "🏁 listing complete: {} files over {} requests",
                    listing.files.len(),
                    listing.requests
                );
                return Ok(listing);
            }
            PagerState::Exhausted => {
                warn!(
                    "⚠️ gave up on page {page_number} after {} retries, returning {} files collected so far",
                    config.max_retries,
                    listing.files.len()
                );
                listing.complete = false;
                return Ok(listing);
            }
            PagerState::Failed(err) => {
                warn!("💀 listing failed on page {page_number}: {err}");
                return Err(err);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 🎭 A fetcher that reads its lines from a script. Method acting for HTTP.
    #[derive(Default)]
    struct ScriptedFetcher {
        script: Mutex<VecDeque<Result<ListingPage, RemoteError>>>,
        seen_tokens: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<ListingPage, RemoteError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen_tokens: Mutex::default(),
            }
        }

        fn calls(&self) -> usize {
            self.seen_tokens.lock().expect("💀 poisoned").len()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_page(&self, token: Option<&str>) -> Result<ListingPage, RemoteError> {
            self.seen_tokens
                .lock()
                .expect("💀 poisoned")
                .push(token.map(str::to_string));
            self.script
                .lock()
                .expect("💀 poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::from_status("script", 429, "")))
        }
    }

    fn page(names: &[&str], next: Option<&str>) -> Result<ListingPage, RemoteError> {
        Ok(ListingPage {
            items: names
                .iter()
                .map(|n| RemoteFileDescriptor {
                    name: n.to_string(),
                    size_bytes: Some(10),
                })
                .collect(),
            next_page_token: next.map(str::to_string),
        })
    }

    fn slow_down() -> Result<ListingPage, RemoteError> {
        Err(RemoteError::from_status("kaggle", 429, "slow down"))
    }

    fn quick() -> PagerConfig {
        PagerConfig {
            max_retries: 5,
            backoff_factor: Duration::from_millis(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_three_pages_arrive_in_order() {
        let fetcher = ScriptedFetcher::new(vec![
            page(&["a", "b"], Some("t1")),
            page(&["c"], Some("t2")),
            page(&["d"], Some("")),
        ]);

        let listing = list_all(&fetcher, &quick()).await.expect("💀 should list");

        assert!(listing.complete);
        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert_eq!(listing.requests, 3);
        assert_eq!(listing.total_bytes(), 40);
        assert_eq!(
            *fetcher.seen_tokens.lock().expect("💀 poisoned"),
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_two_429s_cost_exactly_two_extra_requests() {
        let fetcher = ScriptedFetcher::new(vec![
            page(&["a"], Some("t1")),
            slow_down(),
            slow_down(),
            page(&["b"], None),
        ]);

        let listing = list_all(&fetcher, &quick()).await.expect("💀 should list");

        assert!(listing.complete);
        assert_eq!(listing.files.len(), 2);
        // 🧮 1 request for page one, k+1 = 3 for page two
        assert_eq!(fetcher.calls(), 4);
        // 🎟️ the retried requests reuse the same token
        assert_eq!(
            fetcher.seen_tokens.lock().expect("💀 poisoned")[1..],
            [Some("t1".to_string()), Some("t1".to_string()), Some("t1".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_429_forever_means_five_tries_then_partial() {
        // 📜 script runs dry after page one, and a dry script answers 429 forever
        let fetcher = ScriptedFetcher::new(vec![page(&["a", "b"], Some("t1"))]);

        let listing = list_all(&fetcher, &quick()).await.expect("💀 partial is still Ok");

        assert!(!listing.complete);
        assert_eq!(listing.files.len(), 2);
        assert_eq!(fetcher.calls(), 1 + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_retries_reset_between_pages() {
        let fetcher = ScriptedFetcher::new(vec![
            slow_down(),
            slow_down(),
            slow_down(),
            slow_down(),
            page(&["a"], Some("t1")),
            slow_down(),
            slow_down(),
            slow_down(),
            slow_down(),
            page(&["b"], None),
        ]);

        let listing = list_all(&fetcher, &quick()).await.expect("💀 should list");
        assert!(listing.complete);
        assert_eq!(listing.requests, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_404_sinks_the_whole_listing() {
        let fetcher = ScriptedFetcher::new(vec![
            page(&["a"], Some("t1")),
            Err(RemoteError::from_status("kaggle", 404, "no such dataset")),
        ]);

        let result = list_all(&fetcher, &quick()).await;
        assert!(matches!(result, Err(RemoteError::Permanent { status: 404, .. })));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_503_gets_the_same_patience_as_a_429() {
        let fetcher = ScriptedFetcher::new(vec![
            Err(RemoteError::from_status("kaggle", 503, "brb")),
            page(&["a"], None),
        ]);

        let listing = list_all(&fetcher, &quick()).await.expect("💀 should list");
        assert!(listing.complete);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_the_naps_double() {
        let fetcher = ScriptedFetcher::new(vec![slow_down(), slow_down(), page(&[], None)]);
        let config = PagerConfig {
            max_retries: 5,
            backoff_factor: Duration::from_secs(1),
        };

        let started = tokio::time::Instant::now();
        list_all(&fetcher, &config).await.expect("💀 should list");
        // ⏱️ 1s·2^1 + 1s·2^2 on the paused clock
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7), "{waited:?}");
    }
}
