//! Replays a fully-buffered reply one character at a time.
//!
//! Each step appends a character to the accumulator, re-parses the whole
//! accumulator as markdown and re-highlights its code blocks. Re-parsing is
//! quadratic in the reply length; the final markup is always the same as a
//! single [`render_markdown`] of the full text, whatever the pacing.

use std::time::Duration;

use rand::Rng;

use crate::classifier::AgentIdentity;
use crate::markup::{render_markdown, Markup};

/// Delay between revealed characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    Fixed(Duration),
    Jitter { min: Duration, max: Duration },
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::Fixed(Duration::from_millis(10))
    }
}

impl Pacing {
    pub fn next_delay(&self) -> Duration {
        match *self {
            Pacing::Fixed(delay) => delay,
            Pacing::Jitter { min, max } if max > min => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;
                Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
            }
            Pacing::Jitter { min, .. } => min,
        }
    }
}

/// Where a reply is shown
pub trait RenderSurface {
    /// Replace the reply shown on the surface
    fn present(&mut self, identity: &AgentIdentity, markup: Markup);

    fn scroll_to_end(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Finished(Markup),
    /// Stopped early; `revealed` characters were shown.
    Cancelled { revealed: usize },
}

#[derive(Debug, Clone, Default)]
pub struct ProgressiveRenderer {
    pacing: Pacing,
}

impl ProgressiveRenderer {
    pub fn new(pacing: Pacing) -> Self {
        Self { pacing }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    pub async fn render<S, F>(
        &self,
        target: &mut S,
        full_text: &str,
        identity: &AgentIdentity,
        cancelled: F,
    ) -> Completion
    where
        S: RenderSurface + ?Sized,
        F: Fn() -> bool,
    {
        let total = full_text.chars().count();
        if total == 0 {
            let markup = Markup::default();
            target.present(identity, markup.clone());
            target.scroll_to_end();
            return Completion::Finished(markup);
        }

        let mut accumulated = String::with_capacity(full_text.len());
        let mut revealed = 0usize;
        let mut last = Markup::default();

        for ch in full_text.chars() {
            if cancelled() {
                log::debug!("render cancelled after {}/{} chars", revealed, total);
                return Completion::Cancelled { revealed };
            }

            accumulated.push(ch);
            revealed += 1;

            last = render_markdown(&accumulated);
            target.present(identity, last.clone());
            target.scroll_to_end();

            if revealed < total {
                let delay = self.pacing.next_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
        }

        Completion::Finished(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct RecordingSurface {
        frames: Vec<Markup>,
        scrolls: usize,
    }

    impl RenderSurface for RecordingSurface {
        fn present(&mut self, _identity: &AgentIdentity, markup: Markup) {
            self.frames.push(markup);
        }

        fn scroll_to_end(&mut self) {
            self.scrolls += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_frame_per_character() {
        let renderer = ProgressiveRenderer::new(Pacing::Fixed(Duration::from_millis(5)));
        let mut surface = RecordingSurface::default();
        let identity = AgentIdentity::orchestrator();

        let completion = renderer
            .render(&mut surface, "héllo", &identity, || false)
            .await;

        assert_eq!(surface.frames.len(), 5);
        assert_eq!(surface.scrolls, 5);
        assert_eq!(surface.frames[0].plain_text(), "h");
        assert_eq!(surface.frames[1].plain_text(), "hé");
        assert_eq!(completion, Completion::Finished(render_markdown("héllo")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_markup_independent_of_pacing() {
        let text = "# Fix\n\nUse **this**:\n\n```rust\nfn main() {}\n```";
        let identity = AgentIdentity::orchestrator();

        let fixed = ProgressiveRenderer::new(Pacing::Fixed(Duration::from_millis(3)));
        let jitter = ProgressiveRenderer::new(Pacing::Jitter {
            min: Duration::from_millis(1),
            max: Duration::from_millis(9),
        });
        let instant = ProgressiveRenderer::new(Pacing::Fixed(Duration::ZERO));

        let mut a = RecordingSurface::default();
        let mut b = RecordingSurface::default();
        let mut c = RecordingSurface::default();
        let first = fixed.render(&mut a, text, &identity, || false).await;
        let second = jitter.render(&mut b, text, &identity, || false).await;
        let third = instant.render(&mut c, text, &identity, || false).await;

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(a.frames.last(), c.frames.last());
        assert_eq!(first, Completion::Finished(render_markdown(text)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_presenting() {
        let renderer = ProgressiveRenderer::new(Pacing::Fixed(Duration::from_millis(1)));
        let mut surface = RecordingSurface::default();
        let identity = AgentIdentity::orchestrator();
        let checks = Cell::new(0usize);

        let completion = renderer
            .render(&mut surface, &"x".repeat(100), &identity, || {
                checks.set(checks.get() + 1);
                checks.get() > 10
            })
            .await;

        assert_eq!(completion, Completion::Cancelled { revealed: 10 });
        assert_eq!(surface.frames.len(), 10);
        assert_eq!(surface.frames.last().unwrap().plain_text(), "x".repeat(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_shows_nothing() {
        let renderer = ProgressiveRenderer::default();
        let mut surface = RecordingSurface::default();

        let completion = renderer
            .render(&mut surface, "abc", &AgentIdentity::orchestrator(), || true)
            .await;

        assert_eq!(completion, Completion::Cancelled { revealed: 0 });
        assert!(surface.frames.is_empty());
    }

    #[tokio::test]
    async fn test_empty_text_finishes_immediately() {
        let renderer = ProgressiveRenderer::default();
        let mut surface = RecordingSurface::default();

        let completion = renderer
            .render(&mut surface, "", &AgentIdentity::orchestrator(), || false)
            .await;

        assert_eq!(completion, Completion::Finished(Markup::default()));
        assert_eq!(surface.frames.len(), 1);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let pacing = Pacing::Jitter {
            min: Duration::from_millis(4),
            max: Duration::from_millis(8),
        };
        for _ in 0..50 {
            let delay = pacing.next_delay();
            assert!(delay >= Duration::from_millis(4) && delay <= Duration::from_millis(8));
        }
    }
}
