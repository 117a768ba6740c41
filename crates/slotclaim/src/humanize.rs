//! Human-like pointer and keyboard interaction.

use std::time::Duration;

use rand::Rng;

use crate::config::{DelayRange, HumanizeConfig};
use crate::page::Page;
use crate::types::{ClaimResult, ElementHandle};

/// Portion of the bounding box a click point is drawn from, per axis.
const CLICK_SPAN: (f64, f64) = (0.2, 0.8);

/// Drives a [`Page`] with randomized dwell, click points and delays.
///
/// All randomness comes from the caller's RNG so a seeded source makes the
/// interaction reproducible.
#[derive(Debug, Clone)]
pub struct Humanizer {
    config: HumanizeConfig,
}

impl Humanizer {
    pub fn new(config: HumanizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HumanizeConfig {
        &self.config
    }

    /// Draw a delay from `range`.
    pub fn sample<R: Rng + ?Sized>(range: DelayRange, rng: &mut R) -> Duration {
        let (lo, hi) = if range.min_ms <= range.max_ms {
            (range.min_ms, range.max_ms)
        } else {
            (range.max_ms, range.min_ms)
        };
        if hi == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    pub async fn pause<R: Rng + ?Sized>(&self, range: DelayRange, rng: &mut R) {
        let delay = Self::sample(range, rng);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Wait after a page-level step.
    pub async fn settle<R: Rng + ?Sized>(&self, rng: &mut R) {
        self.pause(self.config.settle, rng).await;
    }

    /// Hover, dwell, click somewhere inside the element, then wait.
    pub async fn click<P, R>(&self, page: &P, element: ElementHandle, rng: &mut R) -> ClaimResult<()>
    where
        P: Page + ?Sized,
        R: Rng + ?Sized,
    {
        page.hover(element).await?;
        self.pause(self.config.dwell, rng).await;

        match page.bounding_box(element).await? {
            Some(b) => {
                let x = b.x + rng.gen_range(CLICK_SPAN.0..=CLICK_SPAN.1) * b.width;
                let y = b.y + rng.gen_range(CLICK_SPAN.0..=CLICK_SPAN.1) * b.height;
                page.click_at(x, y).await?;
            }
            None => page.click(element).await?,
        }

        self.pause(self.config.post_click, rng).await;
        Ok(())
    }

    /// Focus the input and type one character at a time.
    pub async fn type_text<P, R>(
        &self,
        page: &P,
        element: ElementHandle,
        text: &str,
        rng: &mut R,
    ) -> ClaimResult<()>
    where
        P: Page + ?Sized,
        R: Rng + ?Sized,
    {
        page.click(element).await?;
        self.pause(self.config.dwell, rng).await;

        let mut buf = [0u8; 4];
        for ch in text.chars() {
            page.type_text(element, ch.encode_utf8(&mut buf)).await?;
            self.pause(self.config.keystroke, rng).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPage;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sample_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = Humanizer::sample(DelayRange::new(100, 300), &mut rng);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_sample_swapped_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let d = Humanizer::sample(DelayRange::new(50, 10), &mut rng);
        assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_range_is_zero() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(Humanizer::sample(DelayRange::ZERO, &mut rng), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_hovers_then_hits_inside_box() {
        let page = ScriptedPage::new();
        let button = page.add("button", "Book");
        let humanizer = Humanizer::new(HumanizeConfig::default());
        let mut rng = StdRng::seed_from_u64(1);

        humanizer.click(&page, button, &mut rng).await.unwrap();

        assert_eq!(page.hovers(button), 1);
        assert_eq!(page.clicks(button), 1);
        assert_eq!(page.point_clicks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_without_box_falls_back_to_element_click() {
        let page = ScriptedPage::new();
        let button = page.add("button", "Book");
        page.scene(|s| s.set_unrendered(button));
        let humanizer = Humanizer::new(HumanizeConfig::instant());
        let mut rng = StdRng::seed_from_u64(1);

        humanizer.click(&page, button, &mut rng).await.unwrap();

        assert_eq!(page.clicks(button), 1);
        assert_eq!(page.point_clicks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_text_sends_each_character() {
        let page = ScriptedPage::new();
        let input = page.add("input", "");
        let humanizer = Humanizer::new(HumanizeConfig::default());
        let mut rng = StdRng::seed_from_u64(3);

        humanizer.type_text(&page, input, "ab3", &mut rng).await.unwrap();

        assert_eq!(page.typed(input), "ab3");
    }
}
