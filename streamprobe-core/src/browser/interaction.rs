use async_trait::async_trait;

use crate::config::InteractionSection;

use super::context::DiscoveryContext;
use super::error::{BrowserError, BrowserResult};

/// Page-level nudging run once after load to provoke lazy media requests.
#[async_trait]
pub trait Interaction: Send + Sync {
    async fn run(&self, context: &mut dyn DiscoveryContext) -> BrowserResult<()>;
}

/// Scrolls, clicks play controls and force-starts muted `<video>` elements.
#[derive(Debug, Clone)]
pub struct PlaybackNudge {
    config: InteractionSection,
}

impl Default for PlaybackNudge {
    fn default() -> Self {
        Self::new(InteractionSection::default())
    }
}

impl PlaybackNudge {
    pub fn new(config: InteractionSection) -> Self {
        Self { config }
    }

    pub fn script(&self) -> BrowserResult<String> {
        let selectors = serde_json::to_string(&self.config.play_selectors).map_err(|err| {
            BrowserError::Configuration(format!("invalid play selectors: {err}"))
        })?;
        Ok(format!(
            r#"
(async () => {{
    const pause = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
    window.scrollBy(0, {initial_scroll});
    await pause({initial_pause});
    for (const selector of {selectors}) {{
        try {{
            document.querySelectorAll(selector).forEach((el) => {{
                try {{ el.click(); }} catch (_) {{}}
            }});
        }} catch (_) {{}}
    }}
    document.querySelectorAll('video').forEach((video) => {{
        video.muted = true;
        try {{
            const started = video.play();
            if (started && typeof started.catch === 'function') {{
                started.catch(() => {{}});
            }}
        }} catch (_) {{}}
    }});
    window.scrollBy(0, {follow_up_scroll});
    await pause({follow_up_pause});
    window.scrollTo(0, 0);
    return true;
}})()
"#,
            initial_scroll = self.config.initial_scroll_px,
            initial_pause = self.config.initial_pause_ms,
            selectors = selectors,
            follow_up_scroll = self.config.follow_up_scroll_px,
            follow_up_pause = self.config.follow_up_pause_ms,
        ))
    }
}

#[async_trait]
impl Interaction for PlaybackNudge {
    async fn run(&self, context: &mut dyn DiscoveryContext) -> BrowserResult<()> {
        let script = self.script()?;
        context.evaluate(&script).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_configured_steps_in_order() {
        let script = PlaybackNudge::default().script().unwrap();
        let first = script.find("window.scrollBy(0, 100)").unwrap();
        let click = script.find("el.click()").unwrap();
        let play = script.find("video.play()").unwrap();
        let second = script.find("window.scrollBy(0, 500)").unwrap();
        let top = script.find("window.scrollTo(0, 0)").unwrap();
        assert!(first < click && click < play && play < second && second < top);
        assert!(script.contains("pause(500)"));
        assert!(script.contains("pause(1000)"));
        assert!(script.contains("video.muted = true"));
    }

    #[test]
    fn selectors_are_quoted_as_json() {
        let nudge = PlaybackNudge::new(InteractionSection {
            play_selectors: vec![r#"button[aria-label="Play"]"#.into()],
            ..InteractionSection::default()
        });
        let script = nudge.script().unwrap();
        assert!(script.contains(r#"["button[aria-label=\"Play\"]"]"#));
    }
}
