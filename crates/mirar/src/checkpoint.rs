//! Visual checkpoints and the per-session recorder.
//!
//! A [`Checkpoint`] names a capture (window or element region, viewport or
//! full extent) and the areas to leave out of the comparison. The
//! [`CheckpointRecorder`] captures it, submits the comparison to the
//! [`VisualBackend`] in the background and joins every comparison when the
//! session closes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::driver::{PageDriver, Screenshot};
use crate::locator::{resolve, BoundingBox, Locator};
use crate::result::{MirarError, MirarResult};
use crate::visual_regression::{
    CheckpointOutcome, CheckpointResult, ComparisonRequest, MaskRegion, VisualBackend,
};

/// What a checkpoint captures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointTarget {
    /// The browser window
    Window,
    /// The first element matching a CSS locator
    Region(Locator),
}

/// A named visual capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name, unique within a session
    pub tag: String,
    /// Capture target
    pub target: CheckpointTarget,
    /// Capture the full extent instead of the visible part
    #[serde(default)]
    pub fully: bool,
    /// Areas left out of the comparison
    #[serde(default)]
    pub ignore: Vec<Locator>,
}

impl Checkpoint {
    /// Capture the window
    #[must_use]
    pub fn window(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            target: CheckpointTarget::Window,
            fully: false,
            ignore: Vec::new(),
        }
    }

    /// Capture the element matching `selector`
    #[must_use]
    pub fn region(tag: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            target: CheckpointTarget::Region(Locator::css(selector)),
            fully: false,
            ignore: Vec::new(),
        }
    }

    /// Capture the whole document or the element's full scroll extent
    #[must_use]
    pub const fn fully(mut self) -> Self {
        self.fully = true;
        self
    }

    /// Leave elements matching `selector` out of the comparison
    #[must_use]
    pub fn ignore(mut self, selector: impl Into<String>) -> Self {
        self.ignore.push(Locator::css(selector));
        self
    }
}

/// Captures checkpoints and tracks their comparisons for one session
pub struct CheckpointRecorder {
    session: String,
    backend: Arc<dyn VisualBackend>,
    tags: HashSet<String>,
    pending: Vec<(String, JoinHandle<MirarResult<CheckpointOutcome>>)>,
}

impl std::fmt::Debug for CheckpointRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointRecorder")
            .field("session", &self.session)
            .field("tags", &self.tags)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl CheckpointRecorder {
    /// Recorder for the session of `test_name`
    #[must_use]
    pub fn new(test_name: impl Into<String>, backend: Arc<dyn VisualBackend>) -> Self {
        Self {
            session: test_name.into(),
            backend,
            tags: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Owning session (test name)
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Comparisons submitted and not yet joined
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Capture `checkpoint` and submit it for comparison without waiting.
    pub async fn capture(
        &mut self,
        driver: &dyn PageDriver,
        checkpoint: &Checkpoint,
    ) -> MirarResult<()> {
        let tag = checkpoint.tag.clone();
        if self.tags.contains(&tag) {
            return Err(MirarError::DuplicateTag {
                tag,
                session: self.session.clone(),
            });
        }

        let clip = capture_area(driver, checkpoint).await?;
        let ignore = ignore_masks(driver, checkpoint, &clip).await?;
        let screenshot: Screenshot = driver.capture(clip).await?;
        // Only a successful capture claims the tag
        self.tags.insert(tag.clone());
        tracing::info!(
            session = %self.session,
            tag = %tag,
            width = screenshot.width,
            height = screenshot.height,
            masks = ignore.len(),
            "checkpoint captured"
        );

        let request = ComparisonRequest {
            test_name: self.session.clone(),
            tag: tag.clone(),
            screenshot,
            ignore,
        };
        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(async move { backend.compare(request).await });
        self.pending.push((tag, handle));
        Ok(())
    }

    /// Join every comparison in submission order
    pub async fn close(self) -> Vec<CheckpointResult> {
        let mut results = Vec::with_capacity(self.pending.len());
        for (tag, handle) in self.pending {
            let outcome = match handle.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => CheckpointOutcome::Errored {
                    message: e.to_string(),
                },
                Err(e) => CheckpointOutcome::Errored {
                    message: format!("comparison task failed: {e}"),
                },
            };
            tracing::debug!(
                session = %self.session,
                tag = %tag,
                ?outcome,
                "comparison finished"
            );
            results.push(CheckpointResult { tag, outcome });
        }
        results
    }
}

fn css<'a>(checkpoint: &Checkpoint, locator: &'a Locator) -> MirarResult<&'a str> {
    locator
        .as_css()
        .ok_or_else(|| MirarError::InvalidCheckpoint {
            tag: checkpoint.tag.clone(),
            message: format!("`{locator}` is not a CSS selector"),
        })
}

/// Page-coordinate rectangle the checkpoint captures
async fn capture_area(
    driver: &dyn PageDriver,
    checkpoint: &Checkpoint,
) -> MirarResult<BoundingBox> {
    match &checkpoint.target {
        CheckpointTarget::Window if checkpoint.fully => {
            let size = driver.document_size().await?;
            Ok(BoundingBox::new(0.0, 0.0, size.width, size.height))
        }
        CheckpointTarget::Window => driver.viewport().await,
        CheckpointTarget::Region(locator) => {
            css(checkpoint, locator)?;
            let handles = resolve(driver, locator, None, false).await?.into_elements();
            let Some(first) = handles.first() else {
                return Err(MirarError::NotFound {
                    action: "checkpoint".to_string(),
                    selector: locator.to_string(),
                });
            };
            if handles.len() > 1 {
                tracing::warn!(
                    tag = %checkpoint.tag,
                    %locator,
                    count = handles.len(),
                    "region matched several elements, capturing the first"
                );
            }
            let state = driver.state(first).await?;
            let bounds = state.bounds;
            if checkpoint.fully {
                Ok(BoundingBox::new(
                    bounds.x,
                    bounds.y,
                    bounds.width.max(state.content_size.width),
                    bounds.height.max(state.content_size.height),
                ))
            } else {
                Ok(bounds)
            }
        }
    }
}

/// Ignore locators as masks relative to `clip`
async fn ignore_masks(
    driver: &dyn PageDriver,
    checkpoint: &Checkpoint,
    clip: &BoundingBox,
) -> MirarResult<Vec<MaskRegion>> {
    let mut masks = Vec::new();
    for locator in &checkpoint.ignore {
        let selector = css(checkpoint, locator)?;
        let handles = driver.query_all(selector, None).await?;
        if handles.is_empty() {
            tracing::warn!(
                tag = %checkpoint.tag,
                selector,
                "ignore region matched nothing, skipping"
            );
            continue;
        }
        for handle in &handles {
            let bounds = driver.state(handle).await?.bounds;
            masks.extend(MaskRegion::within(clip, &bounds));
        }
    }
    Ok(masks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::VisualConfig;
    use crate::demo::{actions_page, ACTIONS_URL};
    use crate::locator::NamedPoint;
    use crate::sim::SimulatedPage;
    use crate::visual_regression::BaselineStore;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (SimulatedPage, Arc<BaselineStore>) {
        let page = SimulatedPage::default().with_route(ACTIONS_URL, actions_page());
        page.navigate(ACTIONS_URL).await.unwrap();
        let store = Arc::new(BaselineStore::new(
            VisualConfig::default()
                .with_baseline_dir(dir.path().join("b").display().to_string())
                .with_diff_dir(dir.path().join("d").display().to_string()),
        ));
        (page, store)
    }

    mod area_tests {
        use super::*;

        #[tokio::test]
        async fn test_capture_areas() {
            let dir = TempDir::new().unwrap();
            let (page, _) = setup(&dir).await;

            let window = capture_area(&page, &Checkpoint::window("w")).await.unwrap();
            assert_eq!(window, BoundingBox::new(0.0, 0.0, 1000.0, 660.0));

            let full = capture_area(&page, &Checkpoint::window("f").fully()).await.unwrap();
            assert_eq!(full, BoundingBox::new(0.0, 0.0, 1000.0, 1600.0));

            let canvas = capture_area(&page, &Checkpoint::region("c", "#action-canvas"))
                .await
                .unwrap();
            assert_eq!(canvas, BoundingBox::new(20.0, 600.0, 250.0, 250.0));

            let scroll = capture_area(&page, &Checkpoint::region("s", "#scroll-vertical").fully())
                .await
                .unwrap();
            assert_eq!(scroll, BoundingBox::new(20.0, 1000.0, 300.0, 600.0));
        }

        #[tokio::test]
        async fn test_region_requires_css() {
            let dir = TempDir::new().unwrap();
            let (page, _) = setup(&dir).await;
            let checkpoint = Checkpoint {
                target: CheckpointTarget::Region(Locator::point(NamedPoint::Center)),
                ..Checkpoint::window("x")
            };
            let err = capture_area(&page, &checkpoint).await.unwrap_err();
            assert!(matches!(err, MirarError::InvalidCheckpoint { .. }));
        }

        #[tokio::test]
        async fn test_region_not_found() {
            let dir = TempDir::new().unwrap();
            let (page, _) = setup(&dir).await;
            let err = capture_area(&page, &Checkpoint::region("x", ".missing"))
                .await
                .unwrap_err();
            assert!(matches!(err, MirarError::NotFound { .. }));
        }

        #[tokio::test]
        async fn test_ignore_masks() {
            let dir = TempDir::new().unwrap();
            let (page, _) = setup(&dir).await;
            let checkpoint = Checkpoint::window("w")
                .ignore("body > div.banner > div")
                .ignore(".does-not-exist");
            let clip = BoundingBox::new(0.0, 0.0, 1000.0, 660.0);
            let masks = ignore_masks(&page, &checkpoint, &clip).await.unwrap();
            assert_eq!(masks, vec![MaskRegion::new(20, 10, 960, 40)]);

            let bad = Checkpoint {
                ignore: vec![Locator::coordinate(1, 1)],
                ..Checkpoint::window("w")
            };
            assert!(ignore_masks(&page, &bad, &clip).await.is_err());
        }
    }

    mod recorder_tests {
        use super::*;

        #[tokio::test]
        async fn test_duplicate_tag_rejected_before_capture() {
            let dir = TempDir::new().unwrap();
            let (page, store) = setup(&dir).await;
            let mut recorder = CheckpointRecorder::new("t1", store);
            recorder.capture(&page, &Checkpoint::window("a")).await.unwrap();
            let captures = page
                .call_history()
                .iter()
                .filter(|c| c.starts_with("capture"))
                .count();

            let err = recorder
                .capture(&page, &Checkpoint::region("a", ".action-email"))
                .await
                .unwrap_err();
            assert!(matches!(err, MirarError::DuplicateTag { ref session, .. } if session == "t1"));
            let after = page
                .call_history()
                .iter()
                .filter(|c| c.starts_with("capture"))
                .count();
            assert_eq!(captures, after);
            assert_eq!(recorder.pending(), 1);
            assert_eq!(recorder.close().await.len(), 1);
        }

        #[tokio::test]
        async fn test_failed_capture_keeps_tag_free() {
            let dir = TempDir::new().unwrap();
            let (page, store) = setup(&dir).await;
            let mut recorder = CheckpointRecorder::new("t3", store);
            let err = recorder
                .capture(&page, &Checkpoint::region("form", ".missing"))
                .await
                .unwrap_err();
            assert!(matches!(err, MirarError::NotFound { .. }));
            assert_eq!(recorder.pending(), 0);

            recorder
                .capture(&page, &Checkpoint::region("form", ".action-form"))
                .await
                .unwrap();
            let results = recorder.close().await;
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].tag, "form");
        }

        #[tokio::test]
        async fn test_close_joins_in_submission_order() {
            let dir = TempDir::new().unwrap();
            let (page, store) = setup(&dir).await;
            let mut recorder = CheckpointRecorder::new("t2", store);
            for tag in ["one", "two", "three"] {
                recorder.capture(&page, &Checkpoint::window(tag)).await.unwrap();
            }
            let results = recorder.close().await;
            let tags: Vec<_> = results.iter().map(|r| r.tag.as_str()).collect();
            assert_eq!(tags, ["one", "two", "three"]);
            assert!(results
                .iter()
                .all(|r| matches!(r.outcome, CheckpointOutcome::NewBaseline { .. })));
        }

        #[test]
        fn test_checkpoint_json_shape() {
            let checkpoint: Checkpoint = serde_json::from_str(
                r##"{"tag":"Lots of Clicks...","target":{"region":{"css":"#action-canvas"}}}"##,
            )
            .unwrap();
            assert_eq!(checkpoint, Checkpoint::region("Lots of Clicks...", "#action-canvas"));
            let window: Checkpoint =
                serde_json::from_str(r#"{"tag":"Full Page","target":"window","fully":true}"#)
                    .unwrap();
            assert_eq!(window, Checkpoint::window("Full Page").fully());
        }
    }
}
