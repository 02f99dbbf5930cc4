//! Visual regression backend: baselines, pixel diffs and session verdicts.
//!
//! [`VisualBackend`] is the seam to whatever stores baselines and computes
//! differences. [`BaselineStore`] is the bundled implementation: PNG
//! baselines on disk, compared pixel by pixel with the `image` crate.

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageEncoder, Rgba};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::config::VisualConfig;
use crate::driver::Screenshot;
use crate::locator::BoundingBox;
use crate::result::{MirarError, MirarResult};

/// Rectangle excluded from comparison, in capture pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRegion {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of mask region
    pub width: u32,
    /// Height of mask region
    pub height: u32,
}

impl MaskRegion {
    /// Create a new mask region
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Mask covering `area` (page coordinates) inside `capture`, if they overlap
    #[must_use]
    pub fn within(capture: &BoundingBox, area: &BoundingBox) -> Option<Self> {
        let overlap = area.intersection(capture)?;
        let x = (overlap.x - capture.x).floor().max(0.0);
        let y = (overlap.y - capture.y).floor().max(0.0);
        let right = (overlap.right() - capture.x).ceil();
        let bottom = (overlap.bottom() - capture.y).ceil();
        Some(Self::new(
            x as u32,
            y as u32,
            (right - x) as u32,
            (bottom - y) as u32,
        ))
    }

    /// Check if a point is within this mask region
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && px < self.x.saturating_add(self.width)
            && py >= self.y
            && py < self.y.saturating_add(self.height)
    }
}

/// Result of comparing two images
#[derive(Debug, Clone)]
pub struct ImageDiffResult {
    /// Whether images match within threshold
    pub matches: bool,
    /// Number of pixels that differ
    pub diff_pixel_count: usize,
    /// Number of pixels compared (masked pixels excluded)
    pub total_pixels: usize,
    /// Percentage of pixels that differ (0.0-100.0)
    pub diff_percentage: f64,
    /// Maximum color difference found
    pub max_color_diff: u32,
    /// Diff image data (PNG encoded, highlights differences in red)
    pub diff_image: Option<Vec<u8>>,
}

impl ImageDiffResult {
    /// Check if images are identical (no differences)
    #[must_use]
    pub const fn is_identical(&self) -> bool {
        self.diff_pixel_count == 0
    }
}

/// Pixel comparison with per-pixel and whole-image tolerances
#[derive(Debug, Clone, Copy)]
pub struct ImageComparer {
    threshold: f64,
    color_threshold: u8,
}

impl ImageComparer {
    /// `threshold` is the fraction of pixels allowed to differ,
    /// `color_threshold` the summed RGB delta below which a pixel matches
    #[must_use]
    pub const fn new(threshold: f64, color_threshold: u8) -> Self {
        Self {
            threshold,
            color_threshold,
        }
    }

    /// Compare two PNG images
    pub fn compare_images(
        &self,
        actual: &[u8],
        expected: &[u8],
        masks: &[MaskRegion],
    ) -> MirarResult<ImageDiffResult> {
        let actual_img =
            image::load_from_memory(actual).map_err(|e| MirarError::ImageComparison {
                message: format!("Failed to decode actual image: {e}"),
            })?;
        let expected_img =
            image::load_from_memory(expected).map_err(|e| MirarError::ImageComparison {
                message: format!("Failed to decode baseline image: {e}"),
            })?;
        self.compare_dynamic_images(&actual_img, &expected_img, masks)
    }

    /// Compare two decoded images.
    ///
    /// Images of different sizes are compared over the union of both areas;
    /// pixels present in only one image always differ.
    pub fn compare_dynamic_images(
        &self,
        actual: &DynamicImage,
        expected: &DynamicImage,
        masks: &[MaskRegion],
    ) -> MirarResult<ImageDiffResult> {
        let (aw, ah) = actual.dimensions();
        let (ew, eh) = expected.dimensions();
        let (width, height) = (aw.max(ew), ah.max(eh));

        let actual_rgba = actual.to_rgba8();
        let expected_rgba = expected.to_rgba8();
        let mut diff_img = image::RgbaImage::new(width, height);

        let mut total_pixels = 0usize;
        let mut diff_pixel_count = 0usize;
        let mut max_color_diff: u32 = 0;

        for y in 0..height {
            for x in 0..width {
                if masks.iter().any(|m| m.contains(x, y)) {
                    diff_img.put_pixel(x, y, Rgba([0, 0, 0, 64]));
                    continue;
                }
                total_pixels += 1;

                let a = (x < aw && y < ah).then(|| *actual_rgba.get_pixel(x, y));
                let e = (x < ew && y < eh).then(|| *expected_rgba.get_pixel(x, y));
                let color_diff = match (a, e) {
                    (Some(a), Some(e)) => pixel_diff(a, e),
                    _ => u32::MAX,
                };

                if color_diff > u32::from(self.color_threshold) {
                    diff_pixel_count += 1;
                    max_color_diff = max_color_diff.max(color_diff.min(255 * 3));
                    diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                } else if let Some(Rgba([r, g, b, _])) = a {
                    diff_img.put_pixel(x, y, Rgba([r / 2, g / 2, b / 2, 128]));
                }
            }
        }

        let diff_percentage = if total_pixels > 0 {
            (diff_pixel_count as f64 / total_pixels as f64) * 100.0
        } else {
            0.0
        };
        let same_size = (aw, ah) == (ew, eh);
        let matches = same_size && diff_percentage <= self.threshold * 100.0;

        let diff_image = if matches {
            None
        } else {
            let mut buffer = Vec::new();
            image::codecs::png::PngEncoder::new(&mut buffer)
                .write_image(
                    diff_img.as_raw(),
                    width,
                    height,
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(|e| MirarError::ImageComparison {
                    message: format!("Failed to encode diff image: {e}"),
                })?;
            Some(buffer)
        };

        Ok(ImageDiffResult {
            matches,
            diff_pixel_count,
            total_pixels,
            diff_percentage,
            max_color_diff,
            diff_image,
        })
    }
}

/// Sum of RGB channel differences
fn pixel_diff(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    let Rgba([r1, g1, b1, _]) = a;
    let Rgba([r2, g2, b2, _]) = b;

    let dr = i32::from(r1) - i32::from(r2);
    let dg = i32::from(g1) - i32::from(g2);
    let db = i32::from(b1) - i32::from(b2);

    dr.unsigned_abs() + dg.unsigned_abs() + db.unsigned_abs()
}

/// One capture submitted for comparison
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    /// Owning session (test name)
    pub test_name: String,
    /// Checkpoint tag, unique within the session
    pub tag: String,
    /// The capture
    pub screenshot: Screenshot,
    /// Areas excluded from comparison
    pub ignore: Vec<MaskRegion>,
}

/// Outcome of one checkpoint comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckpointOutcome {
    /// Matches the baseline
    Passed,
    /// Differs from the baseline beyond the threshold
    Mismatch {
        /// Percentage of compared pixels that differ
        diff_percentage: f64,
        /// Diff image written for inspection
        diff_artifact: Option<PathBuf>,
    },
    /// No baseline existed; this capture became it
    NewBaseline {
        /// Where the baseline was written
        path: PathBuf,
    },
    /// The comparison could not be carried out
    Errored {
        /// What went wrong
        message: String,
    },
}

impl CheckpointOutcome {
    /// Counts against the session
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::Errored { .. })
    }
}

/// Tag plus outcome, in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResult {
    /// Checkpoint tag
    pub tag: String,
    /// Comparison outcome
    pub outcome: CheckpointOutcome,
}

/// Aggregate result of a closed visual session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionVerdict {
    /// Every checkpoint matched its baseline
    Passed,
    /// At least one mismatch or comparison error
    Failed,
    /// Nothing failed but at least one baseline was created
    New,
}

impl SessionVerdict {
    /// Failed beats New beats Passed
    #[must_use]
    pub fn from_results(results: &[CheckpointResult]) -> Self {
        if results.iter().any(|r| r.outcome.is_failure()) {
            Self::Failed
        } else if results
            .iter()
            .any(|r| matches!(r.outcome, CheckpointOutcome::NewBaseline { .. }))
        {
            Self::New
        } else {
            Self::Passed
        }
    }

    /// Only `Passed` is success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl fmt::Display for SessionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::New => "new",
        })
    }
}

/// Visual-testing seam
#[async_trait]
pub trait VisualBackend: Send + Sync {
    /// Start a session for `test_name`
    async fn open_session(&self, test_name: &str) -> MirarResult<()>;

    /// Compare one capture against its baseline
    async fn compare(&self, request: ComparisonRequest) -> MirarResult<CheckpointOutcome>;

    /// End the session, given every checkpoint result in submission order
    async fn close_session(
        &self,
        test_name: &str,
        results: &[CheckpointResult],
    ) -> MirarResult<SessionVerdict>;
}

/// File-name-safe form of a test name or tag, with a short digest so that
/// distinct names never collide after sanitising
fn file_stem(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = Sha256::digest(name.as_bytes());
    let short: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{safe}-{short}")
}

/// PNG baselines on disk
#[derive(Debug)]
pub struct BaselineStore {
    config: VisualConfig,
    open: Mutex<HashSet<String>>,
}

impl BaselineStore {
    /// Create a store using the directories and thresholds of `config`
    #[must_use]
    pub fn new(config: VisualConfig) -> Self {
        Self {
            config,
            open: Mutex::new(HashSet::new()),
        }
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Baseline location for a checkpoint
    #[must_use]
    pub fn baseline_path(&self, test_name: &str, tag: &str) -> PathBuf {
        Path::new(&self.config.baseline_dir)
            .join(file_stem(test_name))
            .join(format!("{}.png", file_stem(tag)))
    }

    /// Diff artifact location for a checkpoint
    #[must_use]
    pub fn diff_path(&self, test_name: &str, tag: &str) -> PathBuf {
        Path::new(&self.config.diff_dir)
            .join(file_stem(test_name))
            .join(format!("{}_diff.png", file_stem(tag)))
    }

    /// Whether a session is currently open for `test_name`
    #[must_use]
    pub fn is_open(&self, test_name: &str) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(test_name)
    }

    fn compare_blocking(
        config: &VisualConfig,
        baseline: &Path,
        diff: &Path,
        request: &ComparisonRequest,
    ) -> MirarResult<CheckpointOutcome> {
        if !baseline.exists() {
            if let Some(dir) = baseline.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(baseline, &request.screenshot.data)?;
            return Ok(CheckpointOutcome::NewBaseline {
                path: baseline.to_path_buf(),
            });
        }

        let expected = std::fs::read(baseline)?;
        let comparer = ImageComparer::new(config.threshold, config.color_threshold);
        let result = comparer.compare_images(&request.screenshot.data, &expected, &request.ignore)?;
        if result.matches {
            return Ok(CheckpointOutcome::Passed);
        }

        let diff_artifact = match result.diff_image {
            Some(ref data) => {
                if let Some(dir) = diff.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(diff, data)?;
                Some(diff.to_path_buf())
            }
            None => None,
        };
        if config.update_baselines {
            std::fs::write(baseline, &request.screenshot.data)?;
        }
        Ok(CheckpointOutcome::Mismatch {
            diff_percentage: result.diff_percentage,
            diff_artifact,
        })
    }
}

#[async_trait]
impl VisualBackend for BaselineStore {
    async fn open_session(&self, test_name: &str) -> MirarResult<()> {
        tokio::fs::create_dir_all(&self.config.baseline_dir).await?;
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(test_name.to_string());
        Ok(())
    }

    async fn compare(&self, request: ComparisonRequest) -> MirarResult<CheckpointOutcome> {
        let config = self.config.clone();
        let baseline = self.baseline_path(&request.test_name, &request.tag);
        let diff = self.diff_path(&request.test_name, &request.tag);
        let outcome = tokio::task::spawn_blocking(move || {
            Self::compare_blocking(&config, &baseline, &diff, &request)
        })
        .await
        .map_err(|e| MirarError::ImageComparison {
            message: format!("comparison task failed: {e}"),
        })??;
        Ok(outcome)
    }

    async fn close_session(
        &self,
        test_name: &str,
        results: &[CheckpointResult],
    ) -> MirarResult<SessionVerdict> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(test_name);
        Ok(SessionVerdict::from_results(results))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use tempfile::TempDir;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    mod comparer_tests {
        use super::*;

        #[test]
        fn test_identical_images() {
            let img = solid(10, 10, [255, 0, 0, 255]);
            let result = ImageComparer::new(0.01, 10)
                .compare_dynamic_images(&img, &img, &[])
                .unwrap();
            assert!(result.matches);
            assert!(result.is_identical());
            assert!(result.diff_image.is_none());
        }

        #[test]
        fn test_color_threshold_tolerates_small_drift() {
            let a = solid(10, 10, [100, 100, 100, 255]);
            let b = solid(10, 10, [103, 103, 103, 255]);
            let result = ImageComparer::new(0.0, 10)
                .compare_dynamic_images(&a, &b, &[])
                .unwrap();
            assert!(result.matches);
        }

        #[test]
        fn test_mismatch_produces_diff() {
            let a = solid(10, 10, [0, 0, 0, 255]);
            let b = solid(10, 10, [255, 255, 255, 255]);
            let result = ImageComparer::new(0.01, 10)
                .compare_dynamic_images(&a, &b, &[])
                .unwrap();
            assert!(!result.matches);
            assert_eq!(result.diff_percentage, 100.0);
            assert!(result.diff_image.is_some());
        }

        #[test]
        fn test_masked_pixels_are_skipped() {
            let mut a = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
            for x in 0..10 {
                for y in 0..3 {
                    a.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                }
            }
            let a = DynamicImage::ImageRgba8(a);
            let b = solid(10, 10, [0, 0, 0, 255]);
            let comparer = ImageComparer::new(0.0, 10);
            assert!(!comparer.compare_dynamic_images(&a, &b, &[]).unwrap().matches);
            let masked = comparer
                .compare_dynamic_images(&a, &b, &[MaskRegion::new(0, 0, 10, 3)])
                .unwrap();
            assert!(masked.matches);
            assert_eq!(masked.total_pixels, 70);
        }

        #[test]
        fn test_size_change_is_mismatch() {
            let a = solid(10, 10, [0, 0, 0, 255]);
            let b = solid(10, 12, [0, 0, 0, 255]);
            let result = ImageComparer::new(0.5, 10)
                .compare_dynamic_images(&a, &b, &[])
                .unwrap();
            assert!(!result.matches);
            assert_eq!(result.diff_pixel_count, 20);
        }

        #[test]
        fn test_bad_png() {
            let err = ImageComparer::new(0.01, 10)
                .compare_images(b"nope", b"nope", &[])
                .unwrap_err();
            assert_eq!(err.kind(), "ImageComparisonError");
        }
    }

    mod mask_tests {
        use super::*;

        #[test]
        fn test_mask_relative_and_clipped() {
            let capture = BoundingBox::new(100.0, 100.0, 50.0, 50.0);
            let area = BoundingBox::new(90.0, 120.0, 30.0, 100.0);
            assert_eq!(
                MaskRegion::within(&capture, &area),
                Some(MaskRegion::new(0, 20, 20, 30))
            );
            let outside = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
            assert_eq!(MaskRegion::within(&capture, &outside), None);
        }

        #[test]
        fn test_contains() {
            let m = MaskRegion::new(2, 2, 3, 3);
            assert!(m.contains(2, 2));
            assert!(m.contains(4, 4));
            assert!(!m.contains(5, 4));
        }

        #[test]
        fn test_contains_at_u32_edge() {
            let m: MaskRegion =
                serde_json::from_str(r#"{"x":4294967290,"y":0,"width":100,"height":10}"#)
                    .unwrap();
            assert!(m.contains(u32::MAX - 1, 5));
            assert!(!m.contains(0, 5));
            assert!(!m.contains(u32::MAX - 1, 10));
        }
    }

    mod verdict_tests {
        use super::*;

        fn result(outcome: CheckpointOutcome) -> CheckpointResult {
            CheckpointResult {
                tag: "t".to_string(),
                outcome,
            }
        }

        #[test]
        fn test_aggregation_order() {
            let new = result(CheckpointOutcome::NewBaseline {
                path: PathBuf::from("x.png"),
            });
            let mismatch = result(CheckpointOutcome::Mismatch {
                diff_percentage: 3.0,
                diff_artifact: None,
            });
            let errored = result(CheckpointOutcome::Errored {
                message: "boom".to_string(),
            });
            let passed = result(CheckpointOutcome::Passed);

            assert_eq!(SessionVerdict::from_results(&[]), SessionVerdict::Passed);
            assert_eq!(
                SessionVerdict::from_results(&[passed.clone(), new.clone()]),
                SessionVerdict::New
            );
            assert_eq!(
                SessionVerdict::from_results(&[new.clone(), mismatch]),
                SessionVerdict::Failed
            );
            assert_eq!(
                SessionVerdict::from_results(&[passed, errored]),
                SessionVerdict::Failed
            );
            assert!(!SessionVerdict::New.is_success());
        }

        #[test]
        fn test_outcome_json() {
            let json = serde_json::to_string(&CheckpointOutcome::Passed).unwrap();
            assert_eq!(json, r#"{"status":"passed"}"#);
        }
    }

    mod store_tests {
        use super::*;

        fn store(dir: &TempDir, update: bool) -> BaselineStore {
            BaselineStore::new(
                VisualConfig::default()
                    .with_baseline_dir(dir.path().join("baselines").display().to_string())
                    .with_diff_dir(dir.path().join("diffs").display().to_string())
                    .with_update_baselines(update),
            )
        }

        fn request(img: &DynamicImage) -> ComparisonRequest {
            ComparisonRequest {
                test_name: ".type() - type into a DOM element".to_string(),
                tag: "color: orange".to_string(),
                screenshot: Screenshot::from_image(img).unwrap(),
                ignore: Vec::new(),
            }
        }

        #[tokio::test]
        async fn test_new_then_passed() {
            let dir = TempDir::new().unwrap();
            let store = store(&dir, false);
            let img = solid(8, 8, [10, 20, 30, 255]);

            store.open_session("t").await.unwrap();
            assert!(store.is_open("t"));
            let first = store.compare(request(&img)).await.unwrap();
            assert!(matches!(first, CheckpointOutcome::NewBaseline { ref path } if path.exists()));
            let second = store.compare(request(&img)).await.unwrap();
            assert_eq!(second, CheckpointOutcome::Passed);
            store.close_session("t", &[]).await.unwrap();
            assert!(!store.is_open("t"));
        }

        #[tokio::test]
        async fn test_mismatch_writes_diff_and_keeps_baseline() {
            let dir = TempDir::new().unwrap();
            let store = store(&dir, false);
            store.compare(request(&solid(8, 8, [0, 0, 0, 255]))).await.unwrap();
            let outcome = store
                .compare(request(&solid(8, 8, [255, 255, 255, 255])))
                .await
                .unwrap();
            let diff = match outcome {
                CheckpointOutcome::Mismatch {
                    diff_percentage,
                    diff_artifact: Some(diff),
                } => {
                    assert_eq!(diff_percentage, 100.0);
                    diff
                }
                other => panic!("expected mismatch, got {other:?}"),
            };
            assert!(diff.exists());

            let again = store
                .compare(request(&solid(8, 8, [255, 255, 255, 255])))
                .await
                .unwrap();
            assert!(again.is_failure());
        }

        #[tokio::test]
        async fn test_update_baselines_overwrites_mismatch() {
            let dir = TempDir::new().unwrap();
            let store = store(&dir, true);
            store.compare(request(&solid(8, 8, [0, 0, 0, 255]))).await.unwrap();
            let white = solid(8, 8, [255, 255, 255, 255]);
            assert!(store.compare(request(&white)).await.unwrap().is_failure());
            assert_eq!(
                store.compare(request(&white)).await.unwrap(),
                CheckpointOutcome::Passed
            );
        }

        #[test]
        fn test_paths_are_safe_and_distinct() {
            let dir = TempDir::new().unwrap();
            let store = store(&dir, false);
            let a = store.baseline_path("t", "color: orange");
            let b = store.baseline_path("t", "color_ orange");
            assert_ne!(a, b);
            let name = a.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("color__orange-"));
            assert!(name.ends_with(".png"));
        }
    }
}
