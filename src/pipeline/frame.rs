//! Frame processing
//!
//! One frame runs through detection, resolution, confirmation and the
//! entry/exit log. Closed visits are pushed to the sync target when one is
//! configured.

use std::sync::Arc;
use std::time::Instant;

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use tracing::{debug, warn};

use super::resolver::PlateResolver;
use crate::classification::PlateClassifier;
use crate::error::Result;
use crate::storage::VehicleStore;
use crate::sync::{sync_record, SyncTarget};
use crate::tracking::{ConfirmationTracker, EntryExitTracker, VehicleEvent, VoteOutcome};
use crate::vision::PlateCrop;

/// Finds plate regions in a frame
pub trait PlateDetector: Send {
    fn detect(&self, frame: &RgbImage) -> Vec<PlateCrop>;
}

/// Treats the whole frame as a single plate crop
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeFrameDetector;

impl PlateDetector for WholeFrameDetector {
    fn detect(&self, frame: &RgbImage) -> Vec<PlateCrop> {
        let crop = PlateCrop::new(frame.clone());
        if crop.is_empty() {
            Vec::new()
        } else {
            vec![crop]
        }
    }
}

/// Edge-contour detector for plate-shaped regions
#[derive(Debug, Clone)]
pub struct ContourPlateDetector {
    /// Minimum bounding-box area in pixels
    pub min_area: u32,
    /// Accepted width/height ratio range
    pub min_ratio: f32,
    pub max_ratio: f32,
    /// Horizontal and vertical padding as a fraction of the box size
    pub pad: (f32, f32),
    pub max_results: usize,
}

impl Default for ContourPlateDetector {
    fn default() -> Self {
        Self {
            min_area: 1500,
            min_ratio: 2.0,
            max_ratio: 6.0,
            pad: (0.1, 0.2),
            max_results: 3,
        }
    }
}

impl ContourPlateDetector {
    fn edge_map(frame: &RgbImage) -> GrayImage {
        let gray = image::imageops::grayscale(frame);
        let blurred = gaussian_blur_f32(&gray, 1.1);
        let edges = canny(&blurred, 100.0, 200.0);
        dilate(&edges, Norm::LInf, 1)
    }

    /// Candidate boxes (x, y, width, height), largest first
    pub fn plate_boxes(&self, frame: &RgbImage) -> Vec<(u32, u32, u32, u32)> {
        if frame.width() == 0 || frame.height() == 0 {
            return Vec::new();
        }

        let mut boxes: Vec<(u32, u32, u32, u32)> = find_contours::<u32>(&Self::edge_map(frame))
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter_map(|c| {
                let min_x = c.points.iter().map(|p| p.x).min()?;
                let max_x = c.points.iter().map(|p| p.x).max()?;
                let min_y = c.points.iter().map(|p| p.y).min()?;
                let max_y = c.points.iter().map(|p| p.y).max()?;
                Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
            })
            .filter(|&(_, _, w, h)| {
                let ratio = w as f32 / h as f32;
                w * h >= self.min_area && (self.min_ratio..=self.max_ratio).contains(&ratio)
            })
            .collect();

        boxes.sort_by_key(|&(_, _, w, h)| std::cmp::Reverse(w * h));
        boxes.truncate(self.max_results);
        boxes
    }
}

impl PlateDetector for ContourPlateDetector {
    fn detect(&self, frame: &RgbImage) -> Vec<PlateCrop> {
        self.plate_boxes(frame)
            .into_iter()
            .map(|(x, y, w, h)| {
                let pad_w = (w as f32 * self.pad.0) as u32;
                let pad_h = (h as f32 * self.pad.1) as u32;
                let x1 = x.saturating_sub(pad_w);
                let y1 = y.saturating_sub(pad_h);
                let x2 = (x + w + pad_w).min(frame.width());
                let y2 = (y + h + pad_h).min(frame.height());
                PlateCrop::from_region(frame, x1, y1, x2 - x1, y2 - y1)
            })
            .filter(|crop| !crop.is_empty())
            .collect()
    }
}

/// Runs frames through the full recognition and logging chain
pub struct FrameProcessor {
    detector: Box<dyn PlateDetector>,
    resolver: PlateResolver,
    classifier: Box<dyn PlateClassifier>,
    confirmations: Arc<ConfirmationTracker>,
    vehicles: EntryExitTracker,
    store: Box<dyn VehicleStore>,
    sync: Option<Box<dyn SyncTarget>>,
    required_hits: Option<u32>,
}

impl FrameProcessor {
    pub fn new(
        detector: Box<dyn PlateDetector>,
        resolver: PlateResolver,
        classifier: Box<dyn PlateClassifier>,
        confirmations: Arc<ConfirmationTracker>,
        store: Box<dyn VehicleStore>,
    ) -> Self {
        Self {
            detector,
            resolver,
            classifier,
            confirmations,
            vehicles: EntryExitTracker::new(),
            store,
            sync: None,
            required_hits: None,
        }
    }

    /// Push closed visits to `target` as they happen
    pub fn with_sync(mut self, target: Box<dyn SyncTarget>) -> Self {
        self.sync = Some(target);
        self
    }

    /// Override the confirmation threshold for this processor
    pub fn with_required_hits(mut self, hits: Option<u32>) -> Self {
        self.required_hits = hits;
        self
    }

    pub fn store(&self) -> &dyn VehicleStore {
        self.store.as_ref()
    }

    pub fn vehicles(&self) -> &EntryExitTracker {
        &self.vehicles
    }

    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<Vec<VehicleEvent>> {
        self.process_frame_at(frame, Instant::now())
    }

    /// Process a frame observed at `now`
    pub fn process_frame_at(&mut self, frame: &RgbImage, now: Instant) -> Result<Vec<VehicleEvent>> {
        let crops = self.detector.detect(frame);
        debug!("Detected {} plate regions", crops.len());

        let mut events = Vec::new();
        for crop in &crops {
            let Some(plate) = self.resolver.resolve(crop) else {
                continue;
            };

            let outcome = self
                .confirmations
                .register_vote_with(&plate.text, plate.confidence, self.required_hits);
            if let VoteOutcome::Pending { count, required } = outcome {
                debug!("Plate {} pending ({}/{})", plate.text, count, required);
                continue;
            }

            let vehicle_type = self.classifier.classify(crop);
            let event = self.vehicles.observe(
                &plate.text,
                vehicle_type,
                now,
                &self.confirmations,
                self.store.as_ref(),
            )?;

            if let (VehicleEvent::Exit(record), Some(target)) = (&event, &self.sync) {
                if let Err(e) = sync_record(self.store.as_ref(), target.as_ref(), record) {
                    warn!("Sync failed for {}: {}", record.plate, e);
                }
            }
            events.push(event);
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::YellowPlateClassifier;
    use crate::config::{AppConfig, TrackingSettings};
    use crate::error::Result as PipelineResult;
    use crate::storage::{SqliteStore, VehicleRecord};
    use crate::vision::{OcrResult, TextRecognizer};
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use parking_lot::Mutex;

    struct ConstantOcr(&'static str);

    impl TextRecognizer for ConstantOcr {
        fn recognize(&self, _image: &GrayImage, _allowlist: &str) -> PipelineResult<Vec<OcrResult>> {
            Ok(vec![OcrResult::new(self.0, vec![], 0.9)])
        }

        fn recognize_paragraph(&self, _image: &GrayImage) -> PipelineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct SharedTarget(Arc<Mutex<Vec<String>>>);

    impl SyncTarget for SharedTarget {
        fn push(&self, record: &VehicleRecord) -> PipelineResult<()> {
            self.0.lock().push(record.plate.clone());
            Ok(())
        }
    }

    fn processor(text: &'static str) -> FrameProcessor {
        let config = AppConfig::default();
        let resolver = PlateResolver::with_config(Arc::new(ConstantOcr(text)), &config).unwrap();
        FrameProcessor::new(
            Box::new(WholeFrameDetector),
            resolver,
            Box::new(YellowPlateClassifier),
            Arc::new(ConfirmationTracker::new(&TrackingSettings::default())),
            Box::new(SqliteStore::open_in_memory().unwrap()),
        )
    }

    #[test]
    fn test_whole_frame_detector() {
        assert_eq!(WholeFrameDetector.detect(&RgbImage::new(20, 10)).len(), 1);
        assert!(WholeFrameDetector.detect(&RgbImage::new(0, 10)).is_empty());
    }

    #[test]
    fn test_contour_detector_finds_plate_shape() {
        let mut frame = RgbImage::new(400, 200);
        draw_filled_rect_mut(&mut frame, Rect::at(100, 80).of_size(150, 40), Rgb([255, 255, 255]));

        let crops = ContourPlateDetector::default().detect(&frame);
        assert_eq!(crops.len(), 1);
        assert!((150..=200).contains(&crops[0].width()));
        assert!((40..=70).contains(&crops[0].height()));
    }

    #[test]
    fn test_contour_detector_ignores_blank_and_square() {
        let detector = ContourPlateDetector::default();
        assert!(detector.detect(&RgbImage::new(200, 100)).is_empty());

        let mut frame = RgbImage::new(300, 300);
        draw_filled_rect_mut(&mut frame, Rect::at(100, 100).of_size(80, 80), Rgb([255, 255, 255]));
        assert!(detector.detect(&frame).is_empty());
    }

    #[test]
    fn test_entry_needs_two_frames_then_exit_syncs() {
        let pushed = Arc::new(Mutex::new(Vec::new()));
        let mut processor = processor("KA05WB1234").with_sync(Box::new(SharedTarget(pushed.clone())));
        let frame = RgbImage::from_pixel(120, 40, Rgb([240, 240, 240]));
        let now = Instant::now();

        assert!(processor.process_frame_at(&frame, now).unwrap().is_empty());

        let events = processor.process_frame_at(&frame, now).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], VehicleEvent::Entry(r) if r.plate == "KA05WB1234"));
        assert!(processor.vehicles().is_on_site("KA05WB1234"));

        assert!(processor.process_frame_at(&frame, now).unwrap().is_empty());
        let events = processor.process_frame_at(&frame, now).unwrap();
        assert!(matches!(&events[0], VehicleEvent::Exit(_)));

        assert_eq!(*pushed.lock(), vec!["KA05WB1234"]);
        assert!(processor.store().unsynced().unwrap().is_empty());
    }

    #[test]
    fn test_single_hit_override() {
        let mut processor = processor("MH12AB1234").with_required_hits(Some(1));
        let frame = RgbImage::from_pixel(120, 40, Rgb([240, 240, 240]));
        let events = processor.process_frame(&frame).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plate(), "MH12AB1234");
    }
}
