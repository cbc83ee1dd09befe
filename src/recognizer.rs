//! The recognizer handed to applications.
//!
//! [`LicensePlateRecognizer`] owns one loaded engine. Recognition runs on
//! tokio's blocking pool so the awaiting task never stalls the runtime, and
//! the engine sits behind a mutex so calls against one recognizer run one
//! at a time.

use tracing::{debug, info, warn};

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::LprConfig;
use crate::engine::PlateEngine;
use crate::error::{LprError, LprErrorKind};
use crate::frame::PlateImage;
use crate::plate::{PlateCandidate, RecognitionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerState {
    Ready,
    Released,
}

/// The engine slot and its readiness flag. The flag is read without the
/// lock, so state queries never wait on a running inference.
struct EngineHandle {
    slot: Mutex<Option<Box<dyn PlateEngine>>>,
    ready: AtomicBool,
}

impl EngineHandle {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn PlateEngine>>> {
        match self.slot.lock() {
            Ok(slot) => slot,
            Err(poisoned) => {
                let mut slot = poisoned.into_inner();
                if slot.take().is_some() {
                    warn!("engine lock poisoned, dropping the engine");
                }
                self.ready.store(false, Ordering::Release);
                slot
            },
        }
    }

    fn release(&self) {
        self.ready.store(false, Ordering::Release);
        if self.lock().take().is_some() {
            info!("plate recognizer released");
        }
    }

    fn run(&self, image: &PlateImage) -> Result<Vec<PlateCandidate>, LprError> {
        if !self.is_ready() {
            return Err(LprErrorKind::InvalidState.into());
        }
        let rgb = image.to_rgb()?;

        let mut slot = self.lock();
        // release may have won the race for the lock
        if !self.is_ready() {
            return Err(LprErrorKind::InvalidState.into());
        }
        let engine = slot.as_mut().ok_or(LprErrorKind::InvalidState)?;

        let now = Instant::now();
        let res = panic::catch_unwind(AssertUnwindSafe(|| engine.recognize(&rgb)));
        let mut candidates = match res {
            Ok(res) => res?,
            Err(_) => {
                // engine state is unknown after a panic, never call it again
                self.ready.store(false, Ordering::Release);
                slot.take();
                warn!("engine panicked, recognizer released");
                return Err(LprError::engine("engine panicked during recognition"));
            },
        };
        candidates.retain(|c| !c.code.is_empty());
        candidates.iter_mut().for_each(|c| c.confidence = c.confidence.clamp(0.0, 1.0));
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!("{} plates in {}x{} image, took {:.2?}", candidates.len(), rgb.width(), rgb.height(), now.elapsed());
        Ok(candidates)
    }
}

pub struct LicensePlateRecognizer {
    handle: Arc<EngineHandle>,
    engine_name: String,
    model_path: Option<PathBuf>,
}

impl LicensePlateRecognizer {

    /// Load the model directory at `model_path`, honouring its `lpr.json`.
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self, LprError> {
        let config = LprConfig::load(&model_path)?;
        Self::with_config(model_path, config)
    }

    #[cfg(feature = "tensorflow-engine")]
    pub fn with_config(model_path: impl AsRef<Path>, config: LprConfig) -> Result<Self, LprError> {
        let model_path = model_path.as_ref();
        if !model_path.is_dir() {
            return Err(LprError::model_load(model_path, "model directory does not exist"));
        }
        let engine = crate::engine::tf::TfPlateEngine::new(model_path, config)?;
        let mut recognizer = Self::with_engine(engine);
        recognizer.model_path = Some(model_path.to_path_buf());
        Ok(recognizer)
    }

    #[cfg(not(feature = "tensorflow-engine"))]
    pub fn with_config(model_path: impl AsRef<Path>, _config: LprConfig) -> Result<Self, LprError> {
        Err(LprError::model_load(model_path.as_ref(), "built without the tensorflow-engine feature"))
    }

    /// Wrap an already loaded engine.
    pub fn with_engine(engine: impl PlateEngine + 'static) -> Self {
        let engine_name = engine.name().to_string();
        info!("plate recognizer ready on {} engine", engine_name);
        let handle = EngineHandle {
            slot: Mutex::new(Some(Box::new(engine))),
            ready: AtomicBool::new(true),
        };
        Self { handle: Arc::new(handle), engine_name, model_path: None }
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn state(&self) -> RecognizerState {
        if self.handle.is_ready() {
            RecognizerState::Ready
        } else {
            RecognizerState::Released
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RecognizerState::Ready
    }

    /// Drop the engine. The recognizer reports `Released` at once and new
    /// calls fail with `InvalidState`, but this blocks the calling thread
    /// until a call in flight has finished. Use
    /// [`release_async`](Self::release_async) from async code. Releasing
    /// twice is a no-op.
    pub fn release(&self) {
        self.handle.release();
    }

    /// [`release`](Self::release) with the wait moved to the blocking pool.
    pub async fn release_async(&self) {
        self.handle.ready.store(false, Ordering::Release);
        let handle = Arc::clone(&self.handle);
        if let Err(e) = tokio::task::spawn_blocking(move || handle.release()).await {
            warn!("release worker stopped: {}", e);
        }
    }

    /// Recognize the most confident plate in `image`.
    ///
    /// Finding no plate is not an error: the result is
    /// [`RecognitionResult::empty`].
    pub async fn recognize(&self, image: PlateImage) -> Result<RecognitionResult, LprError> {
        let candidates = self.recognize_all(image).await?;
        Ok(best_of(&candidates))
    }

    /// Every plate in `image`, most confident first.
    pub async fn recognize_all(&self, image: PlateImage) -> Result<Vec<PlateCandidate>, LprError> {
        let handle = Arc::clone(&self.handle);
        tokio::task::spawn_blocking(move || handle.run(&image)).await?
    }

    /// [`recognize`](Self::recognize) bounded by `limit`. The engine call is
    /// not interrupted when the limit elapses; its result is discarded.
    pub async fn recognize_timeout(&self, image: PlateImage, limit: Duration) -> Result<RecognitionResult, LprError> {
        match tokio::time::timeout(limit, self.recognize(image)).await {
            Ok(res) => res,
            Err(_) => {
                warn!("plate recognition exceeded {:?}", limit);
                Err(LprErrorKind::Timeout(limit).into())
            },
        }
    }

    /// Synchronous recognition for callers outside an async runtime.
    pub fn recognize_blocking(&self, image: &PlateImage) -> Result<RecognitionResult, LprError> {
        let candidates = self.handle.run(image)?;
        Ok(best_of(&candidates))
    }
}

fn best_of(candidates: &[PlateCandidate]) -> RecognitionResult {
    candidates.first().map(RecognitionResult::from).unwrap_or_else(RecognitionResult::empty)
}

#[cfg(test)]
mod test {
    use image::RgbImage;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{LicensePlateRecognizer, RecognizerState};
    use crate::engine::PlateEngine;
    use crate::error::{LprError, LprErrorKind};
    use crate::frame::{PixelFormat, PlateImage};
    use crate::plate::{PlateCandidate, PlateType};

    /// Reports a fixed plate whenever the top-left pixel is white.
    struct MarkerEngine {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl MarkerEngine {
        fn new() -> Self {
            Self { calls: Arc::new(AtomicUsize::new(0)), delay: Duration::ZERO }
        }
    }

    impl PlateEngine for MarkerEngine {
        fn name(&self) -> &str {
            "marker"
        }

        fn recognize(&mut self, image: &RgbImage) -> Result<Vec<PlateCandidate>, LprError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if image.get_pixel(0, 0).0 != [255, 255, 255] {
                return Ok(vec![]);
            }
            Ok(vec![
                PlateCandidate {
                    bbox: [0, 0, 4, 2],
                    detection_score: 0.8,
                    code: "XYZ789".to_string(),
                    plate_type: PlateType::Yellow,
                    confidence: 0.55,
                },
                PlateCandidate {
                    bbox: [4, 2, 4, 2],
                    detection_score: 0.9,
                    code: "ABC123".to_string(),
                    plate_type: PlateType::Blue,
                    confidence: 0.93,
                },
                PlateCandidate {
                    bbox: [0, 2, 4, 2],
                    detection_score: 0.7,
                    code: String::new(),
                    plate_type: PlateType::Unknown,
                    confidence: 0.99,
                },
            ])
        }
    }

    struct FailingEngine;

    impl PlateEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn recognize(&mut self, _: &RgbImage) -> Result<Vec<PlateCandidate>, LprError> {
            Err(LprError::engine("session run failed"))
        }
    }

    struct PanickingEngine;

    impl PlateEngine for PanickingEngine {
        fn name(&self) -> &str {
            "panicking"
        }

        fn recognize(&mut self, _: &RgbImage) -> Result<Vec<PlateCandidate>, LprError> {
            panic!("native fault");
        }
    }

    fn plate_image() -> PlateImage {
        PlateImage::new(vec![255u8; 8 * 4 * 3], 8, 4, PixelFormat::Rgb8)
    }

    fn blank_image() -> PlateImage {
        PlateImage::new(vec![0u8; 8 * 4 * 3], 8, 4, PixelFormat::Rgb8)
    }

    #[tokio::test]
    async fn picks_most_confident_plate() {
        let recognizer = LicensePlateRecognizer::with_engine(MarkerEngine::new());
        assert_eq!(recognizer.state(), RecognizerState::Ready);
        assert_eq!(recognizer.engine_name(), "marker");

        let res = recognizer.recognize(plate_image()).await.unwrap();
        assert_eq!(res.code, "ABC123");
        assert_eq!(res.plate_type, PlateType::Blue);
        assert!((0.0..=1.0).contains(&res.confidence) && res.confidence > 0.5);
    }

    #[tokio::test]
    async fn all_plates_sorted_without_empty_codes() {
        let recognizer = LicensePlateRecognizer::with_engine(MarkerEngine::new());
        let plates = recognizer.recognize_all(plate_image()).await.unwrap();
        let codes: Vec<&str> = plates.iter().map(|p| p.code.as_str()).collect();
        assert_eq!(codes, vec!["ABC123", "XYZ789"]);
    }

    #[tokio::test]
    async fn no_plate_is_an_empty_result() {
        let recognizer = LicensePlateRecognizer::with_engine(MarkerEngine::new());
        let res = recognizer.recognize(blank_image()).await.unwrap();
        assert!(res.is_empty());
        assert_eq!(res.confidence, 0.0);
        assert_eq!(res.plate_type, PlateType::Unknown);
    }

    #[tokio::test]
    async fn same_image_same_answer() {
        let recognizer = LicensePlateRecognizer::with_engine(MarkerEngine::new());
        let image = plate_image();
        let first = recognizer.recognize(image.clone()).await.unwrap();
        let second = recognizer.recognize(image).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn invalid_image_never_reaches_engine() {
        let engine = MarkerEngine::new();
        let calls = Arc::clone(&engine.calls);
        let recognizer = LicensePlateRecognizer::with_engine(engine);

        let empty = PlateImage::new(Vec::<u8>::new(), 0, 0, PixelFormat::Rgb8);
        let err = recognizer.recognize(empty).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidImage(_)));

        let short = PlateImage::new(vec![0u8; 10], 8, 4, PixelFormat::Bgra8);
        let err = recognizer.recognize(short).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidImage(_)));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(recognizer.is_ready());
    }

    #[tokio::test]
    async fn engine_failures_are_reported() {
        let recognizer = LicensePlateRecognizer::with_engine(FailingEngine);
        let err = recognizer.recognize(plate_image()).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::Engine(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn engine_panic_releases_the_recognizer() {
        let recognizer = LicensePlateRecognizer::with_engine(PanickingEngine);
        let err = recognizer.recognize(plate_image()).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::Engine(_)));
        assert_eq!(recognizer.state(), RecognizerState::Released);

        let err = recognizer.recognize(plate_image()).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidState));
        let err = recognizer.recognize_blocking(&plate_image()).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidState));
    }

    #[tokio::test]
    async fn overflowing_stride_leaves_recognizer_usable() {
        let engine = MarkerEngine::new();
        let calls = Arc::clone(&engine.calls);
        let recognizer = LicensePlateRecognizer::with_engine(engine);

        let huge = PlateImage::with_stride(vec![0u8; 12], 1, 3, PixelFormat::Rgb8, usize::MAX / 2 + 1);
        let err = recognizer.recognize(huge).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidImage(_)));
        assert_eq!(recognizer.state(), RecognizerState::Ready);

        let res = recognizer.recognize(plate_image()).await.unwrap();
        assert_eq!(res.code, "ABC123");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_recognizer_rejects_calls() {
        let recognizer = LicensePlateRecognizer::with_engine(MarkerEngine::new());
        recognizer.release();
        recognizer.release();
        assert_eq!(recognizer.state(), RecognizerState::Released);

        let err = recognizer.recognize(plate_image()).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidState));
        assert!(!err.is_retryable());

        let err = recognizer.recognize_blocking(&plate_image()).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidState));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_are_serialized() {
        let mut engine = MarkerEngine::new();
        engine.delay = Duration::from_millis(20);
        let calls = Arc::clone(&engine.calls);
        let recognizer = Arc::new(LicensePlateRecognizer::with_engine(engine));

        let tasks: Vec<_> = (0..4).map(|_| {
            let recognizer = Arc::clone(&recognizer);
            tokio::spawn(async move { recognizer.recognize(plate_image()).await })
        }).collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().code, "ABC123");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_waits_for_call_in_flight() {
        let mut engine = MarkerEngine::new();
        engine.delay = Duration::from_millis(200);
        let calls = Arc::clone(&engine.calls);
        let recognizer = Arc::new(LicensePlateRecognizer::with_engine(engine));

        let in_flight = {
            let recognizer = Arc::clone(&recognizer);
            tokio::spawn(async move { recognizer.recognize(plate_image()).await })
        };
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        recognizer.release_async().await;
        assert_eq!(recognizer.state(), RecognizerState::Released);

        let res = in_flight.await.unwrap().unwrap();
        assert_eq!(res.code, "ABC123");
        let err = recognizer.recognize(plate_image()).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidState));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn state_does_not_wait_for_inference() {
        let mut engine = MarkerEngine::new();
        engine.delay = Duration::from_millis(300);
        let calls = Arc::clone(&engine.calls);
        let recognizer = Arc::new(LicensePlateRecognizer::with_engine(engine));

        let in_flight = {
            let recognizer = Arc::clone(&recognizer);
            tokio::spawn(async move { recognizer.recognize(plate_image()).await })
        };
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let now = std::time::Instant::now();
        assert!(recognizer.is_ready());
        assert!(now.elapsed() < Duration::from_millis(100));
        in_flight.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn slow_engine_times_out() {
        let mut engine = MarkerEngine::new();
        engine.delay = Duration::from_millis(300);
        let recognizer = LicensePlateRecognizer::with_engine(engine);

        let err = recognizer.recognize_timeout(plate_image(), Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::Timeout(_)));

        let res = recognizer.recognize_timeout(plate_image(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(res.code, "ABC123");
    }

    #[test]
    fn blocking_path_matches_async() {
        let recognizer = LicensePlateRecognizer::with_engine(MarkerEngine::new());
        let res = recognizer.recognize_blocking(&plate_image()).unwrap();
        assert_eq!(res.code, "ABC123");
    }

    #[test]
    fn missing_model_directory_fails_to_load() {
        let err = LicensePlateRecognizer::new("/no/such/model").err().unwrap();
        assert!(matches!(err.kind(), LprErrorKind::ModelLoad { .. }));
    }

    #[test]
    fn model_directory_without_graphs_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = LicensePlateRecognizer::new(dir.path()).err().unwrap();
        assert!(matches!(err.kind(), LprErrorKind::ModelLoad { .. }));
    }

    #[cfg(feature = "tensorflow-engine")]
    #[test]
    fn malformed_graph_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["detect.pb", "fine_mapping.pb", "ocr_plate_all_gru.pb"] {
            std::fs::write(dir.path().join(name), b"not a graph").unwrap();
        }
        let err = LicensePlateRecognizer::new(dir.path()).err().unwrap();
        assert!(matches!(err.kind(), LprErrorKind::ModelLoad { .. }));
    }
}
