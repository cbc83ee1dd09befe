//! License plate recognition behind an async, owned recognizer handle.
//!
//! ```no_run
//! # async fn run() -> Result<(), lpr_wrapper::LprError> {
//! use lpr_wrapper::{LicensePlateRecognizer, PlateImage};
//!
//! let recognizer = LicensePlateRecognizer::new("./models")?;
//! let res = recognizer.recognize(PlateImage::open("car.jpg")?).await?;
//! println!("{} {} {}", res.code, res.plate_type, res.confidence);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod plate;
pub mod recognizer;
pub mod utils;

pub use config::LprConfig;
pub use engine::PlateEngine;
pub use error::{LprError, LprErrorKind};
pub use frame::{PixelFormat, PlateImage};
pub use plate::{PlateCandidate, PlateType, RecognitionResult};
pub use recognizer::{LicensePlateRecognizer, RecognizerState};
