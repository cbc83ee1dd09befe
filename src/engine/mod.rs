use image::RgbImage;

use crate::error::LprError;
use crate::plate::PlateCandidate;

pub mod decode;
#[cfg(feature = "tensorflow-engine")]
pub mod tf;

/// A loaded recognition model.
///
/// Implementations are not required to be reentrant; the recognizer holds
/// each engine behind a mutex and calls it from one worker at a time.
pub trait PlateEngine: Send {
    fn name(&self) -> &str;

    /// Find every plate in `image`. An image without plates is `Ok(vec![])`.
    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<PlateCandidate>, LprError>;
}

impl<E: PlateEngine + ?Sized> PlateEngine for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn recognize(&mut self, image: &RgbImage) -> Result<Vec<PlateCandidate>, LprError> {
        (**self).recognize(image)
    }
}
