use image::RgbImage;

use crate::detect::region::Region;
use crate::error::Result;

/// Region detector trait.
///
/// A detector is fully loaded when it is constructed and holds no mutable
/// state afterwards, so one instance can be shared across threads or each
/// worker can own its own copy.
pub trait RegionDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Locate regions in `image`, in the backend's natural scan order.
    ///
    /// Every returned region lies inside the image. An image with nothing to
    /// find yields an empty vector.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Region>>;
}
