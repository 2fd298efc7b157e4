mod backend;
mod backends;
mod builder;
mod region;

pub use backend::RegionDetector;
pub use backends::{RustfaceDetector, ScanSettings, StubDetector};
pub use builder::{DetectorBuilder, MIN_FACE_SIZE_FLOOR};
pub use region::Region;
