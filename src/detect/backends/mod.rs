pub mod rustface;
pub mod stub;

pub use self::rustface::{RustfaceDetector, ScanSettings};
pub use stub::StubDetector;
