pub mod http;
pub mod stub;

pub use http::{HttpClassifier, HttpClassifierConfig};
pub use stub::StubClassifier;
