pub mod api;
pub mod envelope;
pub mod ids;

pub use api::*;
pub use envelope::*;
pub use ids::*;
