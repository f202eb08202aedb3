pub mod executor;
pub mod progress;
pub mod types;

pub use executor::*;
pub use progress::*;
pub use types::*;
