pub mod config;
pub mod error;
pub mod requests;
pub mod workflow;

pub use config::*;
pub use error::*;
pub use requests::*;
pub use workflow::*;
