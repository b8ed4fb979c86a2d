pub mod types;
pub mod snapshot;
pub mod loader;
pub mod validator;
pub mod provider;

pub use types::*;
pub use snapshot::*;
pub use loader::*;
pub use validator::*;
pub use provider::*;
