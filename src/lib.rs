mod configuration;
mod context;
mod definition;
mod error;
mod filter;
pub mod filters;
mod manager;
mod options;
mod provider;
mod record;
mod session;
mod snapshot;
mod targeting;
mod test_common;
mod util;

pub use configuration::*;
pub use context::*;
pub use definition::*;
pub use error::*;
pub use filter::*;
pub use manager::*;
pub use options::*;
pub use provider::*;
pub use record::*;
pub use session::*;
pub use snapshot::*;
pub use targeting::*;
