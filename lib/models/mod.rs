//! The metadata model (data model §3): the set of entities persisted in the database.

mod account;
mod blob;
mod manifest;
mod naming;
mod peer;
mod quota;
mod repository;
mod tag;
mod trivy;
mod upload;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use account::*;
pub use blob::*;
pub use manifest::*;
pub use naming::*;
pub use peer::*;
pub use quota::*;
pub use repository::*;
pub use tag::*;
pub use trivy::*;
pub use upload::*;
