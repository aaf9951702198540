//! Host filesystem side of the server: DOS name handling, attribute
//! translation, path resolution and the identifier table.

pub mod attrs;
pub mod fcb;
pub mod items;
pub mod resolve;

pub use attrs::{attr, FileProps};
pub use fcb::FcbName;
pub use items::{ItemTable, NO_ITEM};
pub use resolve::ResolveError;
