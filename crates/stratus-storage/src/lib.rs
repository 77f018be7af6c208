//! stratus-storage: OpenDAL access to the remote catalog and file content

pub mod catalog;
pub mod content;
pub mod health;
pub mod operator;

pub use catalog::{load_catalog, parse_index_entry};
pub use content::read_range;
pub use health::check_health;
pub use operator::{build_operator, needs_credentials, Credentials};
