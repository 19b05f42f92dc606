pub mod connection;
pub mod schema;
pub mod queries;
pub mod store;

pub use connection::*;
pub use schema::*;
pub use queries::*;
pub use store::*;
