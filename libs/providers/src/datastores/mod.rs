pub mod sqldatabase;

pub use sqldatabase::{RecipeReference, SqlDatabaseProcessor, SqlDatabaseProperties, SqlDatabaseStatus};
