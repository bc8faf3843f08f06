//! Database table operations

mod link_table;
mod play_table;
mod session_table;
mod user_table;

pub use link_table::LinkTable;
pub use play_table::PlayTable;
pub use session_table::SessionTable;
pub use user_table::UserTable;
