pub mod cbuffer;
pub mod compiler;
pub mod config;
pub mod cursor;
pub mod database;
pub mod dtype;
pub mod error;
pub mod file_pager;
pub mod hash_map;
pub mod io;
pub mod pager;
pub mod paging;
pub mod rptree;
pub mod transaction;
pub mod types;
pub mod utils;
pub mod wal;

pub use database::{Database, ExecOutput};
pub use error::{DbError, ErrorKind};
