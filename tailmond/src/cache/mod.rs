pub mod db;
pub mod handle;
