pub mod conn;
pub mod listener;
