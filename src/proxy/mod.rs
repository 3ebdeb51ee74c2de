pub mod codec;
pub mod connect;
pub mod detect;
pub mod disguise;
pub mod forward;
pub mod server;
pub mod session;
pub mod socks5;

pub use server::Trampoline;
