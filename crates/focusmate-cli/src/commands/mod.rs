pub mod cache;
pub mod check;
pub mod daemon;
pub mod helpers;
pub mod init;
pub mod session;
pub mod tab;
