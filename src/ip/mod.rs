pub mod engine;
pub mod icmp;
pub mod packet;
pub mod route;
