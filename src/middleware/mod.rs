pub mod decrypt;
pub mod timing;
pub mod trusted_subnet;
