pub mod gateway;
pub mod message;
