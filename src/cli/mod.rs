pub mod auth;
pub mod output;
pub mod request;
pub mod serve;
pub mod status;
