pub mod configure;
pub mod log;
pub mod plot;
