pub mod pull;
pub mod status;
pub mod summarise;
