pub mod info;
pub mod patch;
