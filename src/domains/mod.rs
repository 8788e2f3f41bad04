pub mod export;
pub mod response;
pub mod survey;
