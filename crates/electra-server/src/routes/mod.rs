pub mod assets;
pub mod dispatch;
pub mod jobs;
