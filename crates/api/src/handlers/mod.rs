pub mod completion;
pub mod jobs;
pub mod profiles;
