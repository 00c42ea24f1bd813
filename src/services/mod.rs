pub mod diagnosis;
pub mod gemini;
pub mod queue;
pub mod recommend;
pub mod status;
pub mod storage;
pub mod upload;
pub mod worker;
