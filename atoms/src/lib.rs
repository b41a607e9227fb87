pub mod drawing;
pub mod dynamo;
pub mod media;
pub mod studies;
