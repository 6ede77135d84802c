pub mod config;
pub mod db;
pub mod handlers;
pub mod ingest;
pub mod model;
pub mod openai;
pub mod pipeline;
pub mod publisher;
pub mod quality;
pub mod scheduler;
pub mod summarizer;
