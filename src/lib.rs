//! clawserve
//!
//! Two small chat endpoints over a local language model: a gateway that
//! forwards prompts to a generation daemon, and a service that runs a GGUF
//! model in-process through llama.cpp.

pub mod direct;
pub mod gateway;
pub mod inference;
pub mod server;
pub mod storage;
pub mod system;
pub mod types;
