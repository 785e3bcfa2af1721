mod advice;
mod client;

pub use advice::{parse_advice, StructuredAdvice, REQUIRED_ADVICE_KEYS};
pub use client::{AdvisoryClient, AdvisoryRequest, AdvisoryResponse, ModelConfig, Provider};
