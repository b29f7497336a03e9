//! HTTP client shared by the provider adapters

mod client;

pub use client::{classify_status, retry_after_secs, HttpClient, HttpClientBuilder, JsonResponse};
