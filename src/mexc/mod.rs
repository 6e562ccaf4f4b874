pub mod client;

pub use client::MexcClient;
