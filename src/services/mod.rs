pub mod live_channel;
#[cfg(test)]
pub mod mock_n8n;
pub mod n8n;
pub mod scoring;
