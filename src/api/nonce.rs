use super::error::ProtocolError;
use parking_lot::Mutex;
use reqwest::{header::HeaderMap, Client};
use std::collections::VecDeque;

const REPLAY_NONCE: &str = "replay-nonce";

/// A pool of unused anti-replay nonces handed out by the server
#[derive(Debug)]
pub(crate) struct Pool {
    pool: Mutex<VecDeque<String>>,
    max: usize,
}

impl Pool {
    pub fn new(max: usize) -> Self {
        Pool {
            pool: Mutex::default(),
            max,
        }
    }

    /// Get a nonce used to sign the request, fetching a fresh one when the pool is empty
    pub async fn get(&self, url: &str, client: &Client) -> Result<String, ProtocolError> {
        let cached = self.pool.lock().pop_front();
        if let Some(nonce) = cached {
            return Ok(nonce);
        }

        let response = client.head(url).send().await?;
        let nonce = response
            .headers()
            .get(REPLAY_NONCE)
            .ok_or(ProtocolError::MissingHeader(REPLAY_NONCE))?
            .to_str()
            .map_err(|e| ProtocolError::InvalidHeader(REPLAY_NONCE, e))?
            .to_owned();
        Ok(nonce)
    }

    /// Keep the nonce from the `Replay-Nonce` header if it exists
    pub fn extract_from_headers(&self, headers: &HeaderMap) -> Result<(), ProtocolError> {
        if let Some(nonce) = headers.get(REPLAY_NONCE) {
            let nonce = nonce
                .to_str()
                .map_err(|e| ProtocolError::InvalidHeader(REPLAY_NONCE, e))?
                .to_owned();

            let mut pool = self.pool.lock();
            pool.push_back(nonce);

            // Prevent the nonce pool from growing unnecessarily large
            if pool.len() > self.max {
                pool.pop_front();
            }
        }

        Ok(())
    }
}
