// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, warn};

/// Runs `action` against `state`, retrying errors accepted by `is_retriable`
/// with exponential backoff until `max_attempts` is exhausted.
///
/// `target_label` and `op_label` identify the remote target and operation in
/// logs; `op_id` optionally identifies the affected entity.
pub async fn with_retries<In, F, G, R, E>(
    target_label: &'static str,
    op_label: &'static str,
    op_id: Option<String>,
    config: &RetryConfig,
    state: &In,
    action: F,
    is_retriable: G,
) -> Result<R, E>
where
    E: Display,
    F: for<'a> Fn(&'a In) -> Pin<Box<dyn Future<Output = Result<R, E>> + 'a + Send>>,
    G: Fn(&E) -> bool,
{
    let mut attempts: u32 = 0;
    let mut delay = config.min_delay;
    let op = match &op_id {
        Some(op_id) => format!("{target_label} {op_label} [{op_id}]"),
        None => format!("{target_label} {op_label}"),
    };

    loop {
        attempts += 1;
        match action(state).await {
            Ok(result) => {
                if attempts > 1 {
                    info!("{op} succeeded after {attempts} attempts");
                }
                return Ok(result);
            }
            Err(error) if attempts < config.max_attempts && is_retriable(&error) => {
                warn!(
                    "{op} failed with {error}, retrying in {delay:?} ({attempts}/{})",
                    config.max_attempts
                );
                tokio::time::sleep(jittered(delay, config.max_jitter_factor)).await;
                delay = next_delay(delay, config);
            }
            Err(error) => return Err(error),
        }
    }
}

fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    delay.mul_f64(config.multiplier).min(config.max_delay)
}

fn jittered(delay: Duration, max_jitter_factor: Option<f64>) -> Duration {
    match max_jitter_factor {
        Some(max_jitter_factor) => delay.mul_f64(1.0 + max_jitter_factor * fastrand::f64()),
        None => delay,
    }
}
