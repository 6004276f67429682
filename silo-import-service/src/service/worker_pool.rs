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

use silo_common::model::WorkerNode;
use std::fmt;
use std::fmt::{Display, Formatter};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// FIFO pool of the reachable worker nodes.
///
/// Workers are owned by the pool except while checked out to a job; each
/// successful `acquire` must be paired with exactly one `release`.
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<WorkerNode>,
    receiver: Mutex<mpsc::UnboundedReceiver<WorkerNode>>,
}

impl WorkerPool {
    pub fn new(nodes: Vec<WorkerNode>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        for node in nodes {
            sender
                .send(node)
                .expect("Worker pool channel closed during setup");
        }
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Blocks until a worker is available. Acquirers are served in arrival
    /// order; cancelling `token` aborts the wait without checking out a
    /// worker.
    pub async fn acquire(&self, token: &CancellationToken) -> Result<WorkerNode, WorkerPoolError> {
        tokio::select! {
            _ = token.cancelled() => Err(WorkerPoolError::Cancelled),
            node = async { self.receiver.lock().await.recv().await } => {
                node.ok_or(WorkerPoolError::Closed)
            }
        }
    }

    pub fn release(&self, node: WorkerNode) {
        if let Err(err) = self.sender.send(node) {
            error!("Failed to return worker {} to the pool", err.0);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolError {
    Cancelled,
    Closed,
}

impl Display for WorkerPoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WorkerPoolError::Cancelled => write!(f, "Worker acquisition was cancelled"),
            WorkerPoolError::Closed => write!(f, "Worker pool is closed"),
        }
    }
}

impl std::error::Error for WorkerPoolError {}
