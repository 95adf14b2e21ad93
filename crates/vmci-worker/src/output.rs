//! Shell output that mirrors itself into a dispatcher record.

use async_trait::async_trait;
use tracing::warn;

use vmci_client::DispatcherClient;
use vmci_core::shell::{BufferedShellOutput, ShellOutput};
use vmci_core::{TaskId, WorkerId};

/// Terminal-style buffer for one `(task, index)` record.
///
/// After every write the full text is posted to the dispatcher, replacing
/// the previous content of the record. Failed posts are logged and dropped;
/// the next write posts the complete text again.
pub struct ServerShellOutput {
    client: DispatcherClient,
    worker_id: WorkerId,
    task_id: TaskId,
    index: u32,
    buffer: BufferedShellOutput,
}

impl ServerShellOutput {
    pub fn new(client: DispatcherClient, worker_id: WorkerId, task_id: TaskId, index: u32) -> Self {
        Self {
            client,
            worker_id,
            task_id,
            index,
            buffer: BufferedShellOutput::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn text(&self) -> String {
        self.buffer.text()
    }

    async fn append(&mut self, s: &str) {
        self.buffer.write(s);
        let text = self.buffer.text();
        if let Err(e) = self
            .client
            .update_shell(&self.worker_id, &self.task_id, self.index, &text)
            .await
        {
            warn!(
                task_id = %self.task_id,
                index = self.index,
                error = %e,
                "Failed to post shell output"
            );
        }
    }
}

#[async_trait]
impl ShellOutput for ServerShellOutput {
    async fn write_standard_output(&mut self, s: &str) {
        self.append(s).await;
    }

    async fn write_standard_error(&mut self, s: &str) {
        self.append(s).await;
    }
}
