//! The worker's dispatch loop.
//!
//! A [`ConcurrentTaskLoop`] polls the dispatcher for tasks and runs up to
//! `concurrency` of them at once; a [`TaskLoop`] sends keep-alives. Both run
//! on their own OS threads and enter async code by blocking on a shared
//! runtime handle, so each pool thread drives exactly one task at a time.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use vmci_client::{ClientError, DispatcherClient};
use vmci_core::shell::{split_into_command_lines, NullShellOutput, ShellOutput};
use vmci_core::{BoxError, ConcurrentTaskLoop, LoopHealth, Task, TaskId, TaskLoop, WorkerId};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::instance::{InstanceRegistry, WorkerInstance};
use crate::output::ServerShellOutput;
use crate::remote_shell::ShellError;

/// Exit code reported when no command could run because the instance failed.
pub const INSTANCE_FAILURE_EXIT_CODE: i32 = -1;

/// Exit code reported for a command that exceeded its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 1;

/// Executes single tasks end to end: instance up, scripts, report, instance down.
pub struct TaskRunner {
    client: DispatcherClient,
    worker_id: WorkerId,
    driver: String,
    registry: InstanceRegistry,
}

impl TaskRunner {
    pub fn new(
        client: DispatcherClient,
        worker_id: WorkerId,
        driver: impl Into<String>,
        registry: InstanceRegistry,
    ) -> Self {
        Self {
            client,
            worker_id,
            driver: driver.into(),
            registry,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub async fn poll(&self) -> Result<Option<Task>, ClientError> {
        let task = self.client.poll(&self.worker_id).await?;
        if let Some(task) = &task {
            info!(task_id = %task.id, machine = %task.configuration.machine, "Task leased");
        }
        Ok(task)
    }

    pub async fn keep_alive(&self) -> Result<(), ClientError> {
        self.client.keep_alive(&self.worker_id).await?;
        debug!(worker_id = %self.worker_id, "Keep-alive sent");
        Ok(())
    }

    /// Run a leased task and report its outcome. Returns the reported exit code.
    ///
    /// Output records: index 0 announces the machine start, every checkout and
    /// test command gets the next index, and the last record holds the exit
    /// code. The instance is always torn down, after the outcome is reported.
    pub async fn run(&self, task: Task) -> Result<i32, WorkerError> {
        info!(
            task_id = %task.id,
            machine = %task.configuration.machine,
            driver = %self.driver,
            "Processing task"
        );

        let mut index = 0;
        self.output(&task.id, index)
            .write_standard_output("Starting VM...\n")
            .await;

        match self.registry.create(&self.driver, &task.configuration.machine) {
            Ok(mut instance) => {
                let exit_code = match instance.up().await {
                    Ok(()) => self.run_scripts(&task, instance.as_mut(), &mut index).await,
                    Err(e) => self.instance_failed(&task.id, &mut index, &e).await,
                };

                let reported = self.report_finish(&task.id, &mut index, exit_code).await;

                if let Err(e) = instance.down().await {
                    warn!(task_id = %task.id, error = %e, "Failed to bring instance down");
                }
                reported
            }
            Err(e) => {
                let exit_code = self.instance_failed(&task.id, &mut index, &e).await;
                self.report_finish(&task.id, &mut index, exit_code).await
            }
        }
    }

    async fn run_scripts(
        &self,
        task: &Task,
        instance: &mut dyn WorkerInstance,
        index: &mut u32,
    ) -> i32 {
        match self.execute_scripts(task, instance, index).await {
            Ok(()) => 0,
            Err(WorkerError::ShellCommandFailed(exit_code)) => {
                info!(task_id = %task.id, exit_code, "Command failed");
                exit_code
            }
            Err(e) => self.instance_failed(&task.id, index, &e).await,
        }
    }

    async fn execute_scripts(
        &self,
        task: &Task,
        instance: &mut dyn WorkerInstance,
        index: &mut u32,
    ) -> Result<(), WorkerError> {
        if let Err(e) = self.client.update_start(&task.id).await {
            warn!(task_id = %task.id, error = %e, "Failed to report task start");
        }

        let config = &task.configuration;

        // Secrets must never reach the output records.
        for command_line in split_into_command_lines(config.secret_startup_script.as_deref()) {
            debug!(task_id = %task.id, "Running secret startup command");
            let exit_code = run_command(instance, &command_line, &mut NullShellOutput).await?;
            if exit_code != 0 {
                return Err(WorkerError::ShellCommandFailed(exit_code));
            }
        }

        for script in [&config.checkout_script, &config.test_script] {
            for command_line in split_into_command_lines(script.as_deref()) {
                *index += 1;
                let mut output = self.output(&task.id, *index);
                output.write_standard_output(&format!("{command_line}\n")).await;

                debug!(task_id = %task.id, command = %command_line, "Executing command");
                let exit_code = run_command(instance, &command_line, &mut output).await?;
                if exit_code != 0 {
                    return Err(WorkerError::ShellCommandFailed(exit_code));
                }
            }
        }

        Ok(())
    }

    async fn instance_failed(&self, task_id: &TaskId, index: &mut u32, e: &WorkerError) -> i32 {
        error!(task_id = %task_id, error = %e, "Task aborted");
        *index += 1;
        self.output(task_id, *index)
            .write_standard_error(&format!("{e}\n"))
            .await;
        INSTANCE_FAILURE_EXIT_CODE
    }

    async fn report_finish(
        &self,
        task_id: &TaskId,
        index: &mut u32,
        exit_code: i32,
    ) -> Result<i32, WorkerError> {
        *index += 1;
        self.output(task_id, *index)
            .write_standard_output(&format!("Exited with code {exit_code}\n"))
            .await;

        self.client.update_finish(task_id, exit_code).await?;
        info!(task_id = %task_id, exit_code, "Task finished");
        Ok(exit_code)
    }

    fn output(&self, task_id: &TaskId, index: u32) -> ServerShellOutput {
        ServerShellOutput::new(
            self.client.clone(),
            self.worker_id.clone(),
            task_id.clone(),
            index,
        )
    }
}

/// Execute one command, turning a timeout into exit code 1.
async fn run_command(
    instance: &mut dyn WorkerInstance,
    command_line: &str,
    output: &mut dyn ShellOutput,
) -> Result<i32, WorkerError> {
    match instance.execute(command_line, output).await {
        Err(WorkerError::Shell(ShellError::Timeout(timeout))) => {
            output
                .write_standard_error(&format!("Command timed out after {}s\n", timeout.as_secs()))
                .await;
            Ok(TIMEOUT_EXIT_CODE)
        }
        other => other,
    }
}

/// Polls for tasks and runs them until stopped.
pub struct WorkerHandler {
    runner: Arc<TaskRunner>,
    work_loop: ConcurrentTaskLoop<Task>,
    keep_alive_loop: TaskLoop,
}

impl WorkerHandler {
    /// Create a stopped handler. `runtime` drives all network and process I/O.
    pub fn new(
        config: &WorkerConfig,
        client: DispatcherClient,
        registry: InstanceRegistry,
        runtime: Handle,
    ) -> Result<Self, WorkerError> {
        if !registry.contains(&config.driver) {
            return Err(WorkerError::UnknownDriver(config.driver.clone()));
        }

        let runner = Arc::new(TaskRunner::new(
            client,
            config.worker_id.clone(),
            config.driver.clone(),
            registry,
        ));

        let dispatch = {
            let runner = runner.clone();
            let runtime = runtime.clone();
            // A failed poll means no work this round; the loop counts it and backs off.
            move || -> Result<Option<Task>, BoxError> { Ok(runtime.block_on(runner.poll())?) }
        };

        let process = {
            let runner = runner.clone();
            let runtime = runtime.clone();
            move |task: Task| -> Result<(), BoxError> {
                runtime.block_on(runner.run(task))?;
                Ok(())
            }
        };

        let keep_alive = {
            let runner = runner.clone();
            move || -> Result<bool, BoxError> {
                runtime.block_on(runner.keep_alive())?;
                Ok(false)
            }
        };

        Ok(Self {
            work_loop: ConcurrentTaskLoop::new(
                "work",
                dispatch,
                process,
                config.poll_interval(),
                config.concurrency,
            ),
            keep_alive_loop: TaskLoop::new("keepalive", keep_alive, config.keepalive_interval()),
            runner,
        })
    }

    pub fn start(&self) -> Result<(), WorkerError> {
        info!(worker_id = %self.runner.worker_id(), "Start working");
        self.keep_alive_loop.start()?;
        self.work_loop.start()?;
        info!("Started");
        Ok(())
    }

    /// Stop polling, wait for running tasks, then stop keep-alives.
    pub fn stop(&self) -> Result<(), WorkerError> {
        info!(worker_id = %self.runner.worker_id(), "Stop working");
        self.work_loop.stop()?;
        self.keep_alive_loop.stop()?;
        info!("Stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.work_loop.is_running()
    }

    /// Health of polling, task processing and keep-alives.
    pub fn health(&self) -> WorkerHealth {
        WorkerHealth {
            poll: self.work_loop.health(),
            process: self.work_loop.process_health(),
            keep_alive: self.keep_alive_loop.health(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHealth {
    pub poll: LoopHealth,
    pub process: LoopHealth,
    pub keep_alive: LoopHealth,
}
