//! Ephemeral virtual machines managed through Vagrant.
//!
//! A [`VirtualMachine`] starts `Down`. [`VirtualMachine::up`] prepares a
//! private working directory (Vagrantfile, bootstrap script, one-off SSH
//! keypair), boots the box and reads the SSH connection details;
//! [`VirtualMachine::down`] destroys the box and removes the directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::process::{ProcessError, ProcessRunner};
use crate::remote_shell::{SshConnection, VM_USER};

const KEY_FILE: &str = "id_ed25519";
const VAGRANTFILE: &str = "Vagrantfile";
const BOOTSTRAP_FILE: &str = "Vagrantfile-bootstrap.sh";

static HOST_NAME_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"HostName\s(\S+)").unwrap());
static PORT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"Port\s(\d+)").unwrap());

#[derive(Debug, Error)]
pub enum VmError {
    #[error("machine is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("failed to generate SSH key: {0}")]
    KeyGeneration(String),

    #[error("VM could not be started\n\n{0}")]
    StartFailed(String),

    #[error("VM could not be provisioned\n\n{0}")]
    ProvisionFailed(String),

    #[error("could not determine SSH connection information\n\n{0}")]
    ConnectionInfoUnavailable(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error in machine directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Box to boot: Vagrant box name plus the URL it is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineImage {
    pub name: String,
    pub url: String,
}

impl MachineImage {
    /// Image for `machine` served from `box_urls` (`<box_urls><machine>.box`).
    pub fn from_box_urls(box_urls: &str, machine: &str) -> Self {
        Self {
            name: machine.to_string(),
            url: format!("{box_urls}{machine}.box"),
        }
    }
}

/// Creates machines that share one executable, directory root and
/// bring-up lock.
#[derive(Debug, Clone)]
pub struct VagrantDriver {
    vagrant: ProcessRunner,
    ssh_keygen: ProcessRunner,
    machines_dir: PathBuf,
    cpus: u32,
    memory_mb: u32,
    /// Serializes `vagrant up` across all machines of this driver.
    up_lock: Arc<Mutex<()>>,
}

impl VagrantDriver {
    pub fn new(vagrant_executable: impl Into<String>, machines_dir: impl Into<PathBuf>) -> Self {
        Self {
            vagrant: ProcessRunner::new(vagrant_executable),
            ssh_keygen: ProcessRunner::new("ssh-keygen"),
            machines_dir: machines_dir.into(),
            cpus: 2,
            memory_mb: 1024,
            up_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_resources(mut self, cpus: u32, memory_mb: u32) -> Self {
        self.cpus = cpus;
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_ssh_keygen(mut self, executable: impl Into<String>) -> Self {
        self.ssh_keygen = ProcessRunner::new(executable);
        self
    }

    /// A new machine in state `Down`. Nothing touches the disk until `up`.
    pub fn machine(&self, image: MachineImage) -> VirtualMachine {
        let id = Uuid::new_v4();
        VirtualMachine {
            id,
            dir: self.machines_dir.join(id.to_string()),
            image,
            cpus: self.cpus,
            memory_mb: self.memory_mb,
            vagrant: self.vagrant.clone(),
            ssh_keygen: self.ssh_keygen.clone(),
            up_lock: self.up_lock.clone(),
            connection: None,
        }
    }
}

pub struct VirtualMachine {
    id: Uuid,
    dir: PathBuf,
    image: MachineImage,
    cpus: u32,
    memory_mb: u32,
    vagrant: ProcessRunner,
    ssh_keygen: ProcessRunner,
    up_lock: Arc<Mutex<()>>,
    /// Set exactly while the machine is up.
    connection: Option<SshConnection>,
}

impl VirtualMachine {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.dir
    }

    pub fn image(&self) -> &MachineImage {
        &self.image
    }

    pub fn is_up(&self) -> bool {
        self.connection.is_some()
    }

    /// Boot the machine. On failure the machine is torn down again and stays `Down`.
    pub async fn up(&mut self) -> Result<(), VmError> {
        if self.is_up() {
            return Err(VmError::InvalidState {
                expected: "down",
                actual: "up",
            });
        }

        info!(vm_id = %self.id, machine = %self.image.name, "Starting VM");
        match self.bring_up().await {
            Ok(connection) => {
                info!(
                    vm_id = %self.id,
                    host = %connection.host,
                    port = connection.port,
                    "VM is up"
                );
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                warn!(vm_id = %self.id, error = %e, "VM failed to come up, cleaning up");
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Destroy the machine. Destroy failures are logged, never returned.
    pub async fn down(&mut self) -> Result<(), VmError> {
        if self.connection.take().is_none() {
            return Err(VmError::InvalidState {
                expected: "up",
                actual: "down",
            });
        }

        self.teardown().await;
        info!(vm_id = %self.id, machine = %self.image.name, "Destroyed VM");
        Ok(())
    }

    /// Connection details for running commands on the machine.
    pub fn create_client(&self) -> Result<SshConnection, VmError> {
        self.connection.clone().ok_or(VmError::InvalidState {
            expected: "up",
            actual: "down",
        })
    }

    async fn bring_up(&self) -> Result<SshConnection, VmError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let public_key = self.generate_key().await?;
        tokio::fs::write(
            self.dir.join(VAGRANTFILE),
            render_vagrantfile(&self.image, self.cpus, self.memory_mb),
        )
        .await?;
        tokio::fs::write(self.dir.join(BOOTSTRAP_FILE), render_bootstrap(&public_key)).await?;

        {
            let _guard = self.up_lock.lock().await;
            let result = self.vagrant.run(&["up", "--no-provision"], &self.dir).await?;
            if !result.success() {
                return Err(VmError::StartFailed(result.output()));
            }
        }

        let result = self.vagrant.run(&["provision"], &self.dir).await?;
        if !result.success() {
            return Err(VmError::ProvisionFailed(result.output()));
        }

        let result = self.vagrant.run(&["ssh-config"], &self.dir).await?;
        if !result.success() {
            return Err(VmError::ConnectionInfoUnavailable(result.output()));
        }
        let (host, port) = parse_ssh_config(&result.stdout)
            .ok_or_else(|| VmError::ConnectionInfoUnavailable(result.output()))?;

        Ok(SshConnection::new(host, port, VM_USER, self.dir.join(KEY_FILE)))
    }

    /// Write a fresh keypair into the machine directory and return the public key.
    async fn generate_key(&self) -> Result<String, VmError> {
        let comment = format!("{}@vmci", self.id);
        let result = self
            .ssh_keygen
            .run(
                &["-q", "-t", "ed25519", "-N", "", "-C", &comment, "-f", KEY_FILE],
                &self.dir,
            )
            .await?;
        if !result.success() {
            return Err(VmError::KeyGeneration(result.output()));
        }

        let public_key = tokio::fs::read_to_string(self.dir.join(format!("{KEY_FILE}.pub"))).await?;
        Ok(public_key.trim().to_string())
    }

    async fn teardown(&self) {
        if self.dir.join(VAGRANTFILE).exists() {
            match self.vagrant.run(&["destroy", "-f"], &self.dir).await {
                Ok(result) if result.success() => {}
                Ok(result) => {
                    warn!(vm_id = %self.id, output = %result.output(), "VmDestroyFailed");
                }
                Err(e) => warn!(vm_id = %self.id, error = %e, "VmDestroyFailed"),
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(vm_id = %self.id, dir = %self.dir.display(), error = %e, "Failed to remove VM directory");
            }
        }
        debug!(vm_id = %self.id, "VM directory removed");
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        if self.is_up() {
            warn!(
                vm_id = %self.id,
                dir = %self.dir.display(),
                "VM dropped while up; it must be destroyed manually"
            );
        }
    }
}

/// Extract host and port from `vagrant ssh-config` output.
pub fn parse_ssh_config(text: &str) -> Option<(String, u16)> {
    let host = HOST_NAME_REGEX.captures(text)?.get(1)?.as_str().to_string();
    let port = PORT_REGEX.captures(text)?.get(1)?.as_str().parse().ok()?;
    Some((host, port))
}

pub fn render_vagrantfile(image: &MachineImage, cpus: u32, memory_mb: u32) -> String {
    format!(
        r#"# -*- mode: ruby -*-
# Generated by vmci. Do not edit.
Vagrant.configure("2") do |config|
  config.vm.box = "{name}"
  config.vm.box_url = "{url}"
  config.vm.provision :shell, :path => "{bootstrap}"

  config.vm.provider :virtualbox do |vb|
    vb.customize ["modifyvm", :id, "--cpus", "{cpus}"]
    vb.customize ["modifyvm", :id, "--memory", "{memory_mb}"]
  end
end
"#,
        name = image.name,
        url = image.url,
        bootstrap = BOOTSTRAP_FILE,
    )
}

pub fn render_bootstrap(public_key: &str) -> String {
    format!(
        r#"#!/bin/sh
set -e
id -u {user} >/dev/null 2>&1 || useradd --create-home --shell /bin/bash {user}
mkdir -p /home/{user}/.ssh
echo "{public_key}" > /home/{user}/.ssh/authorized_keys
chmod 700 /home/{user}/.ssh
chmod 600 /home/{user}/.ssh/authorized_keys
chown -R {user}:{user} /home/{user}/.ssh
echo "{user} ALL=(ALL) NOPASSWD: ALL" > /etc/sudoers.d/{user}
chmod 440 /etc/sudoers.d/{user}
"#,
        user = VM_USER,
    )
}
