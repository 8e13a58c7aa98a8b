//! Isolated execution environment for debuggee code.
//!
//! Grounded on `backend/service/visual_debug_servcie/debug_core/utils/docker_cli.go`:
//! a thin `Config` + client wrapping create/exec/copy-in/attach/destroy. The
//! Go original talks to the Docker Engine API directly; this uses `bollard`,
//! the ecosystem's Docker client, for the same calls.
//!
//! [`SandboxRuntime`] is a factory seam so tests can swap in an in-memory
//! fake instead of a real daemon (a real Docker daemon and DAP server are
//! out of reach in CI, same as the teacher's preference for fakeable trait
//! objects at seams it cannot exercise for real).

use std::collections::HashMap;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config as ContainerConfig, CreateContainerOptions, KillContainerOptions,
    RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use bytes::Bytes;
use dso_error::SandboxError;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWrite;

/// Parameters for provisioning one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub image: String,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub binds: Vec<String>,
    /// `(container_port, host_port)` pairs; the DAP server always listens
    /// on container port 8080.
    pub port_mappings: Vec<(u16, u16)>,
}

pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// A bidirectional stream into an interactively-attached process: `output`
/// carries the debuggee's combined stdout/stderr, `input` is its stdin.
pub struct AttachStream {
    pub output: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// A single provisioned, running sandbox.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn exec(&self, cmd: &[String]) -> Result<ExecOutput, SandboxError>;
    async fn copy_to(&self, dest_dir: &str, filename: &str, bytes: &[u8]) -> Result<(), SandboxError>;
    async fn attach_interactive(&self, cmd: &[String]) -> Result<AttachStream, SandboxError>;
    /// Kills and removes the container. Tolerates an already-dead container.
    async fn destroy(&self) -> Result<(), SandboxError>;
}

/// Factory that brings sandboxes up.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn create(&self, cfg: SandboxConfig) -> Result<Box<dyn Sandbox>, SandboxError>;
}

/// Docker-backed [`SandboxRuntime`].
pub struct DockerSandboxRuntime {
    docker: Docker,
}

impl DockerSandboxRuntime {
    pub fn connect() -> Result<Self, SandboxError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| SandboxError::CreateFailed(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl SandboxRuntime for DockerSandboxRuntime {
    async fn create(&self, cfg: SandboxConfig) -> Result<Box<dyn Sandbox>, SandboxError> {
        let name = format!("dso-{}", uuid::Uuid::new_v4());

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for (container_port, host_port) in &cfg.port_mappings {
            let key = format!("{container_port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            memory: Some(cfg.memory_bytes),
            cpu_quota: Some(cfg.cpu_quota),
            port_bindings: Some(port_bindings),
            binds: Some(cfg.binds.clone()),
            ..Default::default()
        };

        let container_cfg = ContainerConfig {
            image: Some(cfg.image.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            cmd: Some(vec!["sh".to_string()]),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                container_cfg,
            )
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        self.docker
            .start_container::<String>(&name, None)
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        Ok(Box::new(DockerSandbox {
            docker: self.docker.clone(),
            container_name: name,
        }))
    }
}

struct DockerSandbox {
    docker: Docker,
    container_name: String,
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn exec(&self, cmd: &[String]) -> Result<ExecOutput, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.container_name,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?
        {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(|e| SandboxError::ExecFailed(e.to_string()))? {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message))
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message))
                    }
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::ExecFailed(e.to_string()))?;
        let exit_code = inspect.exit_code.unwrap_or(0);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn copy_to(&self, dest_dir: &str, filename: &str, bytes: &[u8]) -> Result<(), SandboxError> {
        let mut archive = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive
            .append_data(&mut header, filename, bytes)
            .map_err(|e| SandboxError::CopyFailed(e.to_string()))?;
        let tar_bytes = archive
            .into_inner()
            .map_err(|e| SandboxError::CopyFailed(e.to_string()))?;

        self.docker
            .upload_to_container(
                &self.container_name,
                Some(UploadToContainerOptions {
                    path: dest_dir.to_string(),
                    ..Default::default()
                }),
                tar_bytes.into(),
            )
            .await
            .map_err(|e| SandboxError::CopyFailed(e.to_string()))
    }

    async fn attach_interactive(&self, cmd: &[String]) -> Result<AttachStream, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                &self.container_name,
                CreateExecOptions {
                    cmd: Some(cmd.to_vec()),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::AttachFailed(e.to_string()))?;

        match self
            .docker
            .start_exec(
                &exec.id,
                Some(bollard::exec::StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SandboxError::AttachFailed(e.to_string()))?
        {
            StartExecResults::Attached { output, input } => {
                let mapped = output.map(|item| {
                    item.map(|log| Bytes::from(log.into_bytes()))
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
                });
                Ok(AttachStream {
                    output: Box::pin(mapped),
                    input,
                })
            }
            StartExecResults::Detached => Err(SandboxError::AttachFailed(
                "exec started detached, expected attached stream".to_string(),
            )),
        }
    }

    async fn destroy(&self) -> Result<(), SandboxError> {
        let _ = self
            .docker
            .kill_container(&self.container_name, None::<KillContainerOptions<String>>)
            .await;
        self.docker
            .remove_container(
                &self.container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .or_else(|e| {
                // Already gone is fine; anything else propagates.
                if e.to_string().contains("No such container") {
                    Ok(())
                } else {
                    Err(SandboxError::DestroyFailed(e.to_string()))
                }
            })
    }
}

#[cfg(any(test, feature = "fake"))]
pub mod fake {
    //! In-memory [`SandboxRuntime`] for tests that don't have a Docker
    //! daemon available.

    use std::sync::Mutex;

    use futures::stream;

    use super::*;

    pub struct FakeSandboxRuntime;

    #[async_trait]
    impl SandboxRuntime for FakeSandboxRuntime {
        async fn create(&self, _cfg: SandboxConfig) -> Result<Box<dyn Sandbox>, SandboxError> {
            Ok(Box::new(FakeSandbox {
                files: Mutex::new(Vec::new()),
            }))
        }
    }

    pub struct FakeSandbox {
        files: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Sandbox for FakeSandbox {
        async fn exec(&self, cmd: &[String]) -> Result<ExecOutput, SandboxError> {
            Ok(ExecOutput {
                stdout: format!("ran: {}", cmd.join(" ")),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn copy_to(&self, dest_dir: &str, filename: &str, bytes: &[u8]) -> Result<(), SandboxError> {
            self.files
                .lock()
                .expect("fake sandbox mutex poisoned")
                .push((dest_dir.to_string(), filename.to_string(), bytes.to_vec()));
            Ok(())
        }

        async fn attach_interactive(&self, _cmd: &[String]) -> Result<AttachStream, SandboxError> {
            let lines = vec![Ok(Bytes::from_static(b"Started server\n"))];
            Ok(AttachStream {
                output: Box::pin(stream::iter(lines)),
                input: Box::pin(tokio::io::sink()),
            })
        }

        async fn destroy(&self) -> Result<(), SandboxError> {
            Ok(())
        }
    }

    #[cfg(test)]
    #[tokio::test]
    async fn fake_sandbox_round_trip() {
        let runtime = FakeSandboxRuntime;
        let sandbox = runtime
            .create(SandboxConfig {
                image: "debuggers/go".to_string(),
                memory_bytes: 1 << 30,
                cpu_quota: 300_000,
                binds: vec![],
                port_mappings: vec![(8080, 30000)],
            })
            .await
            .expect("fake create never fails");

        sandbox
            .copy_to("/work", "main.go", b"package main")
            .await
            .expect("copy");

        let out = sandbox
            .exec(&["echo".to_string(), "hi".to_string()])
            .await
            .expect("exec");
        assert_eq!(out.exit_code, 0);

        sandbox.destroy().await.expect("destroy");
    }
}
