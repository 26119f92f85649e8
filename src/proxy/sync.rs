//! Write-once materialization of proxy configuration

use super::config::{default_middlewares, static_config, to_yaml, ServerRouting};
use crate::config::{Paths, PlatformConfig};
use crate::error::{FleetError, Result};
use crate::exec::{shell, CommandRunner};
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Mode of the TLS credential store
pub const ACME_MODE: u32 = 0o600;

/// A filesystem the configuration is written to
#[async_trait]
pub trait ConfigTarget: Send + Sync {
    async fn ensure_dir(&self, dir: &Path) -> Result<()>;

    /// Write `contents` unless `path` exists. Returns whether it wrote.
    async fn write_if_absent(&self, path: &Path, contents: &str) -> Result<bool>;

    /// Set `mode` on `path` if it exists
    async fn restrict_if_present(&self, path: &Path, mode: u32) -> Result<()>;
}

/// The orchestrator's own filesystem
#[derive(Debug, Clone, Default)]
pub struct LocalTarget;

#[async_trait]
impl ConfigTarget for LocalTarget {
    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn write_if_absent(&self, path: &Path, contents: &str) -> Result<bool> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;
        let file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        fill_or_remove(file, path, contents).await?;
        Ok(true)
    }

    async fn restrict_if_present(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        match tokio::fs::metadata(path).await {
            Ok(_) => {
                tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write a freshly created file. A partial file would be skipped by every
/// later sync, so it is removed when the write fails.
async fn fill_or_remove<W>(mut file: W, path: &Path, contents: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(contents.as_bytes()).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(path).await {
            warn!("Could not remove partial {}: {}", path.display(), remove);
        }
        return Err(e.into());
    }
    Ok(())
}

/// A provisioned server, written through the remote gateway
#[derive(Clone)]
pub struct RemoteTarget {
    runner: Arc<dyn CommandRunner>,
}

impl RemoteTarget {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ConfigTarget for RemoteTarget {
    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        self.runner
            .run(&format!("mkdir -p {}", shell::quote(&dir.display().to_string())))
            .await?;
        Ok(())
    }

    async fn write_if_absent(&self, path: &Path, contents: &str) -> Result<bool> {
        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| FleetError::Config(format!("Not a file path: {}", path.display())))?;
        let output = self
            .runner
            .run(&shell::write_if_absent(path, contents, &label))
            .await?;
        Ok(output.stdout.contains(&format!("{} created", label)))
    }

    async fn restrict_if_present(&self, path: &Path, mode: u32) -> Result<()> {
        self.runner.run(&shell::restrict_if_present(path, mode)).await?;
        Ok(())
    }
}

/// Which files a sync wrote and which it left alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

impl SyncReport {
    fn record(&mut self, path: PathBuf, wrote: bool) {
        if wrote {
            info!("Wrote {}", path.display());
            self.written.push(path);
        } else {
            debug!("{} already exists, leaving it untouched", path.display());
            self.skipped.push(path);
        }
    }
}

/// Materializes static, middleware and routing configuration on a target.
///
/// Existing files are never overwritten, so operator edits survive. The
/// ACME store is restricted to owner read/write on every run.
pub struct ProxySynchronizer<'a> {
    config: &'a PlatformConfig,
    paths: Paths,
    target: &'a dyn ConfigTarget,
}

impl<'a> ProxySynchronizer<'a> {
    pub fn new(config: &'a PlatformConfig, paths: Paths, target: &'a dyn ConfigTarget) -> Self {
        Self {
            config,
            paths,
            target,
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub async fn sync_static(&self, report: &mut SyncReport) -> Result<()> {
        self.target.ensure_dir(&self.paths.traefik).await?;
        self.target.ensure_dir(&self.paths.traefik_dynamic).await?;
        self.target
            .restrict_if_present(&self.paths.acme_store(), ACME_MODE)
            .await?;

        let document = to_yaml(&static_config(
            &self.config.proxy,
            &self.config.network_name,
            &self.paths,
        ))?;
        let path = self.paths.traefik_config();
        let wrote = self.target.write_if_absent(&path, &document).await?;
        report.record(path, wrote);
        Ok(())
    }

    pub async fn sync_middlewares(&self, report: &mut SyncReport) -> Result<()> {
        self.target.ensure_dir(&self.paths.traefik_dynamic).await?;
        let document = to_yaml(&default_middlewares())?;
        let path = self.paths.middlewares_config();
        let wrote = self.target.write_if_absent(&path, &document).await?;
        report.record(path, wrote);
        Ok(())
    }

    pub async fn sync_routing(&self, routing: &ServerRouting, report: &mut SyncReport) -> Result<()> {
        self.target.ensure_dir(&self.paths.traefik_dynamic).await?;
        let document = to_yaml(&routing.to_dynamic())?;
        let path = self.paths.traefik_dynamic.join(routing.file_name());
        let wrote = self.target.write_if_absent(&path, &document).await?;
        report.record(path, wrote);
        Ok(())
    }

    /// Sync every artifact; routing only when given
    pub async fn sync_all(&self, routing: Option<&ServerRouting>) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.sync_static(&mut report).await?;
        self.sync_middlewares(&mut report).await?;
        if let Some(routing) = routing {
            self.sync_routing(routing, &mut report).await?;
        }
        Ok(report)
    }
}

/// Routing for the platform's own dashboard on `domain`
pub fn dashboard_routing(config: &PlatformConfig, domain: &str) -> ServerRouting {
    ServerRouting {
        name: config.brand_slug.clone(),
        domain: domain.to_string(),
        upstream: format!("http://{}:3000", config.brand_slug),
        https: config.proxy.acme_email.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::RemoteRunner;
    use crate::ssh::fake::{FakeGateway, Reply};
    use crate::ssh::SshTarget;
    use std::os::unix::fs::PermissionsExt;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;

    /// Writer on a full disk
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("traefik.yaml");
        std::fs::write(&path, "").unwrap();

        let err = fill_or_remove(FullDisk, &path, "entryPoints: {}\n").await.unwrap_err();
        assert!(matches!(err, FleetError::Io(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_existing_static_config_is_untouched() {
        let tmp = TempDir::new().unwrap();
        let config = PlatformConfig::default();
        let paths = Paths::under(tmp.path());
        std::fs::create_dir_all(&paths.traefik).unwrap();
        std::fs::write(paths.traefik_config(), b"# operator edit\n").unwrap();

        let target = LocalTarget;
        let sync = ProxySynchronizer::new(&config, paths.clone(), &target);
        let report = sync.sync_all(None).await.unwrap();

        assert_eq!(std::fs::read(paths.traefik_config()).unwrap(), b"# operator edit\n");
        assert_eq!(report.skipped, vec![paths.traefik_config()]);
        assert_eq!(report.written, vec![paths.middlewares_config()]);
    }

    #[tokio::test]
    async fn test_fresh_sync_and_routing() {
        let tmp = TempDir::new().unwrap();
        let config = PlatformConfig::default();
        let paths = Paths::under(tmp.path());

        let target = LocalTarget;
        let sync = ProxySynchronizer::new(&config, paths.clone(), &target);
        let routing = dashboard_routing(&config, "panel.example.com");
        let report = sync.sync_all(Some(&routing)).await.unwrap();

        assert_eq!(report.written.len(), 3);
        let routed = std::fs::read_to_string(paths.traefik_dynamic.join("guildserver.yml")).unwrap();
        assert!(routed.contains("Host(`panel.example.com`)"));

        let again = sync.sync_all(Some(&routing)).await.unwrap();
        assert!(again.written.is_empty());
        assert_eq!(again.skipped.len(), 3);
    }

    #[tokio::test]
    async fn test_acme_store_restricted() {
        let tmp = TempDir::new().unwrap();
        let config = PlatformConfig::default();
        let paths = Paths::under(tmp.path());
        std::fs::create_dir_all(&paths.traefik_dynamic).unwrap();
        std::fs::write(paths.acme_store(), b"{}").unwrap();
        std::fs::set_permissions(paths.acme_store(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let target = LocalTarget;
        ProxySynchronizer::new(&config, paths.clone(), &target)
            .sync_all(None)
            .await
            .unwrap();

        let mode = std::fs::metadata(paths.acme_store()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_remote_target_reports_skips() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.reply(
            "traefik.yml",
            Reply {
                stdout: "traefik.yml already exists ✅\n".into(),
                ..Default::default()
            },
        );
        gateway.reply(
            "middlewares.yml",
            Reply {
                stdout: "middlewares.yml created ✅\n".into(),
                ..Default::default()
            },
        );
        let ssh = SshTarget {
            host: "10.0.0.9".into(),
            port: 22,
            username: "root".into(),
            private_key: Some(Arc::from("key")),
        };
        let target = RemoteTarget::new(Arc::new(RemoteRunner::new(gateway.clone(), ssh)));
        let config = PlatformConfig::default();
        let paths = Paths::under("/etc/guildserver");

        let report = ProxySynchronizer::new(&config, paths.clone(), &target)
            .sync_all(None)
            .await
            .unwrap();

        assert_eq!(report.skipped, vec![paths.traefik_config()]);
        assert_eq!(report.written, vec![paths.middlewares_config()]);
        assert!(gateway
            .recorded()
            .iter()
            .any(|c| c.contains("chmod 600 /etc/guildserver/traefik/dynamic/acme.json")));
    }
}
