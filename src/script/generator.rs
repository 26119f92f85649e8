//! Bootstrap procedure generation

use super::os::TargetFacts;
use super::procedure::{Procedure, ProcedureBuilder};
use super::stages;
use crate::config::{PathScope, PlatformConfig};
use crate::error::Result;
use tracing::debug;

/// Produces the bootstrap procedure for a target
#[derive(Debug, Clone)]
pub struct ScriptGenerator<'a> {
    config: &'a PlatformConfig,
}

impl<'a> ScriptGenerator<'a> {
    pub fn new(config: &'a PlatformConfig) -> Self {
        Self { config }
    }

    /// Generate the procedure for canonical facts.
    ///
    /// Stages run in a fixed order. The port checks only warn; every other
    /// stage aborts the procedure on failure.
    pub fn generate(&self, facts: &TargetFacts) -> Result<Procedure> {
        let config = self.config;
        let paths = config.paths(PathScope::Remote);
        debug!(
            "Generating bootstrap procedure for {} {} ({})",
            facts.os, facts.os_version, facts.arch
        );

        let procedure = ProcedureBuilder::new()
            .preamble(stages::preamble(config, facts))
            .fatal("packages", "Installing required packages", stages::install_utilities(facts))
            .warning("port-80", "Validating port 80", stages::check_port(config.proxy.http_port))
            .warning("port-443", "Validating port 443", stages::check_port(config.proxy.https_port))
            .fatal("rclone", "Installing RClone", stages::install_rclone())
            .fatal("docker", "Installing Docker", stages::install_docker(config, facts))
            .fatal("swarm", "Setting up Docker Swarm", stages::setup_swarm())
            .fatal("network", "Setting up network", stages::setup_network(&config.network_name))
            .fatal("directories", "Setting up directories", stages::setup_directories(&paths))
            .fatal("proxy-config", "Setting up Traefik", stages::proxy_static_config(config, &paths)?)
            .fatal("middlewares", "Setting up middlewares", stages::proxy_middlewares(&paths)?)
            .fatal("proxy", "Installing Traefik", stages::proxy_instance(config, &paths))
            .fatal("nixpacks", "Installing Nixpacks", stages::install_nixpacks(config))
            .fatal("buildpacks", "Installing Buildpacks", stages::install_buildpacks(config, facts))
            .fatal("railpack", "Installing Railpack", stages::install_railpack(config))
            .completion("Server setup completed successfully ✅")
            .build();

        Ok(procedure)
    }

    /// Render the procedure text for raw facts
    pub fn render(&self, raw_os: &str, os_version: Option<&str>, arch: &str) -> Result<String> {
        let facts = TargetFacts::new(raw_os, os_version, arch)?;
        Ok(self.generate(&facts)?.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use crate::script::procedure::{Interpreter, Stage, StageOutcome};
    use std::path::{Path, PathBuf};

    const EXPECTED_ORDER: [&str; 14] = [
        "packages",
        "port-80",
        "port-443",
        "rclone",
        "docker",
        "swarm",
        "network",
        "directories",
        "proxy-config",
        "middlewares",
        "proxy",
        "nixpacks",
        "buildpacks",
        "railpack",
    ];

    /// Pretends port 80 is taken and everything else succeeds
    struct BusyPort80 {
        seen: Vec<&'static str>,
    }

    impl Interpreter for BusyPort80 {
        fn run(&mut self, stage: &Stage) -> i32 {
            self.seen.push(stage.id);
            if stage.id == "port-80" {
                1
            } else {
                0
            }
        }
    }

    #[test]
    fn test_stage_order() {
        let config = PlatformConfig::default();
        let facts = TargetFacts::new("ubuntu", Some("22.04"), "x86_64").unwrap();
        let procedure = ScriptGenerator::new(&config).generate(&facts).unwrap();

        let ids: Vec<_> = procedure.stages.iter().map(|s| s.id).collect();
        assert_eq!(ids, EXPECTED_ORDER);
    }

    #[test]
    fn test_aliases_render_identically() {
        let config = PlatformConfig::default();
        let generator = ScriptGenerator::new(&config);

        let manjaro = generator.render("manjaro", Some("23.1"), "x86_64").unwrap();
        let arch = generator.render("arch", None, "x86_64").unwrap();
        assert_eq!(manjaro, arch);
        assert!(arch.contains("pacman -Sy"));
    }

    #[test]
    fn test_unsupported_os_produces_nothing() {
        let config = PlatformConfig::default();
        let err = ScriptGenerator::new(&config)
            .render("gentoo", None, "x86_64")
            .unwrap_err();
        assert!(matches!(err, FleetError::UnsupportedOs(_)));
    }

    #[test]
    fn test_ubuntu_end_to_end() {
        let config = PlatformConfig::default();
        let facts = TargetFacts::new("ubuntu", Some("22.04"), "x86_64").unwrap();
        let procedure = ScriptGenerator::new(&config).generate(&facts).unwrap();

        let mut interpreter = BusyPort80 { seen: Vec::new() };
        let report = procedure.execute(&mut interpreter);
        assert!(report.success());
        assert_eq!(report.warnings(), vec!["port-80"]);
        assert_eq!(interpreter.seen, EXPECTED_ORDER);
        assert_eq!(report.stages[4], ("docker", StageOutcome::Succeeded));

        let docker = &procedure.stage("docker").unwrap().body;
        assert!(docker.contains("snap list docker"));
        assert!(docker.contains("install-docker/$DOCKER_VERSION.sh"));

        let swarm = &procedure.stage("swarm").unwrap().body;
        assert!(swarm.contains("docker swarm init --advertise-addr"));
        assert!(swarm.contains("ADVERTISE_ADDR"));

        let network = &procedure.stage("network").unwrap().body;
        assert!(network.contains("docker network create --driver overlay --attachable guildserver-network"));

        let dirs = &procedure.stage("directories").unwrap().body;
        assert!(dirs.contains("chmod 700 /etc/guildserver/ssh"));
        assert!(dirs.contains("chmod 755 /etc/guildserver/traefik/dynamic"));

        let text = procedure.render();
        assert!(text.contains("DOCKER_VERSION=27.0.3"));
        assert!(text.contains("OS_TYPE=\"ubuntu\""));
    }

    /// Lay out a PATH of logging stand-ins plus the few real tools the
    /// bodies need. Docker is absent until the install script provides it.
    fn shim_path(root: &Path, log: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let bin = root.join("bin");
        std::fs::create_dir_all(&bin).unwrap();

        for tool in ["sh", "bash", "cat", "mkdir", "chmod", "cp", "date", "grep", "head", "sleep"] {
            let real = ["/usr/bin", "/bin"]
                .iter()
                .map(|dir| Path::new(dir).join(tool))
                .find(|path| path.exists())
                .unwrap();
            std::os::unix::fs::symlink(real, bin.join(tool)).unwrap();
        }

        let write = |path: &Path, body: String| {
            std::fs::write(path, body).unwrap();
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        };
        let log = log.display();
        let docker = root.join("docker");

        for tool in ["apt-get", "chown", "ss", "rclone", "nixpacks", "pack", "railpack"] {
            write(&bin.join(tool), format!("#!/bin/sh\necho \"{tool} $*\" >> '{log}'\n"));
        }
        write(&bin.join("snap"), "#!/bin/sh\nexit 1\n".to_string());
        write(
            &bin.join("curl"),
            format!(
                "#!/bin/sh\necho \"curl $*\" >> '{log}'\n\
                 case \"$*\" in\n\
                 *install-docker*) echo \"cp '{docker}' '{bin}/docker'\" ;;\n\
                 *ifconfig.io*) echo 203.0.113.7 ;;\n\
                 esac\n",
                docker = docker.display(),
                bin = bin.display(),
            ),
        );
        write(
            &docker,
            format!(
                "#!/bin/sh\necho \"docker $*\" >> '{log}'\n\
                 case \"$1 $2\" in\n\
                 'network inspect'|'service inspect') exit 1 ;;\n\
                 esac\n\
                 [ \"$1\" = inspect ] && exit 1\n\
                 exit 0\n"
            ),
        );
        bin
    }

    #[test]
    fn test_ubuntu_body_runs_under_bash() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = PlatformConfig::default();
        config.force_local_paths = true;
        config.local_base_path = tmp.path().join("guild");
        let paths = config.paths(PathScope::Remote);

        let facts = TargetFacts::new("ubuntu", Some("22.04"), "x86_64").unwrap();
        let body = ScriptGenerator::new(&config).generate(&facts).unwrap().render_body();
        let script = tmp.path().join("setup.sh");
        std::fs::write(&script, body).unwrap();

        let log = tmp.path().join("calls.log");
        let bin = shim_path(tmp.path(), &log);
        let output = std::process::Command::new(bin.join("bash"))
            .arg(&script)
            .env_clear()
            .env("PATH", &bin)
            .env("ORIGINAL_USER", "root")
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert!(stdout.contains("Docker installed successfully"));
        assert!(stdout.contains("Server setup completed successfully"));

        let calls = std::fs::read_to_string(&log).unwrap();
        let docker: Vec<&str> = calls.lines().filter(|l| l.starts_with("docker ")).collect();
        assert_eq!(
            &docker[..6],
            [
                "docker info",
                "docker swarm init --advertise-addr 203.0.113.7",
                "docker network inspect guildserver-network",
                "docker network create --driver overlay --attachable guildserver-network",
                "docker service inspect guildserver-traefik",
                "docker inspect guildserver-traefik",
            ]
        );
        assert!(docker[6].starts_with("docker run -d --name guildserver-traefik"));

        let position = |needle: &str| calls.find(needle).unwrap();
        assert!(position("apt-get install") < position("install-docker/27.0.3.sh"));
        assert!(position("install-docker") < position("docker info"));

        let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&paths.base), 0o755);
        assert_eq!(mode(&paths.traefik_dynamic), 0o755);
        assert_eq!(mode(&paths.ssh), 0o700);
        assert!(paths.traefik_config().exists());
        assert!(paths.middlewares_config().exists());
    }

    #[test]
    fn test_proxy_config_is_write_once() {
        let config = PlatformConfig::default();
        let facts = TargetFacts::new("debian", Some("12"), "x86_64").unwrap();
        let procedure = ScriptGenerator::new(&config).generate(&facts).unwrap();

        let body = &procedure.stage("proxy-config").unwrap().body;
        assert!(body.contains("if [ -f /etc/guildserver/traefik/traefik.yml ]; then"));
        assert!(body.contains("chmod 600 /etc/guildserver/traefik/dynamic/acme.json"));

        let proxy = &procedure.stage("proxy").unwrap().body;
        assert!(proxy.contains("docker service rm guildserver-traefik"));
        assert!(proxy.contains("traefik:v3.1.2"));
    }

    #[test]
    fn test_ubuntu_non_lts_refused() {
        let config = PlatformConfig::default();
        let facts = TargetFacts::new("ubuntu", Some("24.10"), "x86_64").unwrap();
        let procedure = ScriptGenerator::new(&config).generate(&facts).unwrap();
        let docker = &procedure.stage("docker").unwrap().body;
        assert!(docker.contains("not supported on Ubuntu 24.10"));
    }

    #[test]
    fn test_arm_buildpacks() {
        let config = PlatformConfig::default();
        let facts = TargetFacts::new("debian", Some("12"), "aarch64").unwrap();
        let procedure = ScriptGenerator::new(&config).generate(&facts).unwrap();
        let body = &procedure.stage("buildpacks").unwrap().body;
        assert!(body.contains("linux-arm64.tgz"));
    }
}
